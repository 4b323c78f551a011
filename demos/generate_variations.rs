//! Run several image-to-image variations of a still through ComfyUI.
//!
//! Requires a running ComfyUI instance and an API-format img2img workflow
//! (one `LoadImage`, one sampler, one or two `CLIPTextEncode` nodes).
//!
//! ```sh
//! cargo run --example generate_variations -- workflow_api.json frame.png "watercolor"
//! ```
//!
//! Press Ctrl-C to stop after the current request.

use comfy_i2i::{
    CancelToken, ComfyClient, GenerationParams, SeedMode, Settings, VariationRunner, Workflow,
};
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [workflow_path, source, prompt] = args.as_slice() else {
        eprintln!("usage: generate_variations <workflow_api.json> <image> <prompt>");
        return Ok(());
    };

    let settings_path = std::env::temp_dir().join("comfy_i2i_settings.json");
    let mut settings = Settings::load(&settings_path);
    settings.workflow = workflow_path.clone();

    let config = settings.client_config()?;
    let client = ComfyClient::new(config.clone());
    if !client.health().await? {
        eprintln!("ComfyUI is not responding at {}:{}", config.host, config.port);
        return Ok(());
    }

    let workflow = Workflow::from_file(&settings.workflow_path()?)?;
    println!(
        "Loaded {} nodes (negative prompt slot: {})",
        workflow.len(),
        workflow.has_second_text_node()
    );

    let cancel = CancelToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let output_dir = settings
        .output_folder()
        .unwrap_or_else(|| PathBuf::from("."));
    let params = GenerationParams::new(prompt.as_str())
        .negative("lowres, blurry")
        .seed(SeedMode::Fixed(20240611))
        .denoise(0.6)
        .denoise_increment(-0.1)
        .variations(3);

    let runner = VariationRunner::new(client)
        .with_timing(&config)
        .with_cancellation(cancel);
    let ledger = runner
        .run_with_progress(&workflow, &params, Path::new(source), &output_dir, |p| {
            if let Some(n) = p.variation {
                println!("[{n}/{}] {}", p.total, p.stage);
            }
        })
        .await?;

    for path in &ledger.outputs {
        println!("Saved: {}", path.display());
    }
    for failure in &ledger.failures {
        eprintln!(
            "Variation {} failed while {}: {}",
            failure.index + 1,
            failure.stage,
            failure.message
        );
    }
    println!("{}", ledger.summary());

    settings.save(&settings_path)?;
    Ok(())
}
