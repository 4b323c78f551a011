use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::Dimensions;

/// Capabilities the embedding application (a compositing tool, an editor, a
/// CLI) provides to a [`GenerationSession`](crate::GenerationSession).
///
/// All methods are synchronous; hosts are expected to answer from their own
/// state or do short blocking work such as rendering a single frame.
pub trait HostBridge: Send + Sync {
    /// Size of the active composition, or `None` when there is none.
    fn composition_size(&self) -> Option<Dimensions>;

    /// File backing the selected source layer, when it is a still on disk.
    fn source_image_path(&self) -> Option<PathBuf>;

    /// Render the source as it appears (effects, transforms) to a PNG.
    ///
    /// `requested` is a suggestion; hosts may write elsewhere and must return
    /// the path they actually produced.
    fn render_source_to_file(&self, requested: &Path) -> Result<PathBuf>;

    /// Bring a generated still into the composition.
    fn import_still(&self, path: &Path) -> Result<()>;

    /// Folder of the saved project, if any.
    fn project_dir(&self) -> Option<PathBuf> {
        None
    }
}

impl<T: HostBridge + ?Sized> HostBridge for &T {
    fn composition_size(&self) -> Option<Dimensions> {
        (**self).composition_size()
    }

    fn source_image_path(&self) -> Option<PathBuf> {
        (**self).source_image_path()
    }

    fn render_source_to_file(&self, requested: &Path) -> Result<PathBuf> {
        (**self).render_source_to_file(requested)
    }

    fn import_still(&self, path: &Path) -> Result<()> {
        (**self).import_still(path)
    }

    fn project_dir(&self) -> Option<PathBuf> {
        (**self).project_dir()
    }
}
