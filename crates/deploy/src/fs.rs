//! File system utils.

use std::path::Path;

use anyhow::Context;

pub struct FsHandler;

impl FsHandler {
    pub fn set_writable(path: &Path) -> anyhow::Result<()> {
        let metadata = std::fs::metadata(path).context("Failed to get metadata for path")?;

        let mut perms = metadata.permissions();

        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);

        std::fs::set_permissions(path, perms)
            .context(format!("Failed to set permissions on {}", path.display()))?;

        Ok(())
    }

    // Create a local artifacts directory if it doesn't exist
    pub fn create_dir(path: &Path) -> anyhow::Result<()> {
        if path.is_dir() {
            return Ok(());
        }

        std::fs::create_dir_all(path)
            .context(format!("Failed to create directory {}", path.display()))?;
        tracing::debug!("Created directory: {}", path.display());

        Self::set_writable(path)
            .context("Failed to set permissions on artifacts directory")?;

        Ok(())
    }
}
