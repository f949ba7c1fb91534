use anyhow::{Context, Result};
use std::path::PathBuf;

/// Cross-platform path manager for projvault's own files.
///
/// Backup archives and manifests live wherever the user points the tool;
/// this only covers the tool's config directory and log file.
pub struct ConfigManager;

impl ConfigManager {
    /// Get the configuration directory path following platform conventions:
    /// - Linux: $XDG_CONFIG_HOME/projvault or ~/.config/projvault
    /// - macOS: ~/Library/Application Support/projvault
    /// - Windows: %APPDATA%\projvault
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                Ok(PathBuf::from(xdg_config).join("projvault"))
            } else {
                let home = dirs::home_dir().context("Failed to get home directory")?;
                Ok(home.join(".config").join("projvault"))
            }
        }

        #[cfg(target_os = "macos")]
        {
            let home = dirs::home_dir().context("Failed to get home directory")?;
            Ok(home
                .join("Library")
                .join("Application Support")
                .join("projvault"))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            Ok(dirs::config_dir()
                .context("Failed to get config directory")?
                .join("projvault"))
        }
    }

    /// Default root for backup archives and manifests when no `--backup-dir`
    /// is given: `<config dir>/backups/<project>/...`
    pub fn default_backup_root() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("backups"))
    }

    /// Get the log file path
    pub fn log_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("projvault.log"))
    }

    /// Ensure the configuration directory exists
    pub fn ensure_config_dir() -> Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir).with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;
        Ok(config_dir)
    }
}
