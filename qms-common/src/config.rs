//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`QMS_ROOT_FOLDER`, then `QMS_ROOT`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or malformed TOML file never aborts startup: a warning is logged
//! and the compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "qms.db";

/// Backup directory name inside the root folder
pub const BACKUP_DIR_NAME: &str = "backups";

/// Default HTTP port for qms-server
pub const DEFAULT_PORT: u16 = 5780;

/// Default bind address for qms-server
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Compiled-in fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was built for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
        }
    }
}

/// `[server]` table of the TOML config file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// `[logging]` table of the TOML config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log targets that `[logging] level` applies to
const LOG_TARGETS: &[&str] = &["qms_server", "qms_common", "tower_http"];

impl LoggingConfig {
    /// `EnvFilter` directives setting every QMS log target to `level`
    ///
    /// ```
    /// use qms_common::config::LoggingConfig;
    ///
    /// let logging = LoggingConfig { level: "Debug".to_string() };
    /// assert_eq!(
    ///     logging.filter_directives(),
    ///     "qms_server=debug,qms_common=debug,tower_http=debug"
    /// );
    /// ```
    pub fn filter_directives(&self) -> String {
        let level = self.level.trim().to_ascii_lowercase();
        LOG_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Contents of `<config dir>/qms/<module>.toml`
///
/// Every field is optional so older or partial files keep loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
    }

    /// Load the module's config file, falling back to defaults on any problem
    pub fn load_or_default(module_name: &str) -> Self {
        let path = match config_file_path(module_name) {
            Some(path) => path,
            None => return Self::default(),
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Resolves the root folder holding the database and backups
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
        }
    }

    /// Set the command-line override (priority 1)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Path of the TOML file consulted at priority 3
    pub fn config_file_path(&self) -> Option<PathBuf> {
        config_file_path(&self.module_name)
    }

    /// Resolve the root folder; never fails
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var("QMS_ROOT_FOLDER") {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("QMS_ROOT") {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = TomlConfig::load_or_default(&self.module_name).root_folder {
            return path;
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout and hands out derived paths
pub struct RootFolderInitializer {
    root_folder: PathBuf,
    backup_dir: Option<PathBuf>,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self {
            root_folder,
            backup_dir: None,
        }
    }

    /// Override the backup directory (defaults to `<root>/backups`)
    pub fn with_backup_dir(mut self, backup_dir: Option<PathBuf>) -> Self {
        self.backup_dir = backup_dir;
        self
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.root_folder.join(BACKUP_DIR_NAME))
    }

    /// Create the root folder and backup directory (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.backup_dir())?;
        Ok(())
    }
}

fn config_file_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("qms").join(format!("{}.toml", module_name)))
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/qms (or /var/lib/qms for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("qms"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/qms"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("qms"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/qms"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("qms"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\qms"))
    } else {
        PathBuf::from("./qms_data")
    }
}
