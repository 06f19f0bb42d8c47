//! Tests for configuration and root folder resolution
//!
//! Uses serial_test to prevent environment variable races: every test that
//! touches QMS_ROOT_FOLDER or QMS_ROOT is marked #[serial].

use qms_common::config::{
    CompiledDefaults, LoggingConfig, RootFolderInitializer, RootFolderResolver, ServerConfig,
    TomlConfig, DEFAULT_PORT,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var("QMS_ROOT_FOLDER");
    env::remove_var("QMS_ROOT");
}

#[test]
fn test_compiled_defaults() {
    let defaults = CompiledDefaults::for_current_platform();
    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.port, DEFAULT_PORT);
    assert_eq!(defaults.host, "127.0.0.1");
    assert_eq!(defaults.log_level, "info");
}

#[test]
#[serial]
fn test_cli_arg_takes_precedence() {
    env::set_var("QMS_ROOT_FOLDER", "/tmp/from-env");

    let resolver = RootFolderResolver::new("qms-test")
        .with_cli_arg(Some(PathBuf::from("/tmp/from-cli")));
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/from-cli"));

    clear_env();
}

#[test]
#[serial]
fn test_env_var_root_folder() {
    clear_env();
    env::set_var("QMS_ROOT_FOLDER", "/tmp/qms-env-root");

    let resolver = RootFolderResolver::new("qms-test");
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/qms-env-root"));

    clear_env();
}

#[test]
#[serial]
fn test_root_folder_env_beats_root_env() {
    clear_env();
    env::set_var("QMS_ROOT_FOLDER", "/tmp/primary");
    env::set_var("QMS_ROOT", "/tmp/secondary");

    let resolver = RootFolderResolver::new("qms-test");
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/primary"));

    env::remove_var("QMS_ROOT_FOLDER");
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/secondary"));

    clear_env();
}

#[test]
#[serial]
fn test_missing_config_file_falls_back_to_default() {
    clear_env();

    let resolver = RootFolderResolver::new("nonexistent-qms-module-12345");
    let root_folder = resolver.resolve();

    assert!(!root_folder.as_os_str().is_empty());
}

#[test]
fn test_module_name_in_config_path() {
    let resolver = RootFolderResolver::new("qms-server");
    if let Some(path) = resolver.config_file_path() {
        assert!(path.ends_with("qms/qms-server.toml"));
    }
}

#[test]
fn test_initializer_creates_directories() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("a").join("b");

    let initializer = RootFolderInitializer::new(root.clone());
    assert!(!initializer.database_exists());

    initializer.ensure_directory_exists().unwrap();
    // Idempotent
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert!(initializer.backup_dir().is_dir());
    assert_eq!(initializer.database_path(), root.join("qms.db"));
}

#[test]
fn test_toml_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("qms-server.toml");
    std::fs::write(
        &path,
        r#"
root_folder = "/srv/qms"

[server]
host = "0.0.0.0"
port = 8443

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = TomlConfig::load(&path).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/qms")));
    assert_eq!(config.server.host.as_deref(), Some("0.0.0.0"));
    assert_eq!(config.server.port, Some(8443));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(
        config.logging.filter_directives(),
        "qms_server=debug,qms_common=debug,tower_http=debug"
    );
    assert!(config.backup_dir.is_none());
}

#[test]
fn test_default_logging_is_info() {
    let config = TomlConfig::default();
    assert_eq!(
        config.logging.filter_directives(),
        "qms_server=info,qms_common=info,tower_http=info"
    );

    let config: TomlConfig = toml::from_str("[logging]\nlevel = \" WARN \"\n").unwrap();
    assert_eq!(
        config.logging.filter_directives(),
        "qms_server=warn,qms_common=warn,tower_http=warn"
    );
}

#[test]
fn test_malformed_toml_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "port = [unterminated").unwrap();

    let err = TomlConfig::load(&path).unwrap_err();
    assert!(matches!(err, qms_common::Error::Config(_)));
}

#[test]
fn test_toml_roundtrip() {
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/data/qms")),
        backup_dir: Some(PathBuf::from("/backups")),
        server: ServerConfig {
            host: Some("127.0.0.1".to_string()),
            port: Some(5780),
        },
        logging: LoggingConfig::default(),
    };

    let toml_str = toml::to_string(&config).unwrap();
    let parsed: TomlConfig = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed, config);
}
