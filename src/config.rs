//! Server configuration: compiled-in defaults, layered with an optional TOML
//! file and then CLI overrides.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

/// Fully resolved, immutable server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub run_as_user: Option<String>,
    pub address: String,
    pub port: u16,
    pub permit_write: bool,
    pub enable_basic_auth: bool,
    pub credential: Option<String>,
    pub enable_random_url: bool,
    pub random_url_length: usize,
    pub index_file: Option<PathBuf>,
    pub enable_tls: bool,
    pub tls_crt_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub enable_tls_client_auth: bool,
    pub tls_ca_crt_file: Option<PathBuf>,
    pub title_format: String,
    pub enable_reconnect: bool,
    pub reconnect_time: u32,
    pub max_connection: u64,
    pub once: bool,
    pub timeout: u64,
    pub permit_arguments: bool,
    pub close_signal: i32,
    pub preferences: serde_json::Value,
    pub width: u16,
    pub height: u16,
    /// Base command: argv[0] plus any fixed arguments.
    pub command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_as_user: None,
            address: String::new(),
            port: 8080,
            permit_write: false,
            enable_basic_auth: false,
            credential: None,
            enable_random_url: false,
            random_url_length: 8,
            index_file: None,
            enable_tls: false,
            tls_crt_file: None,
            tls_key_file: None,
            enable_tls_client_auth: false,
            tls_ca_crt_file: None,
            title_format: "{Command} ({Hostname})".to_string(),
            enable_reconnect: false,
            reconnect_time: 10,
            max_connection: 0,
            once: false,
            timeout: 0,
            permit_arguments: false,
            close_signal: 1, // SIGHUP
            preferences: serde_json::Value::Object(Default::default()),
            width: 0,
            height: 0,
            command: vec!["login".to_string()],
        }
    }
}

/// Partial configuration as decoded from a TOML file; every field optional so
/// a file only needs to mention what it overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub run_as_user: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub permit_write: Option<bool>,
    pub enable_basic_auth: Option<bool>,
    pub credential: Option<String>,
    pub enable_random_url: Option<bool>,
    pub random_url_length: Option<usize>,
    pub index_file: Option<PathBuf>,
    pub enable_tls: Option<bool>,
    pub tls_crt_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub enable_tls_client_auth: Option<bool>,
    pub tls_ca_crt_file: Option<PathBuf>,
    pub title_format: Option<String>,
    pub enable_reconnect: Option<bool>,
    pub reconnect_time: Option<u32>,
    pub max_connection: Option<u64>,
    pub once: Option<bool>,
    pub timeout: Option<u64>,
    pub permit_arguments: Option<bool>,
    pub close_signal: Option<i32>,
    pub preferences: Option<serde_json::Value>,
    pub width: Option<u16>,
    pub height: Option<u16>,
}

impl ConfigFile {
    /// Parse a TOML config file from disk.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::FileParse(path.to_path_buf(), e.to_string()))
    }

    fn apply(self, base: &mut Config) {
        macro_rules! layer {
            ($field:ident) => {
                if let Some(v) = self.$field {
                    base.$field = v;
                }
            };
        }
        layer!(run_as_user);
        layer!(address);
        layer!(port);
        layer!(permit_write);
        layer!(enable_basic_auth);
        layer!(credential);
        layer!(enable_random_url);
        layer!(random_url_length);
        layer!(index_file);
        layer!(enable_tls);
        layer!(tls_crt_file);
        layer!(tls_key_file);
        layer!(enable_tls_client_auth);
        layer!(tls_ca_crt_file);
        layer!(title_format);
        layer!(enable_reconnect);
        layer!(reconnect_time);
        layer!(max_connection);
        layer!(once);
        layer!(timeout);
        layer!(permit_arguments);
        layer!(close_signal);
        layer!(preferences);
        layer!(width);
        layer!(height);
    }
}

/// Command-line flags. Only the options commonly overridden per-invocation
/// are exposed here; everything else lives in the config file.
#[derive(Debug, Parser)]
#[command(name = "gotty-rs", about = "Share a terminal over the web")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address.
    #[arg(short, long)]
    pub address: Option<String>,

    /// Listen port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Allow clients to write to the PTY.
    #[arg(short = 'w', long)]
    pub permit_write: bool,

    /// Accept exactly one session then stop listening.
    #[arg(long)]
    pub once: bool,

    /// Idle timeout in seconds (0 disables).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// The command to run, plus any fixed arguments.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl Config {
    /// Build a `Config` by layering compiled-in defaults, an optional config
    /// file, and CLI overrides, then validating the result.
    pub fn assemble(cli: Cli) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = &cli.config {
            let expanded = crate::net::expand_home(path);
            let file = ConfigFile::load(&expanded)?;
            file.apply(&mut config);
        }

        if let Some(addr) = cli.address {
            config.address = addr;
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if cli.permit_write {
            config.permit_write = true;
        }
        if cli.once {
            config.once = true;
        }
        if let Some(timeout) = cli.timeout {
            config.timeout = timeout;
        }
        if !cli.command.is_empty() {
            config.command = cli.command;
        }

        config.check()?;
        Ok(config)
    }

    /// Validate cross-field constraints. Pure: no I/O, no side effects.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.enable_tls_client_auth && !self.enable_tls {
            return Err(ConfigError::ClientAuthRequiresTls);
        }
        if self.enable_tls_client_auth && self.tls_ca_crt_file.is_none() {
            return Err(ConfigError::MissingClientCa);
        }
        if self.enable_tls && (self.tls_crt_file.is_none() || self.tls_key_file.is_none()) {
            return Err(ConfigError::MissingTlsFiles);
        }
        if self.enable_random_url && self.random_url_length == 0 {
            return Err(ConfigError::InvalidRandomUrlLength);
        }
        if (self.enable_basic_auth || self.credential.is_some()) && !self.credential_well_formed() {
            return Err(ConfigError::MalformedCredential);
        }
        if self.command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        if let Err(e) = crate::template::Template::compile(&self.title_format) {
            return Err(ConfigError::BadTitleFormat(e.to_string()));
        }
        Ok(())
    }

    fn credential_well_formed(&self) -> bool {
        match &self.credential {
            Some(c) => c.split_once(':').is_some(),
            None => !self.enable_basic_auth,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Log the resolved configuration at startup. The credential is never
    /// logged, only whether one is configured.
    pub fn log_startup(&self) {
        info!(
            address = %self.address,
            port = self.port,
            permit_write = self.permit_write,
            once = self.once,
            timeout = self.timeout,
            max_connection = self.max_connection,
            tls = self.enable_tls,
            "gotty-rs configuration resolved"
        );
        if self.credential.is_some() {
            info!("authentication: enabled (credential configured)");
        } else {
            warn!("authentication: disabled (no credential configured)");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    FileRead(PathBuf, String),
    #[error("failed to parse config file {0}: {1}")]
    FileParse(PathBuf, String),
    #[error("enable_tls_client_auth requires enable_tls")]
    ClientAuthRequiresTls,
    #[error("enable_tls_client_auth requires tls_ca_crt_file")]
    MissingClientCa,
    #[error("enable_tls requires tls_crt_file and tls_key_file")]
    MissingTlsFiles,
    #[error("random_url_length must be > 0 when enable_random_url is set")]
    InvalidRandomUrlLength,
    #[error("credential must be in \"user:pass\" form")]
    MalformedCredential,
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("invalid title_format: {0}")]
    BadTitleFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_check() {
        assert!(Config::default().check().is_ok());
    }

    #[test]
    fn client_auth_without_tls_rejected() {
        let mut config = Config::default();
        config.enable_tls_client_auth = true;
        config.tls_ca_crt_file = Some("/tmp/ca.pem".into());
        assert!(matches!(
            config.check(),
            Err(ConfigError::ClientAuthRequiresTls)
        ));
    }

    #[test]
    fn tls_without_cert_files_rejected() {
        let mut config = Config::default();
        config.enable_tls = true;
        assert!(matches!(config.check(), Err(ConfigError::MissingTlsFiles)));
    }

    #[test]
    fn random_url_zero_length_rejected() {
        let mut config = Config::default();
        config.enable_random_url = true;
        config.random_url_length = 0;
        assert!(matches!(
            config.check(),
            Err(ConfigError::InvalidRandomUrlLength)
        ));
    }

    #[test]
    fn malformed_credential_rejected() {
        let mut config = Config::default();
        config.enable_basic_auth = true;
        config.credential = Some("no-colon-here".to_string());
        assert!(matches!(config.check(), Err(ConfigError::MalformedCredential)));
    }

    #[test]
    fn well_formed_credential_accepted() {
        let mut config = Config::default();
        config.enable_basic_auth = true;
        config.credential = Some("user:pass".to_string());
        assert!(config.check().is_ok());
    }

    #[test]
    fn empty_command_rejected() {
        let mut config = Config::default();
        config.command.clear();
        assert!(matches!(config.check(), Err(ConfigError::EmptyCommand)));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let toml_src = r#"
            port = 9999
            once = true
            title_format = "custom"
        "#;
        let file: ConfigFile = toml::from_str(toml_src).unwrap();
        let mut config = Config::default();
        file.apply(&mut config);
        assert_eq!(config.port, 9999);
        assert!(config.once);
        assert_eq!(config.title_format, "custom");
        // Untouched fields keep their defaults.
        assert_eq!(config.max_connection, 0);
    }

    #[test]
    fn check_is_pure() {
        let config = Config::default();
        let r1 = config.check();
        let r2 = config.check();
        assert_eq!(r1.is_ok(), r2.is_ok());
    }
}
