//! Gateway configuration
//!
//! Values come from an optional YAML file and are then overridden by
//! command-line flags or their environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use warden_common::telemetry::LogFormat;
use warden_token::ADMIN_TOKEN_PATH;

/// Warden - access-control gateway for multi-tenant Kubernetes environments
#[derive(Parser, Debug, Default)]
#[command(name = "warden", version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short = 'c', long = "config", env = "WARDEN_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "WARDEN_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// TLS certificate PEM file
    #[arg(long, env = "WARDEN_TLS_CERT")]
    pub tls_cert_path: Option<PathBuf>,

    /// TLS private key PEM file
    #[arg(long, env = "WARDEN_TLS_KEY")]
    pub tls_key_path: Option<PathBuf>,

    /// Secret used to sign and validate platform tokens
    #[arg(long, env = "WARDEN_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// File holding the cluster-admin token
    #[arg(long, env = "WARDEN_ADMIN_TOKEN_PATH")]
    pub admin_token_path: Option<PathBuf>,

    /// Refuse to start without the admin token
    #[arg(long, env = "WARDEN_USE_ADMIN_TOKEN")]
    pub use_admin_token: Option<bool>,

    /// PKCS#8 ECDSA P-256 key used to sign agent requests
    #[arg(long, env = "WARDEN_SIGNATURE_KEY")]
    pub signature_key_path: Option<PathBuf>,

    /// Policy store snapshot (YAML)
    #[arg(long, env = "WARDEN_STORE")]
    pub store_path: Option<PathBuf>,

    /// Seconds before an unused edge tunnel is marked idle
    #[arg(long, env = "WARDEN_TUNNEL_KEEPALIVE_SECS")]
    pub tunnel_keepalive_secs: Option<u64>,

    /// Address agent and edge environments are reached through
    #[arg(long, env = "WARDEN_INTERNAL_URL")]
    pub internal_url: Option<String>,

    /// Log output format (text or json)
    #[arg(long, env = "WARDEN_LOG_FORMAT", value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    match value {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{}'", other)),
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9443))
}

fn default_admin_token_path() -> PathBuf {
    PathBuf::from(ADMIN_TOKEN_PATH)
}

fn default_tunnel_keepalive_secs() -> u64 {
    300
}

fn default_token_validity_secs() -> u64 {
    8 * 60 * 60
}

fn default_internal_url() -> String {
    "https://127.0.0.1:9443".to_string()
}

/// Resolved gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// TLS certificate PEM file
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    /// TLS private key PEM file
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
    /// Platform token secret
    #[serde(default)]
    pub jwt_secret: String,
    /// Platform token validity
    #[serde(default = "default_token_validity_secs")]
    pub token_validity_secs: u64,
    /// Admin token file
    #[serde(default = "default_admin_token_path")]
    pub admin_token_path: PathBuf,
    /// Fail startup when the admin token cannot be read
    #[serde(default)]
    pub use_admin_token: bool,
    /// Agent signing key; generated when absent
    #[serde(default)]
    pub signature_key_path: Option<PathBuf>,
    /// Policy store snapshot; empty store when absent
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Edge tunnel keep-alive
    #[serde(default = "default_tunnel_keepalive_secs")]
    pub tunnel_keepalive_secs: u64,
    /// Address agent and edge environments are reached through
    #[serde(default = "default_internal_url")]
    pub internal_url: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tls_cert_path: None,
            tls_key_path: None,
            jwt_secret: String::new(),
            token_validity_secs: default_token_validity_secs(),
            admin_token_path: default_admin_token_path(),
            use_admin_token: false,
            signature_key_path: None,
            store_path: None,
            tunnel_keepalive_secs: default_tunnel_keepalive_secs(),
            internal_url: default_internal_url(),
            log_format: LogFormat::default(),
        }
    }
}

impl GatewayConfig {
    /// Load the file named by `cli`, apply overrides and validate
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(cli);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(addr) = cli.listen_addr {
            self.listen_addr = addr;
        }
        if let Some(path) = &cli.tls_cert_path {
            self.tls_cert_path = Some(path.clone());
        }
        if let Some(path) = &cli.tls_key_path {
            self.tls_key_path = Some(path.clone());
        }
        if let Some(secret) = &cli.jwt_secret {
            self.jwt_secret = secret.clone();
        }
        if let Some(path) = &cli.admin_token_path {
            self.admin_token_path = path.clone();
        }
        if let Some(required) = cli.use_admin_token {
            self.use_admin_token = required;
        }
        if let Some(path) = &cli.signature_key_path {
            self.signature_key_path = Some(path.clone());
        }
        if let Some(path) = &cli.store_path {
            self.store_path = Some(path.clone());
        }
        if let Some(secs) = cli.tunnel_keepalive_secs {
            self.tunnel_keepalive_secs = secs;
        }
        if let Some(url) = &cli.internal_url {
            self.internal_url = url.clone();
        }
        if let Some(format) = cli.log_format {
            self.log_format = format;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("jwt_secret must be set");
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            bail!("tls_cert_path and tls_key_path must be set together");
        }
        if self.tunnel_keepalive_secs == 0 {
            bail!("tunnel_keepalive_secs must be positive");
        }
        if self.token_validity_secs < 60 {
            bail!("token_validity_secs must be at least 60");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_from_minimal_file() {
        let file = write_config("jwt_secret: s3cret\n");
        let cli = Cli {
            config_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let config = GatewayConfig::load(&cli).unwrap();
        assert_eq!(config.listen_addr, default_listen_addr());
        assert_eq!(config.admin_token_path, PathBuf::from(ADMIN_TOKEN_PATH));
        assert_eq!(config.tunnel_keepalive_secs, 300);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(!config.use_admin_token);
    }

    #[test]
    fn test_flags_override_file() {
        let file = write_config(
            "jwt_secret: from-file\nlisten_addr: 127.0.0.1:8443\nlog_format: json\n",
        );
        let cli = Cli {
            config_file: Some(file.path().to_path_buf()),
            jwt_secret: Some("from-flag".into()),
            tunnel_keepalive_secs: Some(30),
            ..Default::default()
        };

        let config = GatewayConfig::load(&cli).unwrap();
        assert_eq!(config.jwt_secret, "from-flag");
        assert_eq!(config.listen_addr, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.tunnel_keepalive_secs, 30);
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        let err = GatewayConfig::load(&Cli::default()).unwrap_err();
        assert!(err.to_string().contains("jwt_secret"));
    }

    #[test]
    fn test_tls_paths_must_be_paired() {
        let cli = Cli {
            jwt_secret: Some("s3cret".into()),
            tls_cert_path: Some("/etc/warden/tls.crt".into()),
            ..Default::default()
        };
        let err = GatewayConfig::load(&cli).unwrap_err();
        assert!(err.to_string().contains("together"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let file = write_config("jwt_secret: s3cret\nlisten: 0.0.0.0:1\n");
        let cli = Cli {
            config_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(GatewayConfig::load(&cli).is_err());
    }

    #[test]
    fn test_log_format_parser() {
        assert_eq!(parse_log_format("json").unwrap(), LogFormat::Json);
        assert!(parse_log_format("xml").is_err());
    }
}
