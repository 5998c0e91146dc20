//! Server configuration.

use anyhow::{Context, Result};
use marbling_core::NormalizerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "MARBLING_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// ONNX export of the binary HIGH/LOW model.
    pub model_path: PathBuf,
    /// PWA assets; `index.html` is served at `/`.
    pub static_dir: PathBuf,
    /// Upload size limit in bytes.
    pub max_upload_bytes: usize,
    /// Accepted upload file extensions, lowercase.
    pub allowed_extensions: Vec<String>,
    /// CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Model runs at startup before serving; 0 disables warmup.
    pub warmup_runs: usize,
    pub normalizer: NormalizerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model_path: PathBuf::from("models/binary_high_low_model.onnx"),
            static_dir: PathBuf::from("static"),
            max_upload_bytes: 10 * 1024 * 1024, // 10MB
            allowed_extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
            cors_origins: vec![
                "http://localhost:5000".to_string(),
                "https://localhost:5000".to_string(),
            ],
            warmup_runs: 3,
            normalizer: NormalizerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, then the file named by `MARBLING_CONFIG`, then `MARBLING_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_toml_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no request could succeed under.
    pub fn validate(&self) -> Result<()> {
        self.normalizer.validate()?;
        if self.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be at least 1");
        }
        Ok(())
    }

    /// Apply `MARBLING_*` overrides. Unparseable numbers are ignored with a
    /// warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MARBLING_HOST") {
            self.host = host;
        }
        if let Some(port) = parse_var(&lookup, "MARBLING_PORT") {
            self.port = port;
        }
        if let Some(path) = lookup("MARBLING_MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("MARBLING_STATIC_DIR") {
            self.static_dir = PathBuf::from(dir);
        }
        if let Some(limit) = parse_var(&lookup, "MARBLING_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit;
        }
        if let Some(runs) = parse_var(&lookup, "MARBLING_WARMUP_RUNS") {
            self.warmup_runs = runs;
        }
        if let Some(origins) = lookup("MARBLING_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// True when `filename` ends in an allowed extension (case-insensitive).
    pub fn allows_file(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_upload_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.normalizer.target_width, 224);
        assert_eq!(config.normalizer.min_dimension, 32);
    }

    #[test]
    fn toml_overrides_only_given_keys() -> Result<()> {
        let config = ServerConfig::from_toml_str(
            r#"
            port = 8080
            model_path = "/srv/models/marbling.onnx"

            [normalizer]
            target_width = 256
            target_height = 256
            "#,
        )?;
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.model_path, PathBuf::from("/srv/models/marbling.onnx"));
        assert_eq!(config.normalizer.target_width, 256);
        assert_eq!(config.normalizer.min_dimension, 32);
        Ok(())
    }

    #[test]
    fn toml_with_wrong_types_is_rejected() {
        assert!(ServerConfig::from_toml_str("port = \"high\"").is_err());
    }

    #[test]
    fn zero_sized_normalizer_is_rejected() {
        let err = ServerConfig::from_toml_str(
            r#"
            [normalizer]
            target_width = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("target_width"), "{err:#}");
        assert!(ServerConfig::from_toml_str("max_upload_bytes = 0").is_err());
    }

    #[test]
    fn env_overrides_apply_and_bad_numbers_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MARBLING_HOST", "127.0.0.1"),
            ("MARBLING_PORT", "not-a-port"),
            ("MARBLING_MAX_UPLOAD_BYTES", "2048"),
            ("MARBLING_CORS_ORIGINS", "https://a.example, https://b.example,"),
        ]);
        let mut config = ServerConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_upload_bytes, 2048);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:5000");
    }

    #[test]
    fn file_extension_check_is_case_insensitive() {
        let config = ServerConfig::default();
        assert!(config.allows_file("loin.JPG"));
        assert!(config.allows_file("rib.eye.png"));
        assert!(!config.allows_file("scan.gif"));
        assert!(!config.allows_file("noextension"));
    }
}
