use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "POTATO_SERVE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub limits: LimitsConfig,
    pub cors: CorsConfig,
    /// Defaults to the potato catalog only when the key is absent.
    pub classes: Vec<ClassConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            classes: default_classes(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Worker thread count; actix picks one per core when unset.
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: None,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/potatoes.onnx"),
            image_width: 256,
            image_height: 256,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_upload_bytes: usize,
    /// Largest accepted width or height of a decoded image.
    pub max_image_dimension: u32,
    /// Upper bound on memory a single decode may allocate.
    pub max_decode_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            max_image_dimension: 8192,
            max_decode_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ClassConfig {
    pub name: String,
    #[serde(default)]
    pub advice: Option<String>,
}

impl ClassConfig {
    fn new(name: &str, advice: &str) -> Self {
        Self {
            name: name.to_string(),
            advice: Some(advice.to_string()),
        }
    }
}

pub fn default_classes() -> Vec<ClassConfig> {
    vec![
        ClassConfig::new(
            "Early Blight",
            "Apply copper-based fungicides weekly. Remove infected leaves promptly.",
        ),
        ClassConfig::new(
            "Late Blight",
            "URGENT: Remove and destroy infected plants. Use fungicides with mancozeb.",
        ),
        ClassConfig::new(
            "Healthy",
            "No treatment needed. Maintain proper watering and fertilization.",
        ),
    ]
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl AppConfig {
    /// Resolves the config file from `POTATO_SERVE_CONFIG`, then `./config.yaml`,
    /// falling back to built-in defaults when neither is present.
    pub fn load() -> Result<(Self, ConfigSource), ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            return Ok((Self::from_file(&path)?, ConfigSource::File(path)));
        }

        let path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if path.exists() {
            return Ok((Self::from_file(&path)?, ConfigSource::File(path)));
        }

        let config = Self::default();
        config.validate()?;
        Ok((config, ConfigSource::Defaults))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.image_width == 0 || self.model.image_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "image size must be non-zero, got {}x{}",
                self.model.image_width, self.model.image_height
            )));
        }
        if self.limits.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_image_dimension == 0 || self.limits.max_decode_bytes == 0 {
            return Err(ConfigError::Invalid(
                "image decode limits must be greater than zero".to_string(),
            ));
        }
        if self.classes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one class must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for class in &self.classes {
            if class.name.trim().is_empty() {
                return Err(ConfigError::Invalid("class names must not be empty".to_string()));
            }
            if !seen.insert(class.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate class name: {}",
                    class.name
                )));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}
