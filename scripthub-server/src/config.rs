//! Server configuration
//!
//! Read once at startup from a TOML file, then overridden by `SCRIPTHUB_*`
//! environment variables. The resulting struct is passed explicitly to the
//! engine and the adapters.

use std::path::{Path, PathBuf};

use scripthub_core::ObfuscatorConfig;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "scripthub.toml";
pub const ENV_PREFIX: &str = "SCRIPTHUB_";

pub const DEFAULT_OBFUSCATOR_URL: &str = "https://api.luaobfuscator.com/v1/obfuscator";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Name shown in protected wrappers and diagnostics
    pub brand: String,

    /// Base URL browsers are redirected to; an HTML page is served when unset
    pub browser_redirect: Option<String>,

    pub obfuscator: ObfuscatorApiConfig,

    /// Local fallback transform settings
    pub fallback: ObfuscatorConfig,

    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 44780,
            brand: "ScriptHub".to_string(),
            browser_redirect: None,
            obfuscator: ObfuscatorApiConfig::default(),
            fallback: ObfuscatorConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Remote obfuscation service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObfuscatorApiConfig {
    pub base_url: String,
    /// Without a key every transform uses the local fallback
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Total attempts per transform, at least 1
    pub attempts: u32,
    /// Options object posted to the obfuscate step
    pub options: serde_json::Value,
}

impl Default for ObfuscatorApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OBFUSCATOR_URL.to_string(),
            api_key: None,
            timeout_secs: 20,
            attempts: 2,
            options: default_obfuscator_options(),
        }
    }
}

/// Options accepted by the target runtime
pub fn default_obfuscator_options() -> serde_json::Value {
    serde_json::json!({
        "MinifiyAll": true,
        "CustomPlugins": {
            "EncryptStrings": [90],
            "ControlFlowFlattenV1AllBlocks": [50],
            "Minifier": true,
            "SwizzleLookups": [90],
            "MutateAllLiterals": [30]
        }
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Rest,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "rest" => Ok(StoreBackend::Rest),
            other => Err(ConfigError::Invalid(format!("unknown store backend '{}'", other))),
        }
    }
}

/// Record store connection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Project URL of the REST backend
    pub url: Option<String>,
    /// Service key sent as `apikey` and bearer token
    pub service_key: Option<String>,
}

/// Default location: `<config dir>/scripthub/scripthub.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scripthub").join(CONFIG_FILE_NAME))
}

impl ServerConfig {
    /// Load from `path`, or from the default location when it exists, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply `SCRIPTHUB_*` variables. Unknown names are ignored; unparseable
    /// values are skipped with a warning.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(field) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field {
                "HOST" => self.host = value,
                "PORT" => match value.parse() {
                    Ok(port) => self.port = port,
                    Err(_) => tracing::warn!("Ignoring invalid {}PORT '{}'", ENV_PREFIX, value),
                },
                "BRAND" => self.brand = value,
                "BROWSER_REDIRECT" => self.browser_redirect = non_empty(value),
                "OBFUSCATOR_URL" => self.obfuscator.base_url = value,
                "OBFUSCATOR_API_KEY" => self.obfuscator.api_key = non_empty(value),
                "OBFUSCATOR_TIMEOUT_SECS" => match value.parse() {
                    Ok(secs) => self.obfuscator.timeout_secs = secs,
                    Err(_) => tracing::warn!("Ignoring invalid obfuscator timeout '{}'", value),
                },
                "STORE" => match value.parse() {
                    Ok(backend) => self.store.backend = backend,
                    Err(e) => tracing::warn!("Ignoring {}STORE: {}", ENV_PREFIX, e),
                },
                "STORE_URL" => self.store.url = non_empty(value),
                "STORE_SERVICE_KEY" => self.store.service_key = non_empty(value),
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brand.trim().is_empty() {
            return Err(ConfigError::Invalid("brand cannot be empty".to_string()));
        }
        if self.obfuscator.attempts == 0 {
            return Err(ConfigError::Invalid("obfuscator.attempts must be at least 1".to_string()));
        }
        if self.obfuscator.timeout_secs == 0 {
            return Err(ConfigError::Invalid("obfuscator.timeout_secs must be positive".to_string()));
        }
        if self.store.backend == StoreBackend::Rest
            && (self.store.url.is_none() || self.store.service_key.is_none())
        {
            return Err(ConfigError::Invalid(
                "rest store requires store.url and store.service_key".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
