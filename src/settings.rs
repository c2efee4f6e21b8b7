use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

/// Runtime settings: optional `feed.toml` in the working directory, then
/// `FEED_*` environment variables. CLI flags override both.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Registry file; the embedded registry when unset.
    pub registry_path: Option<PathBuf>,
    /// Site root for relative media references.
    pub public_base_url: Option<String>,
    pub db_path: PathBuf,
    pub parallel_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            registry_path: None,
            public_base_url: None,
            db_path: PathBuf::from("data/crm.sqlite"),
            parallel_threshold: 64,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Settings, config::ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("feed").required(false))
                .add_source(Environment::with_prefix("FEED").try_parsing(true)),
        )
    }

    pub fn from_toml(src: &str) -> Result<Settings, config::ConfigError> {
        Self::from_builder(Config::builder().add_source(File::from_str(src, FileFormat::Toml)))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Settings, config::ConfigError> {
        builder.build()?.try_deserialize()
    }
}
