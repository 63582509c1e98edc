// Configuration management module
// TOML settings, validation, and the interactive setup flow

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ChunkingSettings, CompletionConfig, Config, ConfigError, EmbeddingConfig, StoreBackend,
    StoreConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
