#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{
    ChunkingSettings, CompletionConfig, Config, ConfigError, EmbeddingConfig, StoreBackend,
    StoreConfig,
};

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 ragpipe Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Embedding Service").bold().yellow());
    eprintln!("Configure the Ollama-compatible service that generates embeddings.");
    eprintln!();

    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Completion Service").bold().yellow());
    eprintln!("Configure the service that answers questions from retrieved context.");
    eprintln!();

    configure_completion(&mut config.completion, &config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Vector Store").bold().yellow());
    eprintln!();

    configure_store(&mut config.store)?;

    eprintln!();
    eprintln!("{}", style("Chunking").bold().yellow());
    eprintln!();

    configure_chunking(&mut config.chunking)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if probe_service(
        &config.embedding.protocol,
        &config.embedding.host,
        config.embedding.port,
    ) {
        eprintln!("{}", style("✓ Embedding service reachable!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not reach the embedding service").yellow()
        );
        eprintln!("You can continue, but make sure the service is running before ingesting.");
    }

    let completion_differs = config.completion.protocol != config.embedding.protocol
        || config.completion.host != config.embedding.host
        || config.completion.port != config.embedding.port;

    if completion_differs {
        if probe_service(
            &config.completion.protocol,
            &config.completion.host,
            config.completion.port,
        ) {
            eprintln!("{}", style("✓ Completion service reachable!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not reach the completion service").yellow()
            );
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());

        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Service:").bold().yellow());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    match config.embedding.base_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Completion Service:").bold().yellow());
    eprintln!("  Model: {}", style(&config.completion.model).cyan());
    eprintln!(
        "  Temperature: {}",
        style(config.completion.temperature).cyan()
    );
    eprintln!("  Max Tokens: {}", style(config.completion.max_tokens).cyan());
    eprintln!(
        "  Context Budget: {}",
        style(config.completion.max_context_tokens).cyan()
    );
    match config.completion.base_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    eprintln!("  Scan Limit: {}", style(config.store.scan_limit).cyan());
    eprintln!(
        "  Upsert Batch Size: {}",
        style(config.store.upsert_batch_size).cyan()
    );
    match config.store.backend {
        StoreBackend::Sqlite => {
            eprintln!("  Data: {}", style(config.database_path().display()).cyan());
        }
        StoreBackend::Lance => {
            eprintln!(
                "  Data: {}",
                style(config.vector_database_path().display()).cyan()
            );
        }
        StoreBackend::Memory => {}
    }

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    if config.chunking.auto_size {
        eprintln!(
            "  Mode: {}",
            style("auto (scaled to document length)").cyan()
        );
    } else {
        eprintln!("  Chunk Size: {}", style(config.chunking.chunk_size).cyan());
        eprintln!("  Overlap: {}", style(config.chunking.overlap).cyan());
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config() -> Result<Config> {
    let config = Config::load_default().or_else(|_| -> Result<Config> {
        let dir = Config::default_dir().context("Failed to locate config directory")?;
        Ok(Config {
            base_dir: dir,
            ..Config::default()
        })
    })?;

    if config.config_file_path().exists() {
        eprintln!("{}", style("Found existing configuration.").green());
    } else {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
    }

    Ok(config)
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == embedding.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Embedding service protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Embedding service host")
        .default(embedding.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = EmbeddingConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..EmbeddingConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Embedding service port")
        .default(embedding.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: usize = Input::new()
        .with_prompt("Embedding dimension")
        .default(embedding.dimension)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    if dimension != embedding.dimension {
        eprintln!(
            "{}",
            style("Changing the dimension invalidates previously indexed vectors.").dim()
        );
    }

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding requests")
        .default(embedding.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    embedding.set_protocol(protocol)?;
    embedding.set_host(host)?;
    embedding.set_port(port)?;
    embedding.set_model(model)?;
    embedding.set_dimension(dimension)?;
    embedding.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_completion(
    completion: &mut CompletionConfig,
    embedding: &EmbeddingConfig,
) -> Result<()> {
    let same_service = Confirm::new()
        .with_prompt("Use the same service for completions?")
        .default(true)
        .interact()?;

    if same_service {
        completion.protocol = embedding.protocol.clone();
        completion.host = embedding.host.clone();
        completion.port = embedding.port;
    } else {
        let protocols = &["http", "https"];
        let default_index = protocols
            .iter()
            .position(|&p| p == completion.protocol)
            .unwrap_or(0);

        let protocol_index = Select::new()
            .with_prompt("Completion service protocol")
            .default(default_index)
            .items(protocols)
            .interact()?;

        completion.protocol = protocols[protocol_index].to_string();

        completion.host = Input::new()
            .with_prompt("Completion service host")
            .default(completion.host.clone())
            .validate_with(|input: &String| -> Result<(), &str> {
                if input.trim().is_empty() {
                    Err("Host cannot be empty")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;

        completion.port = Input::new()
            .with_prompt("Completion service port")
            .default(completion.port)
            .validate_with(|input: &u16| -> Result<(), &str> {
                if *input == 0 {
                    Err("Port must be greater than 0")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;
    }

    completion.model = Input::new()
        .with_prompt("Completion model")
        .default(completion.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    completion.temperature = Input::new()
        .with_prompt("Sampling temperature")
        .default(completion.temperature)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=2.0).contains(input) {
                Ok(())
            } else {
                Err("Temperature must be between 0.0 and 2.0")
            }
        })
        .interact_text()?;

    completion.max_tokens = Input::new()
        .with_prompt("Maximum tokens per answer")
        .default(completion.max_tokens)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Token limit must be greater than 0")
            } else if *input > 131_072 {
                Err("Token limit must be 131072 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    completion.max_context_tokens = Input::new()
        .with_prompt("Context budget in tokens")
        .default(completion.max_context_tokens)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Token limit must be greater than 0")
            } else if *input > 131_072 {
                Err("Token limit must be 131072 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    completion.validate()?;

    Ok(())
}

fn configure_store(store: &mut StoreConfig) -> Result<()> {
    let backends = &["memory", "sqlite", "lance"];
    let current = store.backend.to_string();
    let default_index = backends.iter().position(|&b| b == current).unwrap_or(2);

    let backend_index = Select::new()
        .with_prompt("Vector store backend")
        .default(default_index)
        .items(backends)
        .interact()?;

    store.backend = backends[backend_index].parse()?;

    if store.backend == StoreBackend::Memory {
        eprintln!(
            "{}",
            style("The memory backend keeps vectors only for the life of the process.").dim()
        );
    }

    Ok(())
}

fn configure_chunking(chunking: &mut ChunkingSettings) -> Result<()> {
    chunking.auto_size = Confirm::new()
        .with_prompt("Scale chunk size with document length?")
        .default(chunking.auto_size)
        .interact()?;

    if chunking.auto_size {
        return Ok(());
    }

    chunking.chunk_size = Input::new()
        .with_prompt("Chunk size in characters")
        .default(chunking.chunk_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (50..=8192).contains(input) {
                Ok(())
            } else {
                Err("Chunk size must be between 50 and 8192")
            }
        })
        .interact_text()?;

    let chunk_size = chunking.chunk_size;
    chunking.overlap = Input::new()
        .with_prompt("Overlap in characters")
        .default(chunking.overlap.min(chunk_size - 1))
        .validate_with(move |input: &usize| -> Result<(), String> {
            if *input < chunk_size {
                Ok(())
            } else {
                Err(format!(
                    "Overlap must be smaller than the chunk size ({chunk_size})"
                ))
            }
        })
        .interact_text()?;

    Ok(())
}

fn probe_service(protocol: &str, host: &str, port: u16) -> bool {
    let url = format!("{protocol}://{host}:{port}/api/version");

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
