//! ScriptHub CLI
//!
//! Command-line interface for running the delivery server and working with
//! protected scripts locally.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scripthub_core::keygen::generate_key_value;
use scripthub_core::{LocalTransform, TransformOptions};
use scripthub_server::{config::default_config_path, run_server, ServerConfig};

#[derive(Parser)]
#[command(name = "scripthub")]
#[command(about = "Protected Luau script hosting and delivery")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/scripthub/scripthub.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the delivery server
    Serve {
        /// Port to listen on (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides the configuration)
        #[arg(long)]
        host: Option<String>,
    },

    /// Query a running server's health endpoint
    Status {
        /// Server base URL (default: from configuration)
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Apply the local transform to a Luau file
    Obfuscate {
        /// Input file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the integrity prologue
        #[arg(long)]
        no_anti_tamper: bool,

        /// Skip the source-dump prologue
        #[arg(long)]
        no_anti_dump: bool,
    },

    /// Print freshly generated key values
    Keygen {
        /// Number of keys
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scripthub=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { port, host } => {
            cmd_serve(config_path, port, host).await?;
        }
        Commands::Status { url } => {
            cmd_status(config_path, url).await?;
        }
        Commands::Obfuscate {
            input,
            output,
            no_anti_tamper,
            no_anti_dump,
        } => {
            let options = TransformOptions {
                anti_tamper: !no_anti_tamper,
                anti_dump: !no_anti_dump,
                anti_hook: true,
            };
            cmd_obfuscate(config_path, &input, output.as_deref(), options)?;
        }
        Commands::Keygen { count } => {
            cmd_keygen(count);
        }
        Commands::CheckConfig => {
            cmd_check_config(config_path)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    ServerConfig::load(path).context("Failed to load configuration")
}

/// Start the delivery server
async fn cmd_serve(config_path: Option<&Path>, port: Option<u16>, host: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(host) = host {
        config.host = host;
    }

    println!("Starting ScriptHub server on {}...", config.listen_addr());
    run_server(config).await
}

/// Show status
async fn cmd_status(config_path: Option<&Path>, url: Option<String>) -> Result<()> {
    let base = match url {
        Some(url) => url,
        None => format!("http://{}", load_config(config_path)?.listen_addr()),
    };
    let client = reqwest::Client::new();

    match client.get(format!("{}/health", base.trim_end_matches('/'))).send().await {
        Ok(response) => {
            let health: serde_json::Value = response.json().await?;
            println!("Server status: {}", serde_json::to_string_pretty(&health)?);
        }
        Err(_) => {
            println!("Server is not running at {}.", base);
            println!("Start it with: scripthub serve");
        }
    }

    Ok(())
}

/// Run the local transform over a file
fn cmd_obfuscate(
    config_path: Option<&Path>,
    input: &Path,
    output: Option<&Path>,
    options: TransformOptions,
) -> Result<()> {
    let config = load_config(config_path)?;
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let transform = LocalTransform::new(config.fallback, config.brand);
    let result = transform.apply(&source, &options);

    match output {
        Some(path) => {
            std::fs::write(path, &result.code)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} ({} bytes)", path.display(), result.code.len());
        }
        None => println!("{}", result.code),
    }
    Ok(())
}

fn cmd_keygen(count: usize) {
    for _ in 0..count {
        println!("{}", generate_key_value(chrono::Utc::now()));
    }
}

fn cmd_check_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    match config_path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) if path.exists() => println!("Configuration: {}", path.display()),
        _ => println!("Configuration: built-in defaults"),
    }
    println!("  listen:   {}", config.listen_addr());
    println!("  brand:    {}", config.brand);
    println!("  store:    {:?}", config.store.backend);
    println!(
        "  obfuscator: {} ({})",
        config.obfuscator.base_url,
        if config.obfuscator.api_key.is_some() {
            "api key set"
        } else {
            "local transform only"
        }
    );
    match &config.browser_redirect {
        Some(url) => println!("  browsers: redirected to {}", url),
        None => println!("  browsers: access-denied page"),
    }
    Ok(())
}
