use std::{
    io::Write,
    path::{Path, PathBuf},
};

use clap::Parser;
use futures_util::StreamExt;
use provider_gateway::{
    CompletionRequest, Gateway, GatewayConfig, GatewayError, RequestMetadata, observability,
};

/// Config file used when `--config` is not given, if it exists.
const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

/// CLI arguments for the provider gateway
#[derive(Parser, Debug)]
#[command(version, about = "LLM provider gateway", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./gateway.toml if it exists,
    /// otherwise built-in defaults with no providers)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run a single-shot generation and print the text
    Generate(GenerateArgs),
    /// Run a streaming generation, printing fragments as they arrive
    Stream(GenerateArgs),
    /// Embed text and print the vector as JSON
    Embed {
        text: String,
        /// Client id used for metering
        #[arg(long)]
        client: Option<String>,
    },
    /// Show a client's quota position
    Quota {
        client: String,
        #[arg(long, default_value = "generate")]
        endpoint: String,
    },
    /// Print the candidate order a request would use
    Providers {
        /// Feature name used for routing-rule lookup
        #[arg(short, long)]
        feature: Option<String>,
    },
    /// Run database migrations and exit
    Migrate,
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    prompt: String,
    #[arg(short, long)]
    system: Option<String>,
    /// Feature name used for routing-rule lookup
    #[arg(short, long)]
    feature: Option<String>,
    /// Client id used for quota and metering
    #[arg(long)]
    client: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(short, long)]
    temperature: Option<f32>,
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Ask for JSON output
    #[arg(long)]
    json: bool,
    /// JSON schema file the output is checked against (implies --json)
    #[arg(long)]
    schema: Option<PathBuf>,
}

impl GenerateArgs {
    fn request(&self, config: &GatewayConfig) -> Result<CompletionRequest, String> {
        let mut request = CompletionRequest::new(self.prompt.clone())
            .with_temperature(self.temperature.unwrap_or(config.generation.default_temperature));
        if let Some(system) = &self.system {
            request = request.with_system_prompt(system.clone());
        }
        if let Some(feature) = &self.feature {
            request = request.with_feature(feature.clone());
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        if let Some(path) = &self.schema {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read schema {}: {}", path.display(), e))?;
            let schema = serde_json::from_str(&contents)
                .map_err(|e| format!("Schema {} is not valid JSON: {}", path.display(), e))?;
            request = request.json(Some(schema));
        } else if self.json {
            request = request.json(None);
        }
        Ok(request)
    }

    fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            client_id: self.client.clone(),
            user_id: self.user.clone(),
            endpoint: None,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(args.config.as_deref());

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        eprintln!("Failed to initialize metrics: {e}");
        std::process::exit(1);
    }

    match args.command {
        Command::Generate(args) => run_generate(&connect(&config).await, &config, &args).await,
        Command::Stream(args) => run_stream(&connect(&config).await, &config, &args).await,
        Command::Embed { text, client } => run_embed(&connect(&config).await, &text, client).await,
        Command::Quota { client, endpoint } => {
            run_quota(&connect(&config).await, &client, &endpoint).await
        }
        Command::Providers { feature } => {
            run_providers(&connect(&config).await, feature.as_deref()).await
        }
        Command::Migrate => run_migrate(&config).await,
    }
}

async fn connect(config: &GatewayConfig) -> Gateway {
    match Gateway::from_config(config).await {
        Ok(gateway) => gateway,
        Err(e) => fail(format!("Failed to start gateway: {e}")),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn load_config(explicit: Option<&Path>) -> GatewayConfig {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return GatewayConfig::default();
            }
            default
        }
    };

    match GatewayConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => fail(format!("Failed to load config from {}: {}", path.display(), e)),
    }
}

fn report_gateway_error(error: GatewayError) -> ! {
    match &error {
        GatewayError::QuotaExceeded(exceeded) => {
            tracing::info!(dimension = %exceeded.dimension, "Request refused by quota");
        }
        GatewayError::AllProvidersFailed { .. } | GatewayError::StreamInterrupted { .. } => {
            tracing::error!(error = %error, "Generation failed");
        }
        _ => {}
    }
    fail(error)
}

async fn run_generate(gateway: &Gateway, config: &GatewayConfig, args: &GenerateArgs) {
    let request = args.request(config).unwrap_or_else(|e| fail(e));

    match gateway.generate(&request, &args.metadata()).await {
        Ok(response) => {
            println!("{}", response.text);
            eprintln!(
                "[{} / {} via {}] {} prompt + {} completion tokens, {} ms",
                response.vendor,
                response.model,
                response.provider_id,
                response.usage.prompt_tokens,
                response.usage.completion_tokens,
                response.latency_ms
            );
            for warning in &response.schema_warnings {
                eprintln!("schema warning: {warning}");
            }
        }
        Err(e) => report_gateway_error(e),
    }
}

async fn run_stream(gateway: &Gateway, config: &GatewayConfig, args: &GenerateArgs) {
    let request = args.request(config).unwrap_or_else(|e| fail(e));

    let mut stream = match gateway.generate_streaming(request, args.metadata()).await {
        Ok(stream) => stream,
        Err(e) => report_gateway_error(e),
    };

    let mut stdout = std::io::stdout().lock();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                let written = stdout
                    .write_all(fragment.as_bytes())
                    .and_then(|()| stdout.flush());
                if written.is_err() {
                    // Reader went away (e.g. `| head`); abort upstream.
                    drop(stdout);
                    stream.cancel().await;
                    return;
                }
            }
            Err(e) => {
                let _ = writeln!(stdout);
                drop(stdout);
                report_gateway_error(e);
            }
        }
    }
    let _ = writeln!(stdout);
}

async fn run_embed(gateway: &Gateway, text: &str, client: Option<String>) {
    let metadata = RequestMetadata {
        client_id: client,
        ..Default::default()
    };
    match gateway.embed(text, &metadata).await {
        Ok(embedding) => match serde_json::to_string(&embedding) {
            Ok(json) => println!("{json}"),
            Err(e) => fail(e),
        },
        Err(e) => report_gateway_error(e),
    }
}

async fn run_quota(gateway: &Gateway, client: &str, endpoint: &str) {
    match gateway.quota_status(client, endpoint).await {
        Ok(status) => match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{json}"),
            Err(e) => fail(e),
        },
        Err(e) => fail(e),
    }
}

async fn run_providers(gateway: &Gateway, feature: Option<&str>) {
    match gateway.candidates(feature).await {
        Ok(candidates) => {
            for (position, provider) in candidates.iter().enumerate() {
                println!(
                    "{:>2}. {:<20} {:<10} {:<32} priority={}",
                    position + 1,
                    provider.id,
                    provider.vendor.as_str(),
                    provider.model,
                    provider.priority
                );
            }
        }
        Err(e) => fail(e),
    }
}

/// Run database migrations and exit.
///
/// Exits with code 0 on success, 1 on failure.
async fn run_migrate(config: &GatewayConfig) {
    match &config.database {
        #[cfg(feature = "database-sqlite")]
        provider_gateway::config::DatabaseConfig::Sqlite(sqlite) => {
            use provider_gateway::db::sqlite;

            tracing::info!(path = %sqlite.path, "Running database migrations");
            let mut connect_config = sqlite.clone();
            connect_config.run_migrations = false;

            let pool = match sqlite::connect(&connect_config).await {
                Ok(pool) => pool,
                Err(e) => fail(format!("Failed to connect to database: {e}")),
            };
            match sqlite::run_migrations(&pool).await {
                Ok(()) => tracing::info!("Database migrations completed successfully"),
                Err(e) => fail(format!("Database migrations failed: {e}")),
            }
        }
        provider_gateway::config::DatabaseConfig::Memory => {
            fail("Database is the in-memory store. Nothing to migrate.")
        }
    }
}
