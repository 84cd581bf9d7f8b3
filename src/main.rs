use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use gatehouse::{
    adapters::{self, HttpClientAdapter, HttpHandler},
    config::{GatewayConfigValidator, loader::load_config},
    core::GatewayService,
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML, YAML, JSON or INI); built-in defaults when omitted
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Upstream base URI substituted for `${httpbin}` in route URIs
    #[clap(long, global = true)]
    httpbin: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate configuration and exit
    Validate,
    /// Write a configuration file with the default routes
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "gatehouse.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => {
            validate_config_command(args.config.as_deref(), args.httpbin.as_deref()).await
        }
        Commands::Init { output } => init_config_command(&output).await,
        Commands::Serve => serve_command(args.config.as_deref(), args.httpbin.as_deref()).await,
    }
}

async fn serve_command(config_path: Option<&str>, httpbin: Option<&str>) -> Result<()> {
    let config = load_config(config_path, httpbin)
        .await
        .wrap_err("Failed to load configuration")?;

    tracing_setup::init_tracing(&config.log)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    match config_path {
        Some(path) => tracing::info!("Loaded configuration from {path}"),
        None => tracing::info!("No configuration file given, using built-in defaults"),
    }

    GatewayConfigValidator::validate(&config).wrap_err("Invalid configuration")?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    tracing::info!(httpbin = %config.httpbin, "Upstream base URI");

    let gateway_service = Arc::new(GatewayService::new(Arc::new(config))?);
    let http_client = Arc::new(HttpClientAdapter::new()?);
    let http_handler = Arc::new(HttpHandler::new(gateway_service, http_client));

    // Create graceful shutdown manager
    let graceful_shutdown = Arc::new(GracefulShutdown::new());

    // Start signal handler for graceful shutdown
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    println!("Gatehouse listening on {addr}");

    adapters::serve(listener, adapters::router(http_handler), graceful_shutdown).await
}

/// Validate configuration and exit
async fn validate_config_command(config_path: Option<&str>, httpbin: Option<&str>) -> Result<()> {
    match config_path {
        Some(path) => {
            println!("🔍 Validating configuration file: {path}");
            if !Path::new(path).exists() {
                eprintln!("❌ Error: Configuration file '{path}' not found");
                std::process::exit(1);
            }
        }
        None => println!("🔍 Validating built-in default configuration"),
    }

    let config = match load_config(config_path, httpbin).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • httpbin: {}", config.httpbin);
            println!("   • Routes: {}", config.routes.len());
            for route in &config.routes {
                println!(
                    "     - {} -> {}",
                    route.id,
                    config.resolve_route_uri(route)
                );
            }
            println!(
                "   • Circuit breaker overrides: {}",
                config.circuit_breaker.instances.len()
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure httpbin and route URIs start with http:// or https://");
            println!("   • Path predicates must start with '/'");
            println!("   • Host globs use '*' only as a whole label (e.g. '*.example.com')");
            println!("   • Fallback URIs use the form 'forward:/fallback'");
            println!("   • Durations use humantime units (e.g. '1s', '500ms', '30s')");
            std::process::exit(1);
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# Gatehouse API Gateway Configuration

# The address to listen on
listen_addr = "127.0.0.1:8080"

# Upstream base URI; route URIs may refer to it as "${httpbin}"
httpbin = "http://httpbin.org:80"

[log]
level = "info"
format = "json"

# Settings for every circuit breaker unless overridden per name
[circuit_breaker.defaults]
failure_threshold = 5
timeout = "1s"
wait_duration_in_open_state = "30s"

# [circuit_breaker.instances.mycmd]
# timeout = "2s"

# Routes are matched in declaration order; the first match wins.
[[routes]]
id = "path_route"
path = "/get"
uri = "${httpbin}"

[[routes.filters]]
type = "add_request_header"
name = "Hello"
value = "World"

[[routes]]
id = "host_route"
host = "*.circuitbreaker.com"
uri = "${httpbin}"

[[routes.filters]]
type = "circuit_breaker"
name = "mycmd"
fallback_uri = "forward:/fallback"
"#;

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'gatehouse --config {config_path} serve' to start the gateway");
    Ok(())
}
