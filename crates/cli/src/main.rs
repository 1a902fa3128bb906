use clap::{Parser, Subcommand};
use flowbridge::config::{self, Config};
use flowbridge::identity::IdentityRegistry;

#[derive(Parser)]
#[command(name = "flowbridge")]
#[command(about = "Bridge Slack bot events to HTTP workflow sinks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the bridge: one socket-mode connection per bot, plus the health/webhook listener.
    Run {
        /// Config file path (default: FLOWBRIDGE_CONFIG_PATH or ~/.flowbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port for GET / and webhooks (default from PORT, config, or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Validate bot identities and print a summary without connecting.
    Check {
        /// Config file path (default: FLOWBRIDGE_CONFIG_PATH or ~/.flowbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Ok(path) = dotenvy::dotenv() {
        log::debug!("loaded environment from {}", path.display());
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("flowbridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config, port }) => {
            if let Err(e) = run(config, port).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = check(config) {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run(config_path: Option<std::path::PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = config::load_config(config_path)?;
    config.gateway.port =
        port.unwrap_or_else(|| config::resolve_gateway_port(&config, &config::env_lookup));
    log::info!("starting flowbridge with config {}", path.display());
    flowbridge::gateway::run_gateway(config, path).await
}

fn check(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    let (registry, errors) = IdentityRegistry::build(&config, &config::env_lookup);
    println!("config: {}", path.display());
    print_summary(&config, &registry);
    for e in &errors {
        println!("  rejected: {}", e);
    }
    if registry.is_empty() {
        anyhow::bail!("no valid bot identity");
    }
    Ok(())
}

fn print_summary(config: &Config, registry: &IdentityRegistry) {
    println!(
        "gateway: {}:{}",
        config.gateway.bind,
        config::resolve_gateway_port(config, &config::env_lookup)
    );
    println!(
        "forward: mode {:?}, timeout {:?}",
        config.forward.mode,
        config.forward.timeout()
    );
    for identity in registry.iter() {
        println!(
            "  {}: {:?} -> {}{} (mode {:?}{})",
            identity.name,
            identity.transport,
            identity.sink_url.host_str().unwrap_or("?"),
            identity.sink_url.path(),
            identity.forward_mode,
            if identity.shared_secret.is_some() {
                ", api key set"
            } else {
                ""
            }
        );
    }
}
