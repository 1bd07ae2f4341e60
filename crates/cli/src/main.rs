use clap::{Parser, Subcommand};
use lib::channels::Provider;

#[derive(Parser)]
#[command(name = "warelay")]
#[command(about = "Warelay: WhatsApp webhook gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: WARELAY_CONFIG_PATH or ~/.warelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the webhook gateway. Devices listed in the config can receive replies.
    Gateway {
        /// Config file path (default: WARELAY_CONFIG_PATH or ~/.warelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// POST a captured webhook body to a running gateway and print the acknowledgment.
    Replay {
        /// Config file path, used to find the gateway address
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// wablas, whacenter or waha
        #[arg(long)]
        provider: String,

        /// Device id for the webhook path
        #[arg(long)]
        device: String,

        /// Send to the internal entry point (body is an already-normalized field map)
        #[arg(long)]
        internal: bool,

        /// JSON file holding the webhook body
        file: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("warelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Replay {
            config,
            provider,
            device,
            internal,
            file,
        }) => {
            if let Err(e) = run_replay(config, &provider, &device, internal, &file).await {
                log::error!("replay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    lib::gateway::run_gateway(config, path).await
}

async fn run_replay(
    config_path: Option<std::path::PathBuf>,
    provider: &str,
    device: &str,
    internal: bool,
    file: &std::path::Path,
) -> anyhow::Result<()> {
    use anyhow::Context;

    let provider = Provider::parse(provider)
        .with_context(|| format!("unknown provider {:?} (wablas, whacenter, waha)", provider))?;
    let (config, _) = lib::config::load_config(config_path)?;
    let body = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;

    let host = match config.gateway.bind.trim() {
        "0.0.0.0" | "" => "127.0.0.1",
        other => other,
    };
    let url = if internal {
        format!(
            "http://{}:{}/webhook/internal/{}/{}",
            host, config.gateway.port, provider, device
        )
    } else {
        format!(
            "http://{}:{}/webhook/{}/{}",
            host, config.gateway.port, provider, device
        )
    };
    log::debug!("replaying {} to {}", file.display(), url);

    let res = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .with_context(|| format!("posting to {}", url))?;
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    println!("{} {}", status.as_u16(), text);
    if !status.is_success() {
        anyhow::bail!("gateway answered {}", status);
    }
    Ok(())
}
