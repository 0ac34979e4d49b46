use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wingsbot_lib::config::{self, Settings, Transport};

#[derive(Parser)]
#[command(name = "wings-manager-bot")]
#[command(about = "Telegram admin bot for the WINGS bot manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: WINGS_BOT_CONFIG or ~/.wingsbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the bot. MANAGER_BOT_TOKEN, ADMIN_IDS and WINGS_MANAGER_BIN override the config file.
    Run {
        /// Config file path (default: WINGS_BOT_CONFIG or ~/.wingsbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Resolve the configuration and print a summary without starting the bot.
    Check {
        /// Config file path (default: WINGS_BOT_CONFIG or ~/.wingsbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("wings-manager-bot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_bot(config).await {
                log::error!("bot failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config) {
                eprintln!("configuration error: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = wingsbot_lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn resolve(config_path: Option<PathBuf>) -> anyhow::Result<(Settings, PathBuf)> {
    let (config, path) = config::load_config(config_path)?;
    let settings = Settings::resolve(&config)?;
    Ok((settings, path))
}

async fn run_bot(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (settings, path) = resolve(config_path)?;
    log::info!("loaded configuration from {}", path.display());
    wingsbot_lib::server::run_bot(settings).await
}

fn run_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (settings, path) = resolve(config_path)?;
    println!("config file:    {}", path.display());
    println!("bot token:      <set>");
    let admins: Vec<String> = settings.allow_list.iter().map(|id| id.to_string()).collect();
    println!("admin ids:      {}", admins.join(", "));
    let binary = &settings.manager_binary;
    let status = if binary.is_file() { "" } else { " (not found)" };
    println!("manager binary: {}{}", binary.display(), status);
    println!(
        "timeouts:       {}s ordinary, {}s create",
        settings.timeouts.ordinary.as_secs(),
        settings.timeouts.create.as_secs()
    );
    match &settings.transport {
        Transport::LongPoll => println!("transport:      long-poll"),
        Transport::Webhook { url, bind, port, .. } => {
            println!("transport:      webhook {} (listening on {}:{})", url, bind, port)
        }
    }
    Ok(())
}
