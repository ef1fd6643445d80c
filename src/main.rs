use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use komaru::client::bridge::BridgeClient;
use komaru::config::{komaru_dir, Config};
use komaru::error::{KomaruError, Result};
use komaru::parser;
use komaru::player::Player;

#[derive(Parser)]
#[command(name = "komaru", version, about = "Scripted player for the Komaru card game")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
    /// Connect and start playing
    Start,
    /// Show how a bot reply would be classified
    Parse {
        /// Reply text as the bot sends it
        text: String,
    },
    /// Config management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config
    Show,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // `start` logs to the file as well; its verbosity comes from the config.
    let debug = match &cli.command {
        Commands::Start => load_config(&cli.config)?.debug_logging,
        _ => false,
    };
    init_tracing(matches!(&cli.command, Commands::Start), debug)?;

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.config, force)?,
        Commands::Start => cmd_start(&cli.config).await?,
        Commands::Parse { text } => {
            let outcome = parser::parse(&text);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(&cli.config)?;
                println!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}

fn log_file_path() -> PathBuf {
    komaru_dir().join("komaru.log")
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let config_path = path.clone().unwrap_or_else(Config::default_path);
    if !config_path.exists() {
        return Err(KomaruError::Config(format!(
            "Config not found at {}. Run `komaru init` first.",
            config_path.display()
        )));
    }
    Config::load(&config_path)
}

fn init_tracing(with_file: bool, debug: bool) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            "komaru=debug,info".into()
        } else {
            "info".into()
        }
    });

    let stderr_layer = tracing_subscriber::fmt::layer();

    if with_file {
        let _ = std::fs::create_dir_all(komaru_dir());
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path())?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn cmd_init(path: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = path.clone().unwrap_or_else(Config::default_path);
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }
    std::fs::write(&config_path, Config::default_toml())?;
    println!("Created config at {}", config_path.display());
    println!("`komaru start` spawns the chat bridge set in [client]; see README.md for its protocol.");
    println!("Set TG_API_ID and TG_API_HASH for the bridge, then run `komaru start`.");
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    let client = Arc::new(BridgeClient::spawn(&config.client)?);
    let mode = config.mode;
    let target = config.target.clone();
    let player = Player::connect(client, config).await?;

    println!("Komaru v{} started", env!("CARGO_PKG_VERSION"));
    println!("  Target: {target}");
    println!("  Mode:   {mode:?}");
    println!("  Log:    {}", log_file_path().display());
    println!();
    println!("Press Ctrl+C to stop.");
    info!("Player started against '{target}' in {mode:?} mode");

    tokio::select! {
        result = player.run() => result?,
        _ = tokio::signal::ctrl_c() => println!("\nShutting down..."),
    }

    println!("Komaru stopped.");
    Ok(())
}
