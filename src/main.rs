//! Parley CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use parley::adapters::audio::Recorder;
use parley::adapters::cli::{spawn_line_reader, ConsoleSink};
use parley::adapters::UserInput;
use parley::config::{self, Config};
use parley::session::{EngineOptions, SessionEngine, WebSocketConnector};
use parley::tools::ToolRunner;
use parley::ui;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley - realtime conversational client with local tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the configuration interactively
    Onboard,

    /// Start a conversation
    Chat {
        /// Speak and listen instead of typing (needs the `audio` feature)
        #[arg(long)]
        voice: bool,

        /// First message to send once connected
        #[arg(short, long)]
        message: Option<String>,

        /// Debug logging (RUST_LOG takes precedence)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Chat { verbose: true, .. });
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "parley=debug" } else { "warn" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Setup Global Ctrl+C handler
    let exit_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let r = exit_flag.clone();

    ctrlc::set_handler(move || {
        if r.load(std::sync::atomic::Ordering::SeqCst) {
            println!("\nBye!");
            std::process::exit(0);
        } else {
            println!("\nPress Ctrl+C again to exit");
            r.store(true, std::sync::atomic::Ordering::SeqCst);

            // Reset flag after 3 seconds
            let r2 = r.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_secs(3));
                r2.store(false, std::sync::atomic::Ordering::SeqCst);
            });
        }
    })
    .ok();

    match cli.command {
        Commands::Onboard => {
            config::onboard()?;
        }

        Commands::Chat { voice, message, .. } => {
            let config = config::load()?;
            run_chat(&config, voice || config.voice.enabled, message).await?;
        }

        Commands::Status => {
            let config = config::load()?;
            print_status(&config);
        }
    }

    Ok(())
}

async fn run_chat(config: &Config, voice: bool, message: Option<String>) -> Result<()> {
    let api_key = config.resolve_api_key()?;
    let connector = WebSocketConnector::new(config.session_url()?, api_key);
    let tools = ToolRunner::new_with_defaults(config);
    let options = EngineOptions::from_config(config, voice);

    let mut engine = if voice {
        let recorder = Recorder::open(config.voice.sample_rate)?;
        let sink = ConsoleSink::voice_mode(config.voice.sample_rate);
        SessionEngine::new(connector, tools, Box::new(sink), options)
            .with_recorder(Box::new(recorder))
    } else {
        SessionEngine::new(connector, tools, Box::new(ConsoleSink::text_mode()), options)
    };

    ui::print_header(&config.model, if voice { "voice" } else { "text" });

    let (tx, rx) = mpsc::channel(32);
    let _reader = spawn_line_reader(tx, voice);
    engine.run(rx, message.map(UserInput::Text)).await?;

    println!("\nBye!");
    Ok(())
}

fn print_status(config: &Config) {
    ui::print_header(&config.model, if config.voice.enabled { "voice" } else { "text" });
    println!("Config: {:?}", config::config_path());
    println!("Endpoint: {}", config.endpoint);
    let key = match config.resolve_api_key() {
        Ok(key) => mask(&key),
        Err(_) => "not set".to_string(),
    };
    println!("API key: {}", key);
    println!("Voice: {} ({}, {} Hz)", if config.voice.enabled { "on" } else { "off" }, config.voice.voice, config.voice.sample_rate);
    println!("Audio support: {}", if cfg!(feature = "audio") { "✓" } else { "not built" });
    println!("Initial tools: {}", config.tools.initial.join(", "));
    println!("Helper tools: {}", config.tools.helper.join(", "));
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
