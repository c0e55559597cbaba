use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

mod app;
mod completion;
mod config;
mod error;
mod handler;
mod repl;
mod server;
mod session;
mod state;
mod tui;
mod ui;

use app::App;
use completion::OpenRouterClient;
use config::{FileSettingsStore, MemorySettingsStore, SettingsStore};
use session::SessionController;
use tui::{ChatTerminal, EventHandler};

#[derive(Parser)]
#[command(name = "deepseek-chat")]
#[command(about = "Chat with DeepSeek models through OpenRouter", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Full-screen chat interface (default)
    Chat,
    /// Plain line-by-line chat in the terminal
    Repl {
        /// Use this key for the session instead of the saved one
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Serve the browser client as static files
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Directory holding index.html and its assets
        #[arg(short, long, default_value = "web")]
        root: PathBuf,
    },
}

/// The TUI owns the terminal, so its log goes to a file under the config dir.
fn init_logging(to_file: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if to_file {
        let file = config::app_config_dir().ok().and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("deepseek-chat.log"))
                .ok()
        });
        match file {
            Some(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            None => {
                builder.filter_level(log::LevelFilter::Off);
            }
        }
    }

    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat);

    init_logging(matches!(command, Commands::Chat));

    match command {
        Commands::Chat => run_chat().await,
        Commands::Repl { api_key } => run_repl(api_key).await,
        Commands::Serve { port, root } => server::run(server::ServerConfig { port, root }).await,
    }
}

async fn run_chat() -> Result<()> {
    let store = FileSettingsStore::default_location()?;
    info!("settings file: {}", store.path().display());

    let client = OpenRouterClient::new();
    info!("completion endpoint: {}", client.endpoint());

    let session = SessionController::new(Arc::new(store))?;
    let mut app = App::new(session, Arc::new(client));

    let mut terminal = ChatTerminal::enter()?;
    let mut events = EventHandler::new();

    let outcome = async {
        while !app.should_quit {
            terminal.draw(&mut app)?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    terminal.leave()?;
    outcome
}

async fn run_repl(api_key: Option<String>) -> Result<()> {
    // A key passed on the command line lives only for this run
    let store: Arc<dyn SettingsStore> = match api_key {
        Some(key) => {
            let saved = FileSettingsStore::default_location()?;
            let overlay = MemorySettingsStore::overlay_key(&saved, &key).with_context(|| {
                format!("Could not read saved settings from {}", saved.path().display())
            })?;
            Arc::new(overlay)
        }
        None => Arc::new(FileSettingsStore::default_location()?),
    };

    let mut session = SessionController::new(store)?;
    let client = OpenRouterClient::new();
    repl::run(&mut session, &client).await
}
