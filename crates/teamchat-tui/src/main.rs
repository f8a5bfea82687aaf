use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use teamchat_core::Config;

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

#[derive(Parser)]
#[command(name = "teamchat")]
#[command(about = "Terminal chat client for a multi-agent LLM backend", version)]
struct Cli {
    /// Chat endpoint URL (overrides config and TEAMCHAT_ENDPOINT)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Path to a config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging is best effort; the UI still runs without a log file
    let log_file = logging::init().ok();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }

    if cli.save_config {
        match &cli.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        println!("Saved configuration (endpoint {})", config.endpoint);
        return Ok(());
    }

    if let Some(path) = &log_file {
        log::info!("logging to {}", path.display());
    }

    let (mut app, turn_rx) = App::new(&config)?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &mut app, EventHandler::new(turn_rx)).await;
    tui::restore()?;

    if let Err(e) = &result {
        log::error!("exiting with error: {:#}", e);
    }
    result
}

async fn run(terminal: &mut Tui, app: &mut App, mut events: EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }

    // Leave no request running behind the restored terminal
    app.stop();
    Ok(())
}
