use std::io::{self, Stderr};
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind, MouseEvent,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use futures_util::StreamExt;
use teamchat_core::TurnEvent;
use tokio::sync::mpsc;

pub type Tui = Terminal<CrosstermBackend<Stderr>>;

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize(u16, u16),
    Tick,
    Turn(TurnEvent),
}

/// Single stream of everything the UI loop reacts to
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
    _tx: mpsc::UnboundedSender<AppEvent>,
}

impl EventHandler {
    pub fn new(turn_rx: mpsc::UnboundedReceiver<TurnEvent>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        spawn_terminal_reader(tx.clone());
        spawn_ticker(tx.clone(), Duration::from_millis(300));
        spawn_forwarder(turn_rx, tx.clone(), AppEvent::Turn);

        Self { rx, _tx: tx }
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }
}

fn terminal_event(event: Event) -> Option<AppEvent> {
    match event {
        // Key releases are reported on some platforms; act on presses only
        Event::Key(key) if key.kind == KeyEventKind::Press => Some(AppEvent::Key(key)),
        Event::Mouse(mouse) => Some(AppEvent::Mouse(mouse)),
        Event::Resize(w, h) => Some(AppEvent::Resize(w, h)),
        _ => None,
    }
}

fn spawn_terminal_reader(tx: mpsc::UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let mut reader = event::EventStream::new();
        while let Some(next) = reader.next().await {
            let app_event = match next {
                Ok(event) => terminal_event(event),
                Err(e) => {
                    log::warn!("terminal event error: {}", e);
                    None
                }
            };
            if let Some(app_event) = app_event {
                if tx.send(app_event).is_err() {
                    break;
                }
            }
        }
    });
}

fn spawn_ticker(tx: mpsc::UnboundedSender<AppEvent>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if tx.send(AppEvent::Tick).is_err() {
                break;
            }
        }
    });
}

/// Re-emit every message of `source` as an app event until either side closes
fn spawn_forwarder<T: Send + 'static>(
    mut source: mpsc::UnboundedReceiver<T>,
    tx: mpsc::UnboundedSender<AppEvent>,
    wrap: fn(T) -> AppEvent,
) {
    tokio::spawn(async move {
        while let Some(item) = source.recv().await {
            if tx.send(wrap(item)).is_err() {
                break;
            }
        }
    });
}

/// Raw mode, alternate screen and mouse capture on stderr
pub fn init() -> Result<Tui> {
    enable_raw_mode()?;
    execute!(io::stderr(), EnterAlternateScreen, EnableMouseCapture)?;
    Ok(Terminal::new(CrosstermBackend::new(io::stderr()))?)
}

pub fn restore() -> Result<()> {
    execute!(io::stderr(), DisableMouseCapture, LeaveAlternateScreen)?;
    disable_raw_mode()?;
    Ok(())
}

/// Install panic hook to restore terminal on panic
pub fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = restore();
        original_hook(panic_info);
    }));
}
