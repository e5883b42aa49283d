use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod calendar;
mod editor;
mod markdown;
mod ui;

use api::{ApiClient, UserPreferences};
use app::{App, AppEvent, View};

/// Log to a file under the user's cache dir; the terminal belongs to the UI.
fn init_logging() -> Result<()> {
    let log_dir = dirs::cache_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?
        .join("study-tui");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("study-tui.log"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "study_tui=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file)),
        )
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("Usage: study-tui");
                println!();
                println!("Environment:");
                println!("  STUDY_SERVER_URL  Server base URL (default http://localhost:3000)");
                println!("  EDITOR            Editor for descriptions and comments");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = init_logging() {
        eprintln!("Logging disabled: {}", e);
    }

    // Get server URL from environment
    let server_url = std::env::var("STUDY_SERVER_URL")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    tracing::info!(%server_url, "Starting study-tui");

    let mut api = ApiClient::new(&server_url);
    let has_tokens = api.load_tokens().unwrap_or(false);
    let preferences = UserPreferences::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable preferences: {}", e);
        UserPreferences::default()
    });

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let app = App::new(api, has_tokens, preferences);
    let res = run_app(&mut terminal, app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        tracing::error!("Exited with error: {:?}", err);
        eprintln!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
) -> Result<()> {
    // Create event channel
    let (tx, mut rx) = mpsc::channel::<AppEvent>(100);

    // Spawn input handler
    let tx_input = tx.clone();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(100)).unwrap_or(false) {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.kind == KeyEventKind::Press {
                        let _ = tx_input.send(AppEvent::Key(key)).await;
                    }
                }
            }
            // Send tick events for UI refresh
            let _ = tx_input.send(AppEvent::Tick).await;
        }
    });

    // Verify tokens on startup if we have them
    if app.view == View::VerifyingAuth {
        let _ = tx.send(AppEvent::VerifyAuth).await;
    }

    loop {
        terminal.draw(|f| ui::draw(f, &app))?;

        if let Some(event) = rx.recv().await {
            match event {
                AppEvent::Key(key) => {
                    if app.handle_key(key, tx.clone()).await? {
                        return Ok(());
                    }
                    // Check if terminal needs clearing after external editor
                    if app.needs_terminal_clear {
                        terminal.clear()?;
                        app.needs_terminal_clear = false;
                    }
                }
                AppEvent::Tick => {
                    // Just refresh UI
                }
                AppEvent::VerifyAuth => {
                    app.verify_auth(tx.clone()).await;
                }
                AppEvent::AuthSuccess => {
                    app.on_auth_success(tx.clone()).await;
                }
                AppEvent::AuthFailed(msg) => {
                    app.on_auth_failed(msg);
                }
                AppEvent::ConnectChanges => {
                    app.reconnect_changes(tx.clone()).await;
                }
                AppEvent::Stream(event) => {
                    app.on_stream_event(event).await;
                }
                AppEvent::ChangeStreamClosed => {
                    app.on_change_stream_closed(tx.clone());
                }
            }
        }
    }
}
