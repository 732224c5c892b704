use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::{info, warn};

mod app;
mod auth;
mod config;
mod database;
mod dates;
mod error;
mod export;
mod import;
mod logging;
mod models;
mod storage;
mod store;
mod supabase;
mod totals;
mod tracker;
mod ui;

use app::{App, Services};
use config::BackendConfig;
use error::{Error, RemoteError, Result};
use export::ExportKind;

#[derive(Debug, Parser)]
#[command(name = "clienttime", version, about = "Track time across clients")]
struct Cli {
    /// Ignore the stored session and show the login form
    #[arg(long)]
    force_login: bool,

    /// Log level for the log file (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write an export using the stored session
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportKind,
        /// Output file; defaults to the export directory
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Import clients from a CSV or JSON file
    Import { path: PathBuf },
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(dir) = storage::data_dir()
        && let Err(err) = logging::enable_logging(&dir, cli.log_level.as_deref())
    {
        eprintln!("Logging disabled: {err}");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "starting");

    let services = BackendConfig::load()
        .map_err(Error::from)
        .and_then(|config| Services::connect(config, storage::session_path()));

    if let Some(command) = cli.command {
        if let Err(err) = run_command(services, command) {
            warn!(error = %err, "command failed");
            eprintln!("{}", err.user_message());
            std::process::exit(err.exit_code());
        }
        return Ok(());
    }

    run_tui(services, cli.force_login)
}

fn run_command(services: Result<Services>, command: Command) -> Result<()> {
    let mut services = services?;
    services.auth.check_session(false);
    services.sync_session();
    if services.auth.session().is_none() {
        let err = RemoteError::Unauthorized("log in with the interactive app first".to_string());
        return Err(err.into());
    }
    services.tracker.load_clients()?;

    match command {
        Command::Export { format, output } => {
            let now = chrono::Local::now();
            let (name, body) = services.tracker.render_export(format, now)?;
            let path = match output {
                Some(path) => {
                    fs::write(&path, body)?;
                    path
                }
                None => app::write_export(&storage::export_dir(), &name, &body)?,
            };
            println!("{}: {}", format.done_message(), path.display());
        }
        Command::Import { path } => {
            let text = fs::read_to_string(&path)?;
            let summary = services.tracker.import_clients(&text)?;
            println!(
                "Imported {} new clients from {:?} ({} skipped)",
                summary.added, summary.format, summary.skipped
            );
        }
    }
    Ok(())
}

fn run_tui(
    services: Result<Services>,
    force_login: bool,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    enable_raw_mode()?;
    stdout.execute(EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = App::new(services, force_login, storage::export_dir());

    loop {
        terminal.draw(|frame| ui::draw(frame, &mut app))?;

        if app.needs_session_check {
            app.check_session();
            continue;
        }

        if app.needs_refresh {
            app.refresh_data();
            continue;
        }

        if app.should_quit {
            break;
        }

        app.tick();

        if event::poll(Duration::from_millis(120))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            app.handle_key_event(key);
        }
    }

    app.shutdown();
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!("exiting");

    Ok(())
}
