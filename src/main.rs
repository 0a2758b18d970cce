use anyhow::Result;
use chrono::Local;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::Backend, backend::CrosstermBackend, Terminal};
use std::fs::File;
use std::{io, time::Duration};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use sshm::app::{App, InputMode};
use sshm::cli::{self, Cli, Command};
use sshm::config::{AppConfig, ConfigManager};
use sshm::resolver::OverrideSet;
use sshm::ui;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(cli::exit_code(&err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let app_config = config_manager.load_config()?;
    init_logging(&config_manager, &app_config, cli.verbose)?;

    match cli.command.unwrap_or(Command::Tui) {
        Command::Tui => run_tui(config_manager, app_config, None).await,
        Command::Explore { name, overrides } => {
            let overrides = OverrideSet::from_args(&overrides)?;
            run_tui(config_manager, app_config, Some((name, overrides))).await
        }
        command => cli::run(command, &config_manager, &app_config).await,
    }
}

fn init_logging(manager: &ConfigManager, config: &AppConfig, verbose: bool) -> Result<()> {
    let log_dir = manager.log_dir();
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }

    let log_file = log_dir.join(format!("sshm_{}.log", Local::now().format("%Y%m%d_%H%M%S")));
    let file = File::create(&log_file)?;

    let level = if verbose { "debug" } else { config.log_level.as_str() };
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(format!("sshm={}", level).parse()?))
        .with_ansi(false)
        .with_writer(file)
        .init();

    debug!("Starting sshm, logging to {}", log_file.display());
    Ok(())
}

async fn run_tui(
    config_manager: ConfigManager,
    app_config: AppConfig,
    explore: Option<(String, OverrideSet)>,
) -> Result<()> {
    let mut app = App::load(config_manager, app_config)?;
    if let Some((name, overrides)) = explore {
        // Fails before the terminal is touched, so the error prints normally
        app.open_explorer(&name, &overrides)?;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app).await;
    app.shutdown().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        app.process_events();
        app.tick();
        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key, terminal)?;
                }
            }
        }

        if app.should_quit {
            debug!("Quitting from {:?} mode", app.input_mode);
            return Ok(());
        }
        if app.input_mode == InputMode::Explorer && app.explorer.is_none() {
            app.input_mode = InputMode::Normal;
        }
    }
}
