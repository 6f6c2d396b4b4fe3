mod api;
mod app;
mod config;
mod conns;
mod delay;
mod format;
mod logs;
mod proxies;
mod setup;
mod stream;
mod telemetry;
mod ui;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, DisableFocusChange, EnableFocusChange, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    api::ClashClient,
    app::{App, Flow, SetupFlow, SetupForm},
    config::{Session, Settings},
    format::{format_bytes, truncate_str},
    proxies::{delay_label, groups_from},
};

const LOG_ENV: &str = "CLASHPANEL_LOG";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "clashpanel")]
#[command(about = "A terminal dashboard for Clash and Sing-box controllers", long_about = None)]
struct Cli {
    /// External controller address; overrides the saved one
    #[arg(short, long)]
    controller: Option<String>,

    /// API secret; overrides the saved one
    #[arg(short, long)]
    secret: Option<String>,

    /// Settings file (defaults to <config dir>/clashpanel/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List proxy groups with their nodes
    Proxies,
    /// List proxy groups and the selected node
    Groups,
    /// List all rules
    Rules,
    /// Show the daemon version
    Version,
    /// List active connections
    Connections,
    /// Close one connection, or all of them
    Close {
        /// Connection id
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Validate a controller and save it
    Setup {
        /// e.g. 127.0.0.1:9090 or http://router.lan:9090
        url: String,
        #[arg(long, default_value = "")]
        secret: String,
    },
    /// Interactive TUI mode (default)
    Tui,
}

// ============================================================================
// Logging
// ============================================================================

fn open_log_file() -> Result<fs::File> {
    let dir = config::log_dir()?;
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("clashpanel.log");
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// The TUI owns the terminal, so it logs to a file; one-shot commands log to
/// stderr.
fn init_tracing(to_file: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if !to_file {
        let _ = builder.with_writer(io::stderr).try_init();
        return;
    }
    match open_log_file() {
        Ok(file) => {
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        Err(_) => {
            let _ = builder.with_writer(io::sink).try_init();
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    let interactive = matches!(cli.command, None | Some(Commands::Tui));
    init_tracing(interactive);

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load(&config_path)?;
    let session = app::resolve_session(&settings, cli.controller.as_deref(), cli.secret.as_deref());

    let command = cli.command.unwrap_or(Commands::Tui);
    if let Commands::Setup { url, secret } = &command {
        let (session, version) = setup::bootstrap(url, secret, &mut settings, &config_path)?;
        println!(
            "Connected to {} {} at {}",
            version.backend(),
            version.version,
            session.base_url
        );
        println!("Saved to {}", config_path.display());
        return Ok(());
    }
    if let Commands::Tui = command {
        return run_tui(settings, &config_path, session);
    }

    let Some(session) = session else {
        bail!("No controller configured. Run `clashpanel setup <url>` or pass --controller");
    };
    let client = ClashClient::new(session).with_retries(settings.request_retries);

    match command {
        Commands::Proxies => {
            let resp = client.get_proxies()?;
            for group in groups_from(&resp) {
                println!("\n[{}] ({})", group.name, group.group_type);
                if let Some(ref now) = group.now {
                    println!("  Current: {}", now);
                }
                println!("  Available:");
                for node in &group.members {
                    println!(
                        "    - {:<30} {:<14} {:>8}",
                        node.name,
                        node.node_type,
                        delay_label(node.history_delay)
                    );
                }
            }
        }
        Commands::Groups => {
            let groups = groups_from(&client.get_proxies()?);
            println!("Proxy Groups ({}):", groups.len());
            for group in groups {
                let current = group.now.as_deref().unwrap_or("N/A");
                println!(
                    "  [{:<12}] {:<20} → {}",
                    group.group_type, group.name, current
                );
            }
        }
        Commands::Rules => {
            let resp = client.get_rules()?;
            println!("Rules ({}):", resp.rules.len());
            for (idx, rule) in resp.rules.iter().enumerate() {
                println!(
                    "{:4}. [{:<12}] {:<40} → {}",
                    idx + 1,
                    rule.rule_type,
                    rule.payload,
                    rule.proxy
                );
            }
        }
        Commands::Version => {
            let resp = client.get_version()?;
            let flavor = if resp.meta { " (Meta)" } else { "" };
            println!("{} version: {}{}", resp.backend(), resp.version, flavor);
            let config = client.get_config()?;
            println!(
                "Mode: {}  Ports: http {} socks {} mixed {}",
                config.mode, config.http_port, config.socks_port, config.mixed_port
            );
        }
        Commands::Connections => {
            let snap = client.get_connections()?;
            println!(
                "Connections ({}): ↑ {} ↓ {}",
                snap.connections.len(),
                format_bytes(snap.upload_total),
                format_bytes(snap.download_total)
            );
            for c in &snap.connections {
                println!(
                    "  {}  {:<40} {:<30} ↑{:<10} ↓{:<10}",
                    truncate_str(&c.id, 8),
                    truncate_str(&conns::destination(c), 39),
                    truncate_str(&conns::proxy_chain(c), 29),
                    format_bytes(c.upload),
                    format_bytes(c.download)
                );
            }
        }
        Commands::Close { id, all } => match (id, all) {
            (_, true) => {
                client.close_all_connections()?;
                println!("Closed all connections");
            }
            (Some(id), false) => {
                client.close_connection(&id)?;
                println!("Closed {}", id);
            }
            (None, false) => bail!("Pass a connection id or --all"),
        },
        Commands::Setup { .. } | Commands::Tui => {}
    }

    Ok(())
}

// ============================================================================
// Terminal loop
// ============================================================================

type Term = Terminal<CrosstermBackend<io::Stdout>>;

fn run_tui(settings: Settings, config_path: &Path, session: Option<Session>) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = drive(&mut terminal, settings, config_path, session);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableFocusChange
    )?;
    terminal.show_cursor()?;

    result
}

fn drive(
    terminal: &mut Term,
    mut settings: Settings,
    config_path: &Path,
    mut session: Option<Session>,
) -> Result<()> {
    let usage_path = app::usage_path()
        .map_err(|e| warn!(error = %format!("{:#}", e), "usage stats will not be saved"))
        .ok();

    loop {
        let current = match session.take() {
            Some(session) => session,
            None => match run_setup(terminal, &mut settings, config_path)? {
                Some(session) => session,
                None => return Ok(()),
            },
        };
        info!(controller = %current.base_url, "starting dashboard");

        let client = ClashClient::new(current).with_retries(settings.request_retries);
        let mut app = App::new(client, settings.clone(), usage_path.clone());
        let result = dashboard(terminal, &mut app);
        app.shutdown();
        drop(app);

        match result? {
            Flow::Logout => setup::logout(&mut settings, config_path)?,
            _ => return Ok(()),
        }
    }
}

/// Returns `None` when the user leaves without connecting.
fn run_setup(
    terminal: &mut Term,
    settings: &mut Settings,
    config_path: &Path,
) -> Result<Option<Session>> {
    let mut form = SetupForm::new(settings);
    loop {
        terminal.draw(|f| ui::render_setup(f, &form))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match form.handle_key(key, settings, config_path) {
                    SetupFlow::Continue => {}
                    SetupFlow::Quit => return Ok(None),
                    SetupFlow::Connected(session) => return Ok(Some(session)),
                }
            }
        }
    }
}

/// Runs until the user quits or logs out; returns which.
fn dashboard(terminal: &mut Term, app: &mut App) -> Result<Flow> {
    loop {
        app.tick();
        terminal.draw(|f| ui::ui(f, app))?;

        if event::poll(POLL_INTERVAL)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    match app.handle_key(key) {
                        Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                }
                Event::FocusLost => app.freeze(),
                Event::FocusGained => app.resume(),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_and_subcommands() {
        let cli = Cli::parse_from([
            "clashpanel",
            "--controller",
            "10.0.0.1:9090",
            "--secret",
            "pw",
            "close",
            "--all",
        ]);
        assert_eq!(cli.controller.as_deref(), Some("10.0.0.1:9090"));
        assert_eq!(cli.secret.as_deref(), Some("pw"));
        assert!(matches!(cli.command, Some(Commands::Close { id: None, all: true })));
    }

    #[test]
    fn no_subcommand_means_tui() {
        let cli = Cli::parse_from(["clashpanel"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn close_rejects_id_with_all() {
        assert!(Cli::try_parse_from(["clashpanel", "close", "abc", "--all"]).is_err());
    }

    #[test]
    fn setup_secret_defaults_to_empty() {
        let cli = Cli::parse_from(["clashpanel", "setup", "127.0.0.1"]);
        match cli.command {
            Some(Commands::Setup { url, secret }) => {
                assert_eq!(url, "127.0.0.1");
                assert!(secret.is_empty());
            }
            _ => panic!("expected setup"),
        }
    }
}
