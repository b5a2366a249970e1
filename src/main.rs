use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use emubot_core::device_log::LogStore;
use emubot_core::library::ReferenceLibrary;
use emubot_core::matcher::CcoeffMatcher;
use emubot_core::orchestrator::{self, Orchestrator};
use emubot_core::platform::create_platform;
use emubot_core::settings::Settings;
use emubot_core::types::{Command, OrchestratorState};
use emubot_core::logger;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let force_stub = args.iter().any(|a| a == "--stub");
    let headless = args.iter().any(|a| a == "--headless");

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let settings_path = args
        .iter()
        .position(|a| a == "--settings")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.join("settings.json"));

    logger::init(&cwd.join("logs"))?;
    logger::set_echo(headless);

    let settings = Settings::load(&settings_path);
    if !settings_path.exists() {
        if let Err(e) = settings.save(&settings_path) {
            logger::warn(&format!("could not write default settings: {:#}", e));
        }
    }
    let platform = create_platform(force_stub, &settings)?;
    let library = if force_stub && !settings.assets_dir.is_dir() {
        logger::warn("stub run without templates; every tick will miss");
        ReferenceLibrary::default()
    } else {
        ReferenceLibrary::load(&settings.assets_dir).context("loading reference templates")?
    };

    let orch = Orchestrator::discover(
        &settings,
        platform,
        Arc::new(library),
        Arc::new(CcoeffMatcher { rescan_below: settings.threshold, ..CcoeffMatcher::default() }),
    )?;
    let logs = orch.logs();
    let orch_state = orch.state_handle();

    if logs.is_empty() {
        println!("Tidak ada emulator yang terdeteksi.");
        return Ok(());
    }

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    let orch_thread = thread::spawn(move || orchestrator::orchestrate(orch, cmd_rx));
    let refresh = Duration::from_millis(settings.timings.refresh_ms.max(100));

    let result = if headless {
        cmd_tx.send(Command::StartAll).ok();
        run_headless(&logs, refresh)
    } else {
        run_tui(logs, orch_state, refresh, cmd_tx.clone())
    };

    cmd_tx.send(Command::Quit).ok();
    drop(cmd_tx);
    if orch_thread.join().is_err() {
        logger::error("orchestrator thread panicked");
    }
    result
}

/// Print every device's latest line on a fixed cadence until the
/// process is killed.
fn run_headless(logs: &LogStore, refresh: Duration) -> Result<()> {
    let mut last: Vec<String> = Vec::new();
    loop {
        thread::sleep(refresh);
        let rows = logs.snapshot();
        let current: Vec<String> = rows.iter().map(|r| r.latest.clone()).collect();
        if current != last {
            for row in &rows {
                println!("{} {:<22} {}", row.name, row.id, row.latest);
            }
            last = current;
        }
    }
}

fn run_tui(
    logs: Arc<LogStore>,
    orch_state: Arc<Mutex<OrchestratorState>>,
    refresh: Duration,
    cmd_tx: mpsc::Sender<Command>,
) -> Result<()> {
    let (log_tx, log_rx) = mpsc::channel::<String>();
    logger::set_tui_sender(log_tx);
    logger::info("emubot started");

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = emubot_tui::App::new(logs, orch_state, refresh, log_rx, cmd_tx);
    let result = emubot_tui::event::run(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}
