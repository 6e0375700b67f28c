//! Live dashboard for a BLE streaming camera.
//!
//! Usage:
//!   cargo run --bin blecam-tui               # scan, connect, stream, reconnect
//!   cargo run --bin blecam-tui -- --simulate # use the built-in camera simulator
//!
//! Keys
//! ----
//!   c        trigger a capture now
//!   s        stop streaming
//!   g        start streaming
//!   1 / 2    switch to the 1M / 2M PHY
//!   q / Esc  quit

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::sync::{mpsc, watch};

use blecam_rs::cli::CamArgs;
use blecam_rs::protocol::{Command, Phy};
use blecam_rs::supervisor::{drive_link, supervise};
use blecam_rs::types::{CamEvent, SavedImage, ThroughputReport};

// ── Constants ────────────────────────────────────────────────────────────────

/// One-second buckets kept for the throughput chart.
const RATE_POINTS: usize = 120;

/// Most recent images listed in the side panel.
const RECENT_IMAGES: usize = 8;

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// How long teardown waits for the camera to acknowledge the stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Live dashboard for a BLE streaming camera.
#[derive(Parser, Debug)]
#[command(name = "blecam-tui", version, about)]
struct Cli {
    #[command(flatten)]
    cam: CamArgs,
}

// ── App state ────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum AppMode {
    /// Scanning or connecting.
    Connecting { attempt: u32 },
    Streaming { name: String },
    /// Link lost, the supervisor will try again.
    Reconnecting,
    /// The supervisor gave up or the user quit.
    Stopped,
}

struct App {
    mode: AppMode,
    simulated: bool,
    streaming: bool,
    capture_interval: Option<u8>,
    expected_len: Option<u32>,
    recent: VecDeque<SavedImage>,
    images_total: usize,
    image_bytes_total: u64,
    rates: VecDeque<u64>,
    last_report: Option<ThroughputReport>,
    last_error: Option<String>,
}

impl App {
    fn new(simulated: bool) -> Self {
        Self {
            mode: AppMode::Connecting { attempt: 1 },
            simulated,
            streaming: false,
            capture_interval: None,
            expected_len: None,
            recent: VecDeque::with_capacity(RECENT_IMAGES + 1),
            images_total: 0,
            image_bytes_total: 0,
            rates: VecDeque::with_capacity(RATE_POINTS + 1),
            last_report: None,
            last_error: None,
        }
    }

    fn apply(&mut self, event: &CamEvent) {
        match event {
            CamEvent::Connected(name) => {
                self.mode = AppMode::Streaming { name: name.clone() };
                self.streaming = true;
                self.last_error = None;
            }
            CamEvent::Disconnected => {
                self.mode = AppMode::Reconnecting;
                self.streaming = false;
            }
            CamEvent::CaptureInterval(minutes) => self.capture_interval = Some(*minutes),
            CamEvent::ImageLength(len) => self.expected_len = Some(*len),
            CamEvent::ImageSaved(image) => {
                self.images_total += 1;
                self.image_bytes_total += image.len as u64;
                self.recent.push_front(image.clone());
                self.recent.truncate(RECENT_IMAGES);
            }
            CamEvent::BucketSample(bytes) => {
                self.rates.push_back(*bytes);
                while self.rates.len() > RATE_POINTS {
                    self.rates.pop_front();
                }
            }
            CamEvent::Throughput(report) => self.last_report = Some(*report),
        }
    }

    fn peak_rate(&self) -> u64 {
        self.rates.iter().copied().max().unwrap_or(0)
    }
}

fn lock(app: &Mutex<App>) -> MutexGuard<'_, App> {
    app.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn draw(frame: &mut Frame, app: &App) {
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .split(frame.area());

    draw_header(frame, root[0], app);
    let body = Layout::horizontal([Constraint::Min(40), Constraint::Length(44)]).split(root[1]);
    draw_rate_chart(frame, body[0], app);
    draw_images(frame, body[1], app);
    draw_footer(frame, root[2], app);
}

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (label, color) = match &app.mode {
        AppMode::Connecting { attempt: 1 } => {
            (format!("{} Connecting…", spinner_str()), Color::Yellow)
        }
        AppMode::Connecting { attempt } => (
            format!("{} Connecting (attempt {attempt})…", spinner_str()),
            Color::Yellow,
        ),
        AppMode::Streaming { name } if app.simulated => {
            (format!("◆ {name} (simulated)"), Color::Cyan)
        }
        AppMode::Streaming { name } => (format!("● {name}"), Color::Green),
        AppMode::Reconnecting => (
            format!("{} Disconnected, reconnecting…", spinner_str()),
            Color::Red,
        ),
        AppMode::Stopped => {
            let reason = app
                .last_error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default();
            (format!("■ Stopped{reason}"), Color::Red)
        }
    };

    let interval = app
        .capture_interval
        .map(|m| format!("Interval {m} min"))
        .unwrap_or_else(|| "Interval N/A".into());
    let rate = app
        .last_report
        .map(|r| format!("{} B/s", r.bytes_per_sec))
        .unwrap_or_else(|| "— B/s".into());
    let images = format!(
        "{} img · {} KiB",
        app.images_total,
        app.image_bytes_total / 1024
    );

    let line = Line::from(vec![
        Span::styled(
            " BLE Camera ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(interval, Style::default().fg(Color::White)),
        sep(),
        Span::styled(
            rate,
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(images, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ]);

    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

fn draw_rate_chart(frame: &mut Frame, area: Rect, app: &App) {
    let data: Vec<(f64, f64)> = app
        .rates
        .iter()
        .enumerate()
        .map(|(i, &bytes)| (i as f64, bytes as f64))
        .collect();
    let y_max = (app.peak_rate() as f64 * 1.2).max(1024.0);
    let x_max = RATE_POINTS as f64;

    let title = match app.last_report {
        Some(r) => format!(
            " Throughput  avg {} B/s over {} samples ",
            r.bytes_per_sec, r.samples
        ),
        None => " Throughput  (first report after one minute) ".to_owned(),
    };

    let datasets = vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(title, Style::default().fg(Color::Cyan))),
        )
        .x_axis(
            Axis::default()
                .bounds([0.0, x_max])
                .labels(vec![
                    Span::raw(format!("-{RATE_POINTS}s")),
                    Span::raw(format!("-{}s", RATE_POINTS / 2)),
                    Span::raw("now"),
                ])
                .style(Style::default().fg(Color::DarkGray)),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, y_max])
                .labels(vec![
                    Span::raw("0"),
                    Span::raw(format!("{:.0}", y_max / 2.0)),
                    Span::raw(format!("{y_max:.0}")),
                ])
                .style(Style::default().fg(Color::DarkGray)),
        );

    frame.render_widget(chart, area);
}

fn draw_images(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = if app.recent.is_empty() {
        vec![ListItem::new(Span::styled(
            " waiting for the first image…",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        app.recent
            .iter()
            .map(|img| {
                let name = img
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let short = img.expected_len != 0 && img.len != img.expected_len as usize;
                let color = if short { Color::Yellow } else { Color::Green };
                ListItem::new(Line::from(vec![
                    Span::styled(format!(" {name:<16}"), Style::default().fg(Color::White)),
                    Span::styled(format!("{:>8} B", img.len), Style::default().fg(color)),
                ]))
            })
            .collect()
    };

    let title = match app.expected_len {
        Some(len) => format!(" Images  next {len} B "),
        None => " Images ".to_owned(),
    };
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let stopped = if app.streaming {
        Span::raw("")
    } else {
        Span::styled(
            "  ⏸ NOT STREAMING",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    };
    let keys = Line::from(vec![
        Span::raw(" "),
        key("[c]"),
        Span::raw("Capture  "),
        key("[s]"),
        Span::raw("Stop  "),
        key("[g]"),
        Span::raw("Start  "),
        key("[1]"),
        Span::raw("1M PHY  "),
        key("[2]"),
        Span::raw("2M PHY  "),
        key("[q]"),
        Span::raw("Quit"),
        stopped,
    ]);
    frame.render_widget(
        Paragraph::new(keys).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: blecam-tui requires a real terminal (TTY).");
        eprintln!("Use the `blecam` binary when piping or redirecting output.");
        std::process::exit(1);
    }

    // ── Logging ──────────────────────────────────────────────────────────────
    // Logs go to blecam-tui.log so they never interfere with the display.
    //   RUST_LOG=debug cargo run --bin blecam-tui
    if let Ok(file) = std::fs::File::create("blecam-tui.log") {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    }

    let cli = Cli::parse();
    if cli.cam.list {
        anyhow::bail!("--list is not available in the dashboard; run `blecam --list`");
    }
    let config = cli.cam.client_config().context("invalid configuration")?;
    let simulate = cli.cam.sim_config();
    let app = Arc::new(Mutex::new(App::new(simulate.is_some())));

    // ── Connection task ──────────────────────────────────────────────────────
    let (quit_tx, quit_rx) = watch::channel(false);
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(16);
    let commands = Arc::new(tokio::sync::Mutex::new(cmd_rx));
    let link_task = {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            let result = supervise(config.reconnect, |attempt| {
                lock(&app).mode = AppMode::Connecting { attempt };
                let app = Arc::clone(&app);
                drive_link(
                    config.clone(),
                    simulate.clone(),
                    quit_rx.clone(),
                    Arc::clone(&commands),
                    move |event| lock(&app).apply(event),
                )
            })
            .await;
            let mut s = lock(&app);
            s.mode = AppMode::Stopped;
            if let Err(e) = result {
                s.last_error = Some(e.to_string());
            }
        })
    };

    // ── Terminal setup ───────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(100);

    // ── Main loop ────────────────────────────────────────────────────────────
    loop {
        {
            let s = lock(&app);
            terminal.draw(|f| draw(f, &s))?;
        }

        if !event::poll(tick)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        // Raw mode delivers Ctrl+C as a key event, not SIGINT.
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        let command = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ if ctrl_c => break,
            KeyCode::Char('c') => Command::StartSingleCapture,
            KeyCode::Char('s') => {
                lock(&app).streaming = false;
                Command::StopStreaming
            }
            KeyCode::Char('g') => {
                lock(&app).streaming = true;
                Command::StartStreaming
            }
            KeyCode::Char('1') => Command::SetPhy(Phy::OneMbps),
            KeyCode::Char('2') => Command::SetPhy(Phy::TwoMbps),
            _ => continue,
        };
        // Never block the render loop on BLE; a full queue drops the key.
        let _ = cmd_tx.try_send(command);
    }

    // ── Teardown ─────────────────────────────────────────────────────────────
    quit_tx.send_replace(true);
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, link_task).await;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
