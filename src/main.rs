use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::{mpsc, watch, Mutex};

use blecam_rs::cam_client::CamClient;
use blecam_rs::cli::CamArgs;
use blecam_rs::protocol::{Command, Phy};
use blecam_rs::supervisor::{drive_link, supervise};
use blecam_rs::types::CamEvent;

/// Receive images from a BLE streaming camera.
#[derive(Parser, Debug)]
#[command(name = "blecam", version, about)]
struct Cli {
    #[command(flatten)]
    cam: CamArgs,
}

enum Line {
    Quit,
    Send(Command),
    Unknown,
}

fn parse_line(line: &str) -> Line {
    match line {
        "q" | "quit" => Line::Quit,
        "c" | "capture" => Line::Send(Command::StartSingleCapture),
        "g" | "start" => Line::Send(Command::StartStreaming),
        "s" | "stop" => Line::Send(Command::StopStreaming),
        "1" => Line::Send(Command::SetPhy(Phy::OneMbps)),
        "2" => Line::Send(Command::SetPhy(Phy::TwoMbps)),
        "p" | "params" => Line::Send(Command::GetBleParams),
        _ => Line::Unknown,
    }
}

fn print_event(event: &CamEvent) {
    match event {
        CamEvent::Connected(name) => info!("✅  Connected to: {name}"),
        CamEvent::Disconnected => info!("❌  Disconnected from device."),
        CamEvent::CaptureInterval(minutes) => {
            println!("[DEVICE] capture interval {minutes} min");
        }
        CamEvent::ImageLength(len) => println!("[INFO]  next image {len} bytes"),
        CamEvent::ImageSaved(image) => {
            let note = if image.expected_len != 0 && image.len != image.expected_len as usize {
                format!("  (announced {})", image.expected_len)
            } else {
                String::new()
            };
            println!(
                "[IMAGE] {:7} bytes → {}{note}",
                image.len,
                image.path.display()
            );
        }
        CamEvent::BucketSample(_) => {}
        CamEvent::Throughput(report) => println!(
            "[RATE]  {} bytes / second  ({} samples over {:.0} s)",
            report.bytes_per_sec,
            report.samples,
            report.window.as_secs_f64()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=blecam_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ── Configuration ────────────────────────────────────────────────────────
    let cli = Cli::parse();
    let config = cli.cam.client_config().context("invalid configuration")?;
    let simulate = cli.cam.sim_config();

    if cli.cam.list {
        let devices = CamClient::new(config).scan_all().await.context("scan failed")?;
        if devices.is_empty() {
            println!("No camera found.");
        }
        for device in devices {
            println!("{:<24} {}", device.name, device.id);
        }
        return Ok(());
    }
    info!("Saving images to {}", config.output_dir.display());

    let (quit_tx, quit_rx) = watch::channel(false);
    let quit_tx = Arc::new(quit_tx);
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(16);
    let commands = Arc::new(Mutex::new(cmd_rx));

    // ── Ctrl-C ───────────────────────────────────────────────────────────────
    let quit_on_signal = Arc::clone(&quit_tx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            quit_on_signal.send_replace(true);
        }
    });

    // ── Stdin command loop ───────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread so no StdinLock is held across
    // an await point.
    info!("Commands (type + Enter):  c capture · g start · s stop · 1/2 PHY · p params · q quit");
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_line(line.trim()) {
                Line::Quit => {
                    quit_tx.send_replace(true);
                    break;
                }
                Line::Send(command) => {
                    if cmd_tx.blocking_send(command).is_err() {
                        break;
                    }
                }
                Line::Unknown if line.trim().is_empty() => {}
                Line::Unknown => warn!("unknown command '{}'", line.trim()),
            }
        }
    });

    // ── Connect, stream, reconnect ───────────────────────────────────────────
    supervise(config.reconnect, |attempt| {
        if attempt > 1 {
            info!("Connection attempt {attempt} …");
        }
        drive_link(
            config.clone(),
            simulate.clone(),
            quit_rx.clone(),
            Arc::clone(&commands),
            print_event,
        )
    })
    .await
    .context("camera session failed")?;

    info!("Event loop finished – exiting.");
    Ok(())
}
