//! Connection attempts, reconnects and the per-attempt event loop shared by
//! the binaries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;

use crate::cam_client::open_link;
use crate::config::{CamClientConfig, ReconnectPolicy};
use crate::error::{CamError, Result};
use crate::protocol::Command;
use crate::sim::SimConfig;
use crate::types::CamEvent;

/// How one connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The user asked to stop.
    Quit,
    /// The session ran and the link went away.
    LinkLost {
        images_saved: usize,
        /// Time between the link opening and the session ending.
        uptime: Duration,
    },
}

/// Run `attempt` until it returns [`AttemptOutcome::Quit`] or the policy
/// gives up.
///
/// * A lost link after a working session (an image saved, or up for at
///   least `stable_after`) resets the failure count and reconnects after one
///   `retry_delay`. A link that drops sooner counts as a failed attempt.
/// * A retryable error (no adapter, connect or discovery failure) is retried
///   up to `max_retries` times with a linearly growing delay.
/// * Any other error, [`crate::error::CamError::FileWrite`] included, is
///   returned at once.
///
/// `attempt` receives the 1-based attempt number.
pub async fn supervise<F, Fut>(policy: ReconnectPolicy, mut attempt: F) -> Result<()>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<AttemptOutcome>>,
{
    let mut failures = 0u32;
    let mut n = 0u32;
    loop {
        n += 1;
        match attempt(n).await {
            Ok(AttemptOutcome::Quit) => return Ok(()),
            Ok(AttemptOutcome::LinkLost {
                images_saved,
                uptime,
            }) => {
                if policy.max_retries == 0 {
                    info!("link lost; reconnecting is disabled");
                    return Ok(());
                }
                if images_saved > 0 || uptime >= policy.stable_after {
                    failures = 0;
                } else {
                    failures += 1;
                    if failures > policy.max_retries {
                        let e = CamError::Connection(format!(
                            "link dropped {failures} time(s) in a row right after connecting"
                        ));
                        error!("{e}");
                        return Err(e);
                    }
                }
                let delay = policy.delay_for(failures.max(1));
                info!("link lost after {uptime:?}; reconnecting in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) if !e.is_retryable() => {
                error!("{e}");
                return Err(e);
            }
            Err(e) => {
                failures += 1;
                if failures > policy.max_retries {
                    error!("giving up after {failures} failed attempt(s): {e}");
                    return Err(e);
                }
                let delay = policy.delay_for(failures);
                warn!(
                    "attempt {n} failed: {e}; retry {failures}/{} in {delay:?}",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Resolves once `quit` holds `true`. Never resolves if the sender is gone.
async fn quit_requested(quit: &mut watch::Receiver<bool>) {
    if quit.wait_for(|q| *q).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// One connection attempt: open the link, forward events to `on_event` and
/// commands from `commands` to the camera until the link ends or `quit` is
/// raised.
///
/// On quit the camera is told to stop streaming before the link is closed.
pub async fn drive_link<F>(
    config: CamClientConfig,
    simulate: Option<SimConfig>,
    mut quit: watch::Receiver<bool>,
    commands: Arc<Mutex<mpsc::Receiver<Command>>>,
    mut on_event: F,
) -> Result<AttemptOutcome>
where
    F: FnMut(&CamEvent) + Send,
{
    if *quit.borrow() {
        return Ok(AttemptOutcome::Quit);
    }
    let (mut events, link) = tokio::select! {
        opened = open_link(&config, simulate.as_ref()) => opened?,
        () = quit_requested(&mut quit) => return Ok(AttemptOutcome::Quit),
    };
    let opened_at = Instant::now();

    let mut commands = commands.lock().await;
    let mut commands_open = true;
    let mut quitting = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(CamEvent::Disconnected) | None => break,
                Some(event) => on_event(&event),
            },
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    if let Err(e) = link.send(command).await {
                        warn!("{command}: {e}");
                    }
                }
                None => commands_open = false,
            },
            () = quit_requested(&mut quit), if !quitting => {
                info!("Quit requested.");
                quitting = true;
                if let Err(e) = link.stop_streaming().await {
                    warn!("stop streaming: {e}");
                }
                if let Err(e) = link.close().await {
                    warn!("{e}");
                }
            }
        }
    }
    on_event(&CamEvent::Disconnected);

    let summary = link.join().await?;
    Ok(if quitting {
        AttemptOutcome::Quit
    } else {
        AttemptOutcome::LinkLost {
            images_saved: summary.images_saved,
            uptime: opened_at.elapsed(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn policy(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries,
            retry_delay: Duration::from_secs(2),
            stable_after: Duration::from_secs(30),
        }
    }

    fn link_lost(images_saved: usize, uptime_secs: u64) -> Result<AttemptOutcome> {
        Ok(AttemptOutcome::LinkLost {
            images_saved,
            uptime: Duration::from_secs(uptime_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_growing_delay_then_gives_up() {
        let start = tokio::time::Instant::now();
        let mut seen = Vec::new();
        let result = supervise(policy(3), |n| {
            seen.push(n);
            async { Err::<AttemptOutcome, _>(CamError::Connection("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(CamError::Connection(_))));
        assert_eq!(seen, vec![1, 2, 3, 4]);
        // 2 + 4 + 6 seconds of back-off.
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn a_working_session_resets_the_failure_count() {
        let script = std::cell::RefCell::new(vec![
            Err(CamError::NoAdapter),
            link_lost(1, 0),
            Err(CamError::Discovery("gone".into())),
            Err(CamError::Discovery("gone".into())),
            Ok(AttemptOutcome::Quit),
        ]);
        let result = supervise(policy(2), |_| {
            let next = script.borrow_mut().remove(0);
            async move { next }
        })
        .await;
        assert!(result.is_ok());
        assert!(script.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn links_that_drop_at_once_exhaust_the_retries() {
        let start = tokio::time::Instant::now();
        let mut calls = 0;
        let result = supervise(policy(2), |_| {
            calls += 1;
            async { link_lost(0, 1) }
        })
        .await;
        assert!(matches!(result, Err(CamError::Connection(ref m)) if m.contains("right after")));
        assert_eq!(calls, 3);
        // 2 + 4 seconds of back-off.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn a_long_session_counts_as_working_without_images() {
        let script = std::cell::RefCell::new(vec![
            link_lost(0, 45),
            link_lost(0, 45),
            link_lost(0, 45),
            Ok(AttemptOutcome::Quit),
        ]);
        let result = supervise(policy(1), |_| {
            let next = script.borrow_mut().remove(0);
            async move { next }
        })
        .await;
        assert!(result.is_ok());
        assert!(script.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn file_write_errors_are_never_retried() {
        let mut calls = 0;
        let result = supervise(policy(5), |_| {
            calls += 1;
            async {
                Err::<AttemptOutcome, _>(CamError::FileWrite {
                    path: PathBuf::from("output/1"),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                })
            }
        })
        .await;
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_stops_after_a_lost_link() {
        let mut calls = 0;
        let result = supervise(ReconnectPolicy::NEVER, |_| {
            calls += 1;
            async { link_lost(0, 0) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn quit_before_connecting_returns_immediately() {
        let (_tx, rx) = watch::channel(true);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let outcome = drive_link(
            CamClientConfig::default(),
            Some(SimConfig::default()),
            rx,
            Arc::new(Mutex::new(cmd_rx)),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome, AttemptOutcome::Quit);
    }
}
