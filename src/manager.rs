//! Connection manager.
//!
//! Owns the lifecycle of every configured scale: one task per address,
//! each looping through scan, session, and backoff. Scales are only reachable
//! while someone interacts with them, so connection failure is the
//! steady state and the loops retry forever; only the interval grows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::ble::BleScanner;
use crate::config::{Config, DeviceConfig};
use crate::error::Result;
use crate::plugins::PluginDispatcher;
use crate::session::{ScaleSession, SessionSummary};

/// How long one scan pass waits for the scale to advertise.
pub const SCAN_WINDOW: Duration = Duration::from_secs(30);

/// First retry delay after a failure.
pub const BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Upper bound on the retry delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Consecutive failures before the condition is reported at high severity.
const FAILURES_BEFORE_ESCALATION: u32 = 5;

/// Failure count whose delay already sits at the cap.
const CAPPED_FAILURES: u32 = 8;

/// Services all configured scales until shut down.
///
/// Sessions for distinct addresses run concurrently; per address they are
/// strictly sequential, which is what guarantees at most one BLE link per
/// scale. All sessions share one [`PluginDispatcher`].
pub struct ConnectionManager {
    config: Config,
    dispatcher: Arc<PluginDispatcher>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionManager {
    /// Create a manager for the configured devices.
    pub fn new(config: Config, dispatcher: Arc<PluginDispatcher>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            dispatcher,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Request a graceful shutdown.
    ///
    /// In-flight sessions abandon their transfer without dispatching
    /// partial data and release their links.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Service every configured scale until shutdown.
    pub async fn run(&self) -> Result<()> {
        let scanner = Arc::new(BleScanner::new().await?);
        let heights = self.config.person_heights();

        let mut handles = Vec::with_capacity(self.config.devices.len());

        for device in self.config.devices.clone() {
            let scanner = scanner.clone();
            let dispatcher = self.dispatcher.clone();
            let heights = heights.clone();
            let shutdown = self.shutdown_rx.clone();
            let runner_device = device.clone();

            handles.push(tokio::spawn(async move {
                let session_shutdown = shutdown.clone();

                let run_session = move || {
                    let scanner = scanner.clone();
                    let dispatcher = dispatcher.clone();
                    let heights = heights.clone();
                    let device = runner_device.clone();
                    let shutdown = session_shutdown.clone();

                    async move {
                        let peripheral = scanner
                            .find_device(&device.mac_address, SCAN_WINDOW)
                            .await?;

                        let mut session =
                            ScaleSession::new(peripheral, &device, heights, shutdown);
                        session.run(dispatcher.as_ref()).await
                    }
                };

                service_device(device, shutdown, run_session).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("All device loops stopped");
        Ok(())
    }
}

/// The scan, session, backoff loop for one scale.
///
/// Generic over the session runner; tests inject a scripted runner in
/// place of real BLE sessions.
async fn service_device<F, Fut>(
    device: DeviceConfig,
    mut shutdown: watch::Receiver<bool>,
    mut run_session: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SessionSummary>>,
{
    let mut backoff = Backoff::new();

    info!("Servicing scale {}", device.display_name());

    loop {
        if *shutdown.borrow() {
            break;
        }

        match run_session().await {
            Ok(summary) if summary.interrupted => break,
            Ok(summary) => {
                if summary.dispatched > 0 {
                    info!(
                        "Scale {}: session complete, {} measurements dispatched",
                        device.display_name(),
                        summary.dispatched
                    );
                } else {
                    debug!("Scale {}: session complete, no records", device.display_name());
                }

                if summary.dispatched > 0 && !summary.acknowledged {
                    warn!(
                        "Scale {}: transfer not acknowledged, duplicates expected next session",
                        device.display_name()
                    );
                }

                backoff.reset();
            }
            Err(e) if e.is_fatal_configuration() => {
                error!(
                    "Scale {} looks misconfigured, retrying only at the long interval: {}",
                    device.display_name(),
                    e
                );
                backoff.escalate();
            }
            Err(e) => {
                backoff.record_failure();

                if backoff.failures() >= FAILURES_BEFORE_ESCALATION {
                    error!(
                        "Scale {}: still unreachable after {} attempts: {}",
                        device.display_name(),
                        backoff.failures(),
                        e
                    );
                } else {
                    debug!("Scale {}: session failed: {}", device.display_name(), e);
                }
            }
        }

        let delay = backoff.delay();
        debug!(
            "Scale {}: next attempt in {:.1}s",
            device.display_name(),
            delay.as_secs_f64()
        );

        tokio::select! {
            _ = sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Stopped servicing scale {}", device.display_name());
}

/// Exponential backoff with jitter.
#[derive(Debug)]
struct Backoff {
    consecutive_failures: u32,
}

impl Backoff {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
        }
    }

    fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Jump straight to the capped interval.
    fn escalate(&mut self) {
        self.consecutive_failures = self.consecutive_failures.max(CAPPED_FAILURES);
    }

    fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current delay: base × 2^(failures-1), capped, with ±20% jitter.
    ///
    /// Zero failures (the idle wait after a successful session) uses the
    /// base interval.
    fn delay(&self) -> Duration {
        let exponent = self.consecutive_failures.saturating_sub(1).min(16);
        let unjittered = BACKOFF_BASE
            .saturating_mul(1u32 << exponent)
            .min(BACKOFF_CAP);

        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        unjittered.mul_f64(jitter)
    }
}
