use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};

/// Default interval between two probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Default timeout of a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A network endpoint to monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl Target {
    /// Creates a [`Target`].
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::new(
                ErrorKind::Configuration,
                format!("`{s}` is not in the `host:port` format"),
            )
        };

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Target {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

/// A reachability check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Checks whether the target answers within a bounded time.
    async fn is_reachable(&self, target: &Target) -> bool;
}

/// Checks reachability by opening a `TCP` connection.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a [`TcpProbe`].
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn is_reachable(&self, target: &Target) -> bool {
        matches!(
            tokio::time::timeout(
                self.timeout,
                TcpStream::connect((target.host.as_str(), target.port))
            )
            .await,
            Ok(Ok(_))
        )
    }
}

/// Checks reachability with a single `ICMP` echo sent by the system `ping`.
///
/// The port of the target is ignored.
#[derive(Debug, Clone, Copy)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    /// Creates a [`PingProbe`].
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn is_reachable(&self, target: &Target) -> bool {
        // `ping` waits whole seconds.
        let wait = self.timeout.as_secs().max(1).to_string();

        let status = Command::new("ping")
            .args(["-c", "1", "-W", wait.as_str()])
            .arg(&target.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.timeout + Duration::from_secs(1), status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!("Impossible to run `ping`: {e}");
                false
            }
            Err(_) => false,
        }
    }
}

/// Liveness of a monitored target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Liveness {
    /// The target answers.
    #[default]
    Up,
    /// The target does not answer.
    Down,
}

/// An edge between two [`Liveness`] states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Up` to `Down`.
    Failed,
    /// `Down` to `Up`.
    Restarted,
}

impl Liveness {
    /// Records a probe result and returns the transition it causes, if any.
    pub fn observe(&mut self, reachable: bool) -> Option<Transition> {
        match (*self, reachable) {
            (Self::Up, false) => {
                *self = Self::Down;
                Some(Transition::Failed)
            }
            (Self::Down, true) => {
                *self = Self::Up;
                Some(Transition::Restarted)
            }
            _ => None,
        }
    }
}

type Callback = Box<dyn Fn() + Send + Sync>;

struct Callbacks {
    on_failure: Option<Callback>,
    on_restart: Option<Callback>,
}

async fn run_detector(
    target: Target,
    interval: Duration,
    probe: Arc<dyn Probe>,
    failed: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
    callbacks: Callbacks,
) {
    let mut liveness = Liveness::default();

    loop {
        let reachable = tokio::select! {
            () = cancellation_token.cancelled() => { break; }
            reachable = probe.is_reachable(&target) => reachable,
        };

        // No callbacks once invalidated.
        if cancellation_token.is_cancelled() {
            break;
        }

        match liveness.observe(reachable) {
            Some(Transition::Failed) => {
                failed.store(true, Ordering::SeqCst);
                warn!("{target} is down");
                if let Some(on_failure) = &callbacks.on_failure {
                    on_failure();
                }
            }
            Some(Transition::Restarted) => {
                failed.store(false, Ordering::SeqCst);
                info!("{target} is up again");
                if let Some(on_restart) = &callbacks.on_restart {
                    on_restart();
                }
            }
            None => {}
        }

        tokio::select! {
            () = cancellation_token.cancelled() => { break; }
            () = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Stop monitoring {target}");
}

/// Monitors the liveness of a target on its own task.
///
/// A target is considered up until the first failed probe. `on_failure` is
/// called once each time the target goes down and `on_restart` once each
/// time it comes back.
pub struct FailureDetector {
    target: Target,
    interval: Duration,
    callbacks: Option<Callbacks>,
    failed: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FailureDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureDetector")
            .field("target", &self.target)
            .field("interval", &self.interval)
            .field("is_failed", &self.is_failed())
            .field("is_valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl FailureDetector {
    /// Creates a [`FailureDetector`] for a target.
    #[must_use]
    pub fn new(target: Target) -> Self {
        Self {
            target,
            interval: DEFAULT_PROBE_INTERVAL,
            callbacks: Some(Callbacks {
                on_failure: None,
                on_restart: None,
            }),
            failed: Arc::new(AtomicBool::new(false)),
            cancellation_token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Sets the interval between two probes.
    #[must_use]
    #[inline]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the callback invoked when the target goes down.
    #[must_use]
    pub fn on_failure(mut self, on_failure: impl Fn() + Send + Sync + 'static) -> Self {
        if let Some(callbacks) = &mut self.callbacks {
            callbacks.on_failure = Some(Box::new(on_failure));
        }
        self
    }

    /// Sets the callback invoked when the target comes back.
    #[must_use]
    pub fn on_restart(mut self, on_restart: impl Fn() + Send + Sync + 'static) -> Self {
        if let Some(callbacks) = &mut self.callbacks {
            callbacks.on_restart = Some(Box::new(on_restart));
        }
        self
    }

    /// Returns the monitored target.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Starts probing on a new task.
    ///
    /// A detector can only be started once.
    pub fn start(&mut self, probe: Arc<dyn Probe>) {
        let Some(callbacks) = self.callbacks.take() else {
            warn!("The failure detector for {} is already started", self.target);
            return;
        };

        self.handle = Some(tokio::spawn(run_detector(
            self.target.clone(),
            self.interval,
            probe,
            self.failed.clone(),
            self.cancellation_token.clone(),
            callbacks,
        )));
    }

    /// Checks whether the target is currently considered down.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Checks whether the detector has not been invalidated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    /// Stops probing. No callback is invoked afterwards.
    pub fn invalidate(&self) {
        self.cancellation_token.cancel();
    }

    /// Stops probing and waits for the probing task to terminate.
    pub async fn shutdown(&mut self) {
        self.invalidate();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!("The failure detector for {} terminated abnormally: {e}", self.target);
        }
    }
}

impl Drop for FailureDetector {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
