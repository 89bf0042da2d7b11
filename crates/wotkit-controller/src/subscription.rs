use std::time::Duration;

use serde_json::Value;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, warn};

use crate::client::{Poll, ThingClient};
use crate::error::{Error, ErrorKind, Result};

/// Default interval between two polls of a subscription resource.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A message delivered by a subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A fresh event payload.
    Value(Value),
    /// A failed poll.
    Error(Error),
}

type ValueCallback = Box<dyn Fn(Value) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(Error) + Send + Sync>;

enum Sink {
    Callbacks {
        callback: ValueCallback,
        error_callback: Option<ErrorCallback>,
    },
    Channel(Sender<Notification>),
}

impl Sink {
    // Returns `false` once nobody listens anymore.
    async fn value(&self, value: Value) -> bool {
        match self {
            Self::Callbacks { callback, .. } => {
                callback(value);
                true
            }
            Self::Channel(sender) => sender.send(Notification::Value(value)).await.is_ok(),
        }
    }

    async fn error(&self, error: Error) -> bool {
        match self {
            Self::Callbacks {
                error_callback: Some(error_callback),
                ..
            } => {
                error_callback(error);
                true
            }
            Self::Callbacks { .. } => {
                warn!("{error}");
                true
            }
            Self::Channel(sender) => sender.send(Notification::Error(error)).await.is_ok(),
        }
    }
}

async fn run_subscription(
    resource: String,
    poll_interval: Duration,
    client: ThingClient,
    cancellation_token: CancellationToken,
    sink: Sink,
) {
    let mut etag: Option<String> = None;
    // Payload of the last `200` sent without `ETag`, until a poll reports
    // no new data.
    let mut repeated: Option<Value> = None;

    loop {
        let poll = tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => { break; }
            poll = client.poll(&resource, etag.as_deref()) => poll,
        };

        // An in-flight result is discarded once invalidated.
        if cancellation_token.is_cancelled() {
            break;
        }

        let listening = match poll {
            Ok(Poll::Fresh { value, etag: None }) if repeated.as_ref() == Some(&value) => true,
            Ok(Poll::Fresh { value, etag: fresh }) => {
                repeated = fresh.is_none().then(|| value.clone());
                etag = fresh;
                sink.value(value).await
            }
            Ok(Poll::Unchanged) => {
                repeated = None;
                true
            }
            Err(e) => {
                repeated = None;
                sink.error(e).await
            }
        };

        if !listening {
            warn!("Stop polling {resource}: the receiver has been dropped");
            break;
        }

        tokio::select! {
            () = cancellation_token.cancelled() => { break; }
            () = tokio::time::sleep(poll_interval) => {}
        }
    }

    debug!("Stop polling {resource}");
}

/// A long-lived subscription to an event resource.
///
/// Polling starts with [`EventSubscription::start`] or
/// [`EventSubscription::stream`] and runs on its own task until the
/// subscription is invalidated or dropped.
pub struct EventSubscription {
    resource: String,
    poll_interval: Duration,
    client: ThingClient,
    error_callback: Option<ErrorCallback>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("resource", &self.resource)
            .field("poll_interval", &self.poll_interval)
            .field("is_valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl EventSubscription {
    pub(crate) fn new(resource: String, poll_interval: Duration, client: ThingClient) -> Self {
        Self {
            resource,
            poll_interval,
            client,
            error_callback: None,
            cancellation_token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Sets the callback invoked on failed polls.
    ///
    /// Without it, failed polls are logged.
    #[must_use]
    pub fn on_error(mut self, error_callback: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.error_callback = Some(Box::new(error_callback));
        self
    }

    /// Returns the absolute URL of the subscription resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Starts polling, delivering every fresh payload to `callback`
    /// exactly once.
    ///
    /// A device that keeps answering `200` with the same payload and no
    /// `ETag` delivers it once.
    ///
    /// # Errors
    ///
    /// The subscription is already started or has been invalidated.
    pub fn start(&mut self, callback: impl Fn(Value) + Send + Sync + 'static) -> Result<()> {
        let sink = Sink::Callbacks {
            callback: Box::new(callback),
            error_callback: self.error_callback.take(),
        };
        self.spawn(sink)
    }

    /// Starts polling, delivering notifications over a bounded channel.
    ///
    /// Polling stops when the receiver is dropped.
    ///
    /// # Errors
    ///
    /// The subscription is already started or has been invalidated.
    pub fn stream(&mut self, buffer: usize) -> Result<Receiver<Notification>> {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        self.spawn(Sink::Channel(sender))?;
        Ok(receiver)
    }

    fn spawn(&mut self, sink: Sink) -> Result<()> {
        if self.handle.is_some() || !self.is_valid() {
            return Err(Error::new(
                ErrorKind::Subscription,
                format!(
                    "The subscription to {} is already started or invalidated",
                    self.resource
                ),
            ));
        }

        self.handle = Some(tokio::spawn(run_subscription(
            self.resource.clone(),
            self.poll_interval,
            self.client.clone(),
            self.cancellation_token.clone(),
            sink,
        )));
        Ok(())
    }

    /// Checks whether the subscription has not been invalidated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    /// Stops polling. A poll in flight is discarded.
    pub fn invalidate(&self) {
        self.cancellation_token.cancel();
    }

    /// Stops polling and waits for the polling task to terminate.
    pub async fn shutdown(&mut self) {
        self.invalidate();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!("The subscription to {} terminated abnormally: {e}", self.resource);
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
