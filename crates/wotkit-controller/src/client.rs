use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};

use serde_json::Value;

use tracing::debug;

use wotkit::description::{Document, ThingDescription, join};
use wotkit::namespace::is_absolute_iri;
use wotkit::payload::ValueEnvelope;

use crate::error::{Error, ErrorKind, Result};

/// Default timeout of every request sent to a device.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

const JSON: &str = "application/json";

/// The result of polling a subscription resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// A fresh value, along with its entity tag when the device sent one.
    Fresh {
        /// The unwrapped event payload.
        value: Value,
        /// The `ETag` header.
        etag: Option<String>,
    },
    /// The device has no new data.
    Unchanged,
}

fn remote_error(description: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::RemoteRequest, description)
}

/// An `HTTP` client speaking the device protocol.
///
/// Redirects are never followed, since a subscription is acknowledged
/// with a `308` pointing at the created resource.
#[derive(Debug, Clone)]
pub struct ThingClient {
    client: Client,
}

impl ThingClient {
    /// Creates a [`ThingClient`] whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// The underlying `HTTP` client could not be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Fetches the document served at a URL, either a single description
    /// or a bulletin board.
    ///
    /// # Errors
    ///
    /// The device is unreachable, answers with a failure status, or serves
    /// an invalid document.
    pub async fn fetch_document(&self, url: &str) -> Result<Document> {
        debug!("Fetch document at {url}");
        let response = Self::success(self.client.get(url).send().await?, url)?;
        let bytes = response.bytes().await?;
        Ok(Document::from_slice(&bytes)?)
    }

    /// Fetches a single description.
    ///
    /// # Errors
    ///
    /// See [`ThingClient::fetch_document`]. A bulletin board is rejected.
    pub async fn fetch_description(&self, url: &str) -> Result<ThingDescription> {
        match self.fetch_document(url).await? {
            Document::Thing(description) => Ok(description),
            Document::BulletinBoard(_) => Err(Error::new(
                ErrorKind::MalformedResponse,
                format!("{url} serves a bulletin board instead of a description"),
            )),
        }
    }

    /// Reads an enveloped value.
    ///
    /// # Errors
    ///
    /// The request fails or the body is not a `{"value": ...}` envelope.
    pub async fn get_value(&self, url: &str) -> Result<Value> {
        let response = Self::success(self.client.get(url).send().await?, url)?;
        let bytes = response.bytes().await?;
        let envelope: ValueEnvelope<Value> = serde_json::from_slice(&bytes)?;
        Ok(envelope.into_inner())
    }

    /// Sends an optional enveloped value and returns the raw answer body.
    ///
    /// # Errors
    ///
    /// The request fails or the device answers with a failure status.
    pub async fn post_value(&self, url: &str, value: Option<&Value>) -> Result<Vec<u8>> {
        let mut request = self.client.post(url);
        if let Some(value) = value {
            request = request
                .header(CONTENT_TYPE, JSON)
                .body(serde_json::to_vec(&ValueEnvelope::new(value))?);
        }

        let response = Self::success(request.send().await?, url)?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Creates a subscription resource and returns its absolute URL.
    ///
    /// A relative `Location` is resolved against `base`.
    ///
    /// # Errors
    ///
    /// The request fails, or the device does not answer with a
    /// `308 Permanent Redirect` carrying a `Location`.
    pub async fn subscribe(&self, url: &str, base: &str, config: Option<&Value>) -> Result<String> {
        let mut request = self.client.post(url);
        if let Some(config) = config {
            request = request
                .header(CONTENT_TYPE, JSON)
                .body(serde_json::to_vec(config)?);
        }

        let response = request.send().await?;
        if response.status() != StatusCode::PERMANENT_REDIRECT {
            return Err(Error::new(
                ErrorKind::Subscription,
                format!(
                    "Expected 308 Permanent Redirect subscribing to {url}, received {}",
                    response.status()
                ),
            ));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|location| location.to_str().ok())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Subscription,
                    format!("Subscription to {url} has no valid `Location`"),
                )
            })?;

        Ok(if is_absolute_iri(location) {
            location.to_owned()
        } else {
            join(base, location)
        })
    }

    /// Polls a subscription resource.
    ///
    /// # Errors
    ///
    /// The request fails, the device answers with an unexpected status,
    /// or a fresh value is not a `{"value": ...}` envelope.
    pub async fn poll(&self, url: &str, etag: Option<&str>) -> Result<Poll> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT | StatusCode::ALREADY_REPORTED | StatusCode::NOT_MODIFIED => {
                return Ok(Poll::Unchanged);
            }
            status => {
                return Err(remote_error(format!(
                    "Received {status} on request for subscribed resource {url}"
                )));
            }
        }

        let fresh_etag = response
            .headers()
            .get(ETAG)
            .and_then(|etag| etag.to_str().ok())
            .map(str::to_owned);

        if fresh_etag.is_some() && fresh_etag.as_deref() == etag {
            return Ok(Poll::Unchanged);
        }

        let bytes = response.bytes().await?;
        let envelope: ValueEnvelope<Value> = serde_json::from_slice(&bytes).map_err(|e| {
            Error::new(
                ErrorKind::MalformedResponse,
                format!("Subscribed resource {url} sent an invalid envelope: {e}"),
            )
        })?;

        Ok(Poll::Fresh {
            value: envelope.into_inner(),
            etag: fresh_etag,
        })
    }

    fn success(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(remote_error(format!("{url} answered with status {status}")))
        }
    }
}
