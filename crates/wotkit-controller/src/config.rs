use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wotkit::namespace::is_absolute_iri;

use crate::error::{Error, ErrorKind, Result};
use crate::failure::{PingProbe, Probe, Target, TcpProbe};
use crate::oracle::{DEFAULT_SPARQL_ENDPOINT, EquivalenceOracle, StaticOracle};
use crate::thing::Capabilities;

const WOT: &str = "http://www.matthias-fisch.de/ontologies/wot#";
const DBPEDIA_RESOURCE: &str = "http://dbpedia.org/resource/";
const DBPEDIA_ONTOLOGY: &str = "http://dbpedia.org/ontology/";

fn configuration_error(description: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Configuration, description)
}

/// The semantic identifiers the alarm scenario is expressed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    /// Event fired when the door opens.
    pub door_open_event: String,
    /// Property telling whether entering is permitted.
    pub entry_permission: String,
    /// Event fired when someone authenticates.
    pub authentication_event: String,
    /// Action playing a welcome sound.
    pub welcome_action: String,
    /// Action raising the alarm.
    pub alarm_action: String,
    /// Domain of sound file tags.
    pub sound_file: String,
    /// Range selecting the welcome sound.
    pub welcome_sound: String,
    /// Domain of duration annotations.
    pub duration: String,
    /// Unit range for seconds.
    pub second: String,
    /// Unit range for milliseconds.
    pub millisecond: String,
    /// Domain of colour tags.
    pub colour: String,
    /// Range selecting the alarm colour.
    pub alarm_colour: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            door_open_event: format!("{WOT}DoorOpenEvent"),
            entry_permission: format!("{WOT}DoorEntryPermission"),
            authentication_event: format!("{WOT}AuthenticationEvent"),
            welcome_action: format!("{WOT}PlayWelcomeAction"),
            alarm_action: format!("{WOT}AlarmAction"),
            sound_file: format!("{WOT}SoundFile"),
            welcome_sound: format!("{WOT}WelcomeSound"),
            duration: format!("{WOT}Duration"),
            second: format!("{DBPEDIA_RESOURCE}Second"),
            millisecond: format!("{DBPEDIA_RESOURCE}Millisecond"),
            colour: format!("{DBPEDIA_ONTOLOGY}Colour"),
            alarm_colour: format!("{DBPEDIA_RESOURCE}Red"),
        }
    }
}

impl Vocabulary {
    /// Capabilities a door must offer.
    #[must_use]
    pub fn door(&self) -> Capabilities {
        Capabilities::new().event(&self.door_open_event)
    }

    /// Capabilities an authenticator must offer.
    #[must_use]
    pub fn authenticator(&self) -> Capabilities {
        Capabilities::new().property(&self.entry_permission)
    }

    /// Capabilities an alarm source must offer.
    #[must_use]
    pub fn alarm_source(&self) -> Capabilities {
        Capabilities::new().action(&self.alarm_action)
    }
}

/// The liveness probe used by failure detectors and host scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// A bounded `TCP` connect.
    #[default]
    Tcp,
    /// A single `ICMP` echo through the system `ping`.
    Ping,
}

impl ProbeKind {
    /// Builds the probe.
    #[must_use]
    pub fn build(self, timeout: Duration) -> Arc<dyn Probe> {
        match self {
            Self::Tcp => Arc::new(TcpProbe::new(timeout)),
            Self::Ping => Arc::new(PingProbe::new(timeout)),
        }
    }
}

/// The semantic equivalence service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleConfig {
    /// Offline equivalence links.
    Static {
        /// Pairs of equivalent IRIs.
        #[serde(default)]
        links: Vec<(String, String)>,
    },
    /// A `SPARQL` endpoint, available with the `sparql` feature.
    Sparql {
        /// Endpoint URL.
        #[serde(default = "default_endpoint")]
        endpoint: String,
    },
}

fn default_endpoint() -> String {
    DEFAULT_SPARQL_ENDPOINT.into()
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self::Static { links: Vec::new() }
    }
}

impl OracleConfig {
    /// Builds the oracle.
    ///
    /// # Errors
    ///
    /// A `SPARQL` oracle is requested without the `sparql` feature, or its
    /// `HTTP` client could not be built.
    pub fn build(&self, timeout: Duration) -> Result<Arc<dyn EquivalenceOracle>> {
        match self {
            Self::Static { links } => {
                let mut oracle = StaticOracle::new();
                for (a, b) in links {
                    oracle.link(a, b);
                }
                Ok(Arc::new(oracle))
            }
            #[cfg(feature = "sparql")]
            Self::Sparql { endpoint } => {
                use crate::oracle::{CachedOracle, SparqlOracle};
                Ok(Arc::new(CachedOracle::new(SparqlOracle::new(
                    endpoint.as_str(),
                    timeout,
                )?)))
            }
            #[cfg(not(feature = "sparql"))]
            Self::Sparql { .. } => {
                let _ = timeout;
                Err(configuration_error(
                    "A SPARQL oracle requires the `sparql` feature",
                ))
            }
        }
    }
}

const fn default_auth_ttl_secs() -> u64 {
    20
}

const fn default_alarm_duration_secs() -> u64 {
    30
}

const fn default_probe_interval_ms() -> u64 {
    500
}

const fn default_poll_interval_ms() -> u64 {
    200
}

const fn default_request_timeout_ms() -> u64 {
    2000
}

const fn default_retry_interval_secs() -> u64 {
    30
}

/// The configuration of an [`crate::orchestrator::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Description URL of the door.
    pub door_url: String,
    /// Description URL of the authenticator.
    pub authenticator_url: String,
    /// Description URL of the alarm source.
    pub alarm_source_url: String,
    /// Hosts probed when a replacement is needed.
    #[serde(default)]
    pub candidates: Vec<Target>,
    /// How long an authentication permits entering.
    #[serde(default = "default_auth_ttl_secs")]
    pub auth_ttl_secs: u64,
    /// Requested alarm duration.
    #[serde(default = "default_alarm_duration_secs")]
    pub alarm_duration_secs: u64,
    /// Interval between two liveness probes.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Interval between two event polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout of every request and probe.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Interval between two attempts to bind unbound roles, `0` disables
    /// the retries.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Liveness probe.
    #[serde(default)]
    pub probe: ProbeKind,
    /// Semantic equivalence service.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Semantic identifiers.
    #[serde(default)]
    pub vocabulary: Vocabulary,
}

impl OrchestratorConfig {
    /// Creates a configuration with default settings.
    pub fn new(
        door_url: impl Into<String>,
        authenticator_url: impl Into<String>,
        alarm_source_url: impl Into<String>,
    ) -> Self {
        Self {
            door_url: door_url.into(),
            authenticator_url: authenticator_url.into(),
            alarm_source_url: alarm_source_url.into(),
            candidates: Vec::new(),
            auth_ttl_secs: default_auth_ttl_secs(),
            alarm_duration_secs: default_alarm_duration_secs(),
            probe_interval_ms: default_probe_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_interval_secs: default_retry_interval_secs(),
            probe: ProbeKind::default(),
            oracle: OracleConfig::default(),
            vocabulary: Vocabulary::default(),
        }
    }

    /// Sets the replacement candidates.
    #[must_use]
    pub fn candidates(mut self, candidates: impl IntoIterator<Item = Target>) -> Self {
        self.candidates = candidates.into_iter().collect();
        self
    }

    /// Sets the oracle.
    #[must_use]
    pub fn oracle(mut self, oracle: OracleConfig) -> Self {
        self.oracle = oracle;
        self
    }

    /// Decodes and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// The document is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| configuration_error(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the consistency of the configuration.
    ///
    /// # Errors
    ///
    /// A device URL is not an absolute `HTTP` URL, or an interval is zero.
    pub fn validate(&self) -> Result<()> {
        for (role, url) in [
            ("door", &self.door_url),
            ("authenticator", &self.authenticator_url),
            ("alarm source", &self.alarm_source_url),
        ] {
            if !is_absolute_iri(url) || !url.to_ascii_lowercase().starts_with("http://") {
                return Err(configuration_error(format!(
                    "The {role} URL `{url}` is not an absolute HTTP URL"
                )));
            }
        }

        for (name, value) in [
            ("probe_interval_ms", self.probe_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(configuration_error(format!("`{name}` must be positive")));
            }
        }

        Ok(())
    }

    /// Authentication time-to-live.
    #[must_use]
    pub const fn auth_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_ttl_secs)
    }

    /// Probe interval.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Request and probe timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Retry interval for unbound roles, if enabled.
    #[must_use]
    pub const fn retry_interval(&self) -> Option<Duration> {
        if self.retry_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.retry_interval_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::ErrorKind;
    use crate::failure::Target;
    use crate::oracle::{DEFAULT_SPARQL_ENDPOINT, EquivalenceOracle};

    use super::{OracleConfig, OrchestratorConfig, ProbeKind, Vocabulary};

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::from_json(
            r#"{
                "door_url": "http://192.168.42.100:8080/",
                "authenticator_url": "http://192.168.43.171:5000/td/door_control",
                "alarm_source_url": "http://192.168.43.171:5000/td/speaker"
            }"#,
        )
        .unwrap();

        assert_eq!(config.auth_ttl(), Duration::from_secs(20));
        assert_eq!(config.alarm_duration_secs, 30);
        assert_eq!(config.probe_interval(), Duration::from_millis(500));
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
        assert_eq!(config.retry_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.probe, ProbeKind::Tcp);
        assert_eq!(config.oracle, OracleConfig::default());
        assert_eq!(config.vocabulary, Vocabulary::default());
        assert!(config.candidates.is_empty());
        assert_eq!(
            config,
            OrchestratorConfig::new(
                "http://192.168.42.100:8080/",
                "http://192.168.43.171:5000/td/door_control",
                "http://192.168.43.171:5000/td/speaker"
            )
        );
    }

    #[test]
    fn overrides() {
        let config = OrchestratorConfig::from_json(
            r#"{
                "door_url": "http://192.168.42.100:8080/",
                "authenticator_url": "http://192.168.43.171:5000/td/door_control",
                "alarm_source_url": "http://192.168.43.171:5000/td/speaker",
                "candidates": ["192.168.43.153:80", "192.168.43.154:5000"],
                "retry_interval_secs": 0,
                "probe": "ping",
                "oracle": {"kind": "sparql"},
                "vocabulary": {"alarm_colour": "http://dbpedia.org/resource/Blue"}
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.candidates,
            vec![
                Target::new("192.168.43.153", 80),
                Target::new("192.168.43.154", 5000)
            ]
        );
        assert_eq!(config.retry_interval(), None);
        assert_eq!(config.probe, ProbeKind::Ping);
        assert_eq!(
            config.oracle,
            OracleConfig::Sparql {
                endpoint: DEFAULT_SPARQL_ENDPOINT.into()
            }
        );
        assert_eq!(config.vocabulary.alarm_colour, "http://dbpedia.org/resource/Blue");
        assert_eq!(
            config.vocabulary.alarm_action,
            "http://www.matthias-fisch.de/ontologies/wot#AlarmAction"
        );
    }

    #[test]
    fn invalid() {
        for json in [
            r#"{"door_url": "http://h:1/"}"#,
            r#"{"door_url": "h:1", "authenticator_url": "http://h:2/", "alarm_source_url": "http://h:3/"}"#,
            r#"{"door_url": "coap://h:1", "authenticator_url": "http://h:2/", "alarm_source_url": "http://h:3/"}"#,
            r#"{"door_url": "http://h:1/", "authenticator_url": "http://h:2/", "alarm_source_url": "http://h:3/", "candidates": ["h"]}"#,
            r#"{"door_url": "http://h:1/", "authenticator_url": "http://h:2/", "alarm_source_url": "http://h:3/", "poll_interval_ms": 0}"#,
        ] {
            assert_eq!(
                OrchestratorConfig::from_json(json).unwrap_err().kind(),
                ErrorKind::Configuration,
                "{json}"
            );
        }
    }

    #[test]
    fn role_capabilities() {
        let vocabulary = Vocabulary::default();
        assert_eq!(
            vocabulary.door().events,
            vec!["http://www.matthias-fisch.de/ontologies/wot#DoorOpenEvent"]
        );
        assert_eq!(
            vocabulary.authenticator().properties,
            vec!["http://www.matthias-fisch.de/ontologies/wot#DoorEntryPermission"]
        );
        assert!(vocabulary.alarm_source().events.is_empty());
    }

    #[tokio::test]
    async fn static_oracle_links() {
        let oracle = OracleConfig::Static {
            links: vec![("http://a.org/A".into(), "http://b.org/B".into())],
        }
        .build(Duration::from_secs(1))
        .unwrap();

        assert!(oracle.equivalent("http://b.org/B", "http://a.org/A").await.unwrap());
    }
}
