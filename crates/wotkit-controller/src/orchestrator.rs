use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;

use serde_json::Value;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use crate::client::ThingClient;
use crate::config::OrchestratorConfig;
use crate::discovery::{Discovery, HostScanner};
use crate::error::Result;
use crate::failure::{FailureDetector, Probe};
use crate::matcher::CapabilityMatcher;
use crate::oracle::EquivalenceOracle;
use crate::subscription::EventSubscription;
use crate::thing::{Capabilities, Thing};

/// The part a thing plays in the alarm scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reports openings.
    Door,
    /// Tells whether entering is permitted.
    Authenticator,
    /// Welcomes or raises the alarm.
    AlarmSource,
}

impl Role {
    /// Every role, in binding order.
    pub const ALL: [Self; 3] = [Self::Door, Self::Authenticator, Self::AlarmSource];

    const fn name(self) -> &'static str {
        match self {
            Self::Door => "door",
            Self::Authenticator => "authenticator",
            Self::AlarmSource => "alarm source",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A message handled by the orchestrator loop.
///
/// Signals carry the generation of the binding that produced them, so
/// signals of replaced bindings are recognized and dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The door reported an opening.
    DoorOpened {
        /// Generation of the door binding.
        generation: u64,
        /// Event payload.
        payload: Value,
    },
    /// Someone authenticated.
    Authenticated {
        /// Generation of the authenticator binding.
        generation: u64,
    },
    /// A bound thing became unreachable.
    Failed {
        /// Role of the thing.
        role: Role,
        /// Generation of its binding.
        generation: u64,
    },
    /// A bound thing became reachable again.
    Restarted {
        /// Role of the thing.
        role: Role,
        /// Generation of its binding.
        generation: u64,
    },
}

/// How a door opening has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The welcome sound has been played.
    Welcomed,
    /// The alarm has been raised.
    Alarmed,
    /// The event does not report an opening or is outdated.
    Ignored,
    /// No reaction was possible.
    Skipped,
}

/// Checks whether an event payload reports something.
///
/// `null`, `false`, zero and empty strings, arrays and objects do not.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
        Value::String(string) => !string.is_empty(),
        Value::Array(array) => !array.is_empty(),
        Value::Object(object) => !object.is_empty(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AuthState {
    authenticated_at: Option<Instant>,
}

impl AuthState {
    fn record(&mut self, at: Instant) {
        self.authenticated_at = Some(at);
    }

    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.authenticated_at
            .is_some_and(|at| now.saturating_duration_since(at) < ttl)
    }
}

struct Binding {
    thing: Thing,
    generation: u64,
    detector: Option<FailureDetector>,
    subscriptions: Vec<EventSubscription>,
}

impl Binding {
    async fn release(mut self) {
        for subscription in &mut self.subscriptions {
            subscription.shutdown().await;
        }
        if let Some(detector) = &mut self.detector {
            detector.shutdown().await;
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Binds the things of the alarm scenario and reacts to their events.
///
/// Every role is bound to a thing whose capabilities are checked against
/// the configured vocabulary. Bound things are monitored and a failed
/// thing is replaced by the first capable thing found among the
/// candidates. All state changes happen on the loop driven by
/// [`Orchestrator::run`]; subscriptions and failure detectors only send
/// [`Signal`]s to it.
pub struct Orchestrator {
    config: OrchestratorConfig,
    client: ThingClient,
    oracle: Arc<dyn EquivalenceOracle>,
    probe: Arc<dyn Probe>,
    discovery: Discovery,
    bindings: HashMap<Role, Binding>,
    generation: u64,
    auth: AuthState,
    sender: flume::Sender<Signal>,
    receiver: flume::Receiver<Signal>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = Role::ALL
            .iter()
            .filter_map(|role| {
                self.bindings
                    .get(role)
                    .map(|binding| (*role, binding.thing.source()))
            })
            .collect::<Vec<_>>();
        f.debug_struct("Orchestrator")
            .field("bound", &bound)
            .field("discovery", &self.discovery)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an [`Orchestrator`] with the oracle and probe described by
    /// the configuration.
    ///
    /// # Errors
    ///
    /// The configuration is invalid or a client could not be built.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let oracle = config.oracle.build(config.request_timeout())?;
        let probe = config.probe.build(config.request_timeout());
        Self::with_parts(config, oracle, probe)
    }

    /// Creates an [`Orchestrator`] with a custom oracle and probe.
    ///
    /// # Errors
    ///
    /// The configuration is invalid or the `HTTP` client could not be built.
    pub fn with_parts(
        config: OrchestratorConfig,
        oracle: Arc<dyn EquivalenceOracle>,
        probe: Arc<dyn Probe>,
    ) -> Result<Self> {
        config.validate()?;

        let client = ThingClient::new(config.request_timeout())?;
        let discovery = Discovery::new(
            HostScanner::new(config.candidates.iter().cloned(), probe.clone()),
            client.clone(),
            oracle.clone(),
        );
        let (sender, receiver) = flume::unbounded();

        Ok(Self {
            config,
            client,
            oracle,
            probe,
            discovery,
            bindings: HashMap::new(),
            generation: 0,
            auth: AuthState::default(),
            sender,
            receiver,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the thing bound to a role.
    #[must_use]
    pub fn binding(&self, role: Role) -> Option<&Thing> {
        self.bindings.get(&role).map(|binding| &binding.thing)
    }

    /// Returns the generation of the binding of a role.
    #[must_use]
    pub fn generation(&self, role: Role) -> Option<u64> {
        self.bindings.get(&role).map(|binding| binding.generation)
    }

    /// Checks whether a role is bound.
    #[must_use]
    pub fn is_bound(&self, role: Role) -> bool {
        self.bindings.contains_key(&role)
    }

    /// Returns a sender to inject [`Signal`]s into the loop.
    #[must_use]
    pub fn signals(&self) -> flume::Sender<Signal> {
        self.sender.clone()
    }

    /// Binds every unbound role and returns how many roles are bound.
    ///
    /// The configured thing is tried first, the candidates afterwards.
    pub async fn bind_all(&mut self) -> usize {
        for role in Role::ALL {
            if !self.is_bound(role) {
                self.bind(role).await;
            }
        }
        self.bindings.len()
    }

    /// Replaces the thing bound to a role with a discovered one.
    ///
    /// The old binding is released first, so the role stays unbound when
    /// no replacement is found.
    pub async fn failover(&mut self, role: Role) -> bool {
        if let Some(binding) = self.bindings.remove(&role) {
            warn!("The {role} at {} failed", binding.thing.source());
            binding.release().await;
        }
        self.discover(role).await
    }

    /// Records an authentication at the current instant.
    pub fn on_authentication(&mut self) {
        info!("Entering is permitted for {:?}", self.config.auth_ttl());
        self.auth.record(Instant::now());
    }

    /// Reacts to a door event.
    ///
    /// A permitted opening plays the welcome sound, any other opening
    /// raises the alarm.
    pub async fn on_door_opened(&mut self, payload: &Value) -> Outcome {
        if !is_truthy(payload) {
            debug!("Ignore the door event {payload}");
            return Outcome::Ignored;
        }

        info!("The door has been opened");

        if !self.is_bound(Role::AlarmSource) && !self.bind(Role::AlarmSource).await {
            warn!("No alarm source to react with");
            return Outcome::Skipped;
        }

        let authorized = self.is_authorized().await;

        let Some(binding) = self.bindings.get(&Role::AlarmSource) else {
            return Outcome::Skipped;
        };
        let thing = &binding.thing;
        let vocabulary = &self.config.vocabulary;
        let matcher = CapabilityMatcher::new(self.oracle.clone());

        let (action_type, matcher, outcome) = if authorized {
            (
                &vocabulary.welcome_action,
                matcher.one_of_rule(&vocabulary.sound_file, &vocabulary.welcome_sound),
                Outcome::Welcomed,
            )
        } else {
            let seconds = i64::try_from(self.config.alarm_duration_secs).unwrap_or(i64::MAX);
            (
                &vocabulary.alarm_action,
                matcher
                    .value_rule(&vocabulary.duration, &vocabulary.second, seconds)
                    .value_rule(
                        &vocabulary.duration,
                        &vocabulary.millisecond,
                        seconds.saturating_mul(1000),
                    )
                    .one_of_rule(&vocabulary.colour, &vocabulary.alarm_colour),
                Outcome::Alarmed,
            )
        };

        let Some(action) = thing.action_by_types(&[action_type]).await else {
            warn!("The alarm source at {} offers no {action_type}", thing.source());
            return Outcome::Skipped;
        };

        let input = match matcher.build_for(action.description()).await {
            Ok(input) => input,
            Err(e) => {
                warn!("Unable to build the input of {action_type}: {e}");
                return Outcome::Skipped;
            }
        };

        match action.invoke(&input).await {
            Ok(_) => {
                info!("{outcome:?} through {}", thing.source());
                outcome
            }
            Err(e) => {
                warn!("Invoking {action_type} failed: {e}");
                Outcome::Skipped
            }
        }
    }

    /// Handles a single [`Signal`].
    ///
    /// Door signals return their [`Outcome`].
    pub async fn handle(&mut self, signal: Signal) -> Option<Outcome> {
        match signal {
            Signal::DoorOpened {
                generation,
                payload,
            } => {
                if !self.is_current(Role::Door, generation) {
                    debug!("Ignore a door event of the replaced binding {generation}");
                    return Some(Outcome::Ignored);
                }
                Some(self.on_door_opened(&payload).await)
            }
            Signal::Authenticated { generation } => {
                if self.is_current(Role::Authenticator, generation) {
                    self.on_authentication();
                }
                None
            }
            Signal::Failed { role, generation } => {
                if self.is_current(role, generation) {
                    self.failover(role).await;
                } else {
                    debug!("Ignore a failure of the replaced {role} binding {generation}");
                }
                None
            }
            Signal::Restarted { role, generation } => {
                if self.is_current(role, generation) {
                    info!("The {role} is reachable again");
                }
                None
            }
        }
    }

    /// Runs the loop until cancelled, then releases every binding.
    ///
    /// Unbound roles are retried periodically unless retries are disabled.
    pub async fn run(&mut self, cancellation_token: CancellationToken) {
        self.bind_all().await;

        let receiver = self.receiver.clone();
        let mut retry = self.config.retry_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = cancellation_token.cancelled() => { break; }
                signal = receiver.recv_async() => {
                    match signal {
                        Ok(signal) => {
                            self.handle(signal).await;
                        }
                        Err(_) => break,
                    }
                }
                () = tick(retry.as_mut()) => {
                    if self.bindings.len() < Role::ALL.len() {
                        self.bind_all().await;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Releases every binding.
    pub async fn shutdown(&mut self) {
        for role in Role::ALL {
            if let Some(binding) = self.bindings.remove(&role) {
                binding.release().await;
            }
        }
    }

    fn is_current(&self, role: Role, generation: u64) -> bool {
        self.generation(role) == Some(generation)
    }

    fn capabilities(&self, role: Role) -> Capabilities {
        let vocabulary = &self.config.vocabulary;
        match role {
            Role::Door => vocabulary.door(),
            Role::Authenticator => vocabulary.authenticator(),
            Role::AlarmSource => vocabulary.alarm_source(),
        }
    }

    fn configured_url(&self, role: Role) -> &str {
        match role {
            Role::Door => &self.config.door_url,
            Role::Authenticator => &self.config.authenticator_url,
            Role::AlarmSource => &self.config.alarm_source_url,
        }
    }

    async fn is_authorized(&self) -> bool {
        if self.auth.is_fresh(Instant::now(), self.config.auth_ttl()) {
            debug!("A recent authentication permits entering");
            return true;
        }

        let Some(binding) = self.bindings.get(&Role::Authenticator) else {
            warn!("No authenticator to ask for the entry permission");
            return false;
        };

        let Some(permission) = binding
            .thing
            .property_by_types(&[&self.config.vocabulary.entry_permission])
            .await
        else {
            warn!("The authenticator at {} offers no entry permission", binding.thing.source());
            return false;
        };

        match permission.value().await {
            Ok(value) => is_truthy(&value),
            Err(e) => {
                warn!("Unable to read the entry permission: {e}");
                false
            }
        }
    }

    async fn bind(&mut self, role: Role) -> bool {
        let url = self.configured_url(role).to_owned();
        let capabilities = self.capabilities(role);

        match Thing::fetch(&url, self.client.clone(), self.oracle.clone()).await {
            Ok(thing) if thing.satisfies(&capabilities).await => {
                if self.install(role, thing).await {
                    return true;
                }
            }
            Ok(_) => warn!("The {role} at {url} lacks the required capabilities"),
            Err(e) => warn!("Unable to bind the {role} at {url}: {e}"),
        }

        self.discover(role).await
    }

    // Candidates whose installation fails are skipped.
    async fn discover(&mut self, role: Role) -> bool {
        let capabilities = self.capabilities(role);
        for thing in self.discovery.find_all(&capabilities).await {
            let source = thing.source().to_owned();
            if self.install(role, thing).await {
                return true;
            }
            warn!("Skip the {role} candidate {source}");
        }
        warn!("No reachable thing can act as the {role}");
        false
    }

    async fn install(&mut self, role: Role, thing: Thing) -> bool {
        if let Some(binding) = self.bindings.remove(&role) {
            binding.release().await;
        }

        self.generation += 1;
        let generation = self.generation;
        let mut subscriptions = Vec::new();

        match role {
            Role::Door => {
                let door_open_event = self.config.vocabulary.door_open_event.clone();
                match self
                    .subscribe(&thing, &door_open_event, move |payload| {
                        Some(Signal::DoorOpened {
                            generation,
                            payload,
                        })
                    })
                    .await
                {
                    Ok(Some(subscription)) => subscriptions.push(subscription),
                    Ok(None) => {
                        warn!("The door at {} offers no {door_open_event}", thing.source());
                        return false;
                    }
                    Err(e) => {
                        warn!("Unable to subscribe to the door at {}: {e}", thing.source());
                        return false;
                    }
                }
            }
            Role::Authenticator => {
                let authentication_event = self.config.vocabulary.authentication_event.clone();
                match self
                    .subscribe(&thing, &authentication_event, move |payload| {
                        // A rejected authentication grants nothing.
                        is_truthy(&payload).then_some(Signal::Authenticated { generation })
                    })
                    .await
                {
                    Ok(Some(subscription)) => subscriptions.push(subscription),
                    Ok(None) => debug!(
                        "The authenticator at {} offers no authentication event",
                        thing.source()
                    ),
                    Err(e) => warn!(
                        "Unable to subscribe to the authenticator at {}: {e}",
                        thing.source()
                    ),
                }
            }
            Role::AlarmSource => {}
        }

        let detector = match thing.target() {
            Some(target) => {
                let failed = self.sender.clone();
                let restarted = self.sender.clone();
                let mut detector = FailureDetector::new(target)
                    .interval(self.config.probe_interval())
                    .on_failure(move || {
                        let _ = failed.send(Signal::Failed { role, generation });
                    })
                    .on_restart(move || {
                        let _ = restarted.send(Signal::Restarted { role, generation });
                    });
                detector.start(self.probe.clone());
                Some(detector)
            }
            None => {
                warn!("The {role} at {} cannot be monitored", thing.source());
                None
            }
        };

        info!("Bound the {role} to {} (binding {generation})", thing.source());

        self.bindings.insert(
            role,
            Binding {
                thing,
                generation,
                detector,
                subscriptions,
            },
        );
        true
    }

    async fn subscribe(
        &self,
        thing: &Thing,
        semantic_type: &str,
        signal: impl Fn(Value) -> Option<Signal> + Send + Sync + 'static,
    ) -> Result<Option<EventSubscription>> {
        let Some(event) = thing.event_by_types(&[semantic_type]).await else {
            return Ok(None);
        };

        let source = thing.source().to_owned();
        let mut subscription = event
            .subscribe(None, self.config.poll_interval())
            .await?
            .on_error(move |e| warn!("Polling an event of {source} failed: {e}"));

        let sender = self.sender.clone();
        subscription.start(move |payload| {
            let Some(signal) = signal(payload) else {
                return;
            };
            if sender.send(signal).is_err() {
                debug!("The orchestrator stopped listening");
            }
        })?;

        Ok(Some(subscription))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use serial_test::serial;

    use tokio_util::sync::CancellationToken;

    use crate::config::OrchestratorConfig;
    use crate::failure::{Probe, Target};
    use crate::oracle::StaticOracle;
    use crate::tests::{
        MockThing, SwitchProbe, authenticator_description, door_description, init_tracing,
        speaker_description,
    };

    use super::{Orchestrator, Outcome, Role, Signal, is_truthy};

    const UNREACHABLE: &str = "http://127.0.0.1:1/";

    struct Site {
        door: MockThing,
        authenticator: MockThing,
        speaker: MockThing,
    }

    impl Site {
        async fn start() -> Self {
            init_tracing();
            Self {
                door: MockThing::start(door_description).await,
                authenticator: MockThing::start(authenticator_description).await,
                speaker: MockThing::start(speaker_description).await,
            }
        }

        fn config(&self) -> OrchestratorConfig {
            fast(OrchestratorConfig::new(
                format!("{}/", self.door.url()),
                format!("{}/", self.authenticator.url()),
                format!("{}/", self.speaker.url()),
            ))
        }
    }

    fn fast(mut config: OrchestratorConfig) -> OrchestratorConfig {
        config.probe_interval_ms = 20;
        config.poll_interval_ms = 20;
        config.request_timeout_ms = 500;
        config.retry_interval_secs = 0;
        config
    }

    fn new_orchestrator(config: OrchestratorConfig, probe: Arc<dyn Probe>) -> Orchestrator {
        Orchestrator::with_parts(config, Arc::new(StaticOracle::new()), probe).unwrap()
    }

    fn reachable() -> Arc<dyn Probe> {
        Arc::new(SwitchProbe::new(true))
    }

    #[test]
    fn truthiness() {
        for value in [json!(true), json!(1), json!(-0.5), json!("yes"), json!([0]), json!({"a": 1})] {
            assert!(is_truthy(&value), "{value}");
        }
        for value in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&value), "{value}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn binds_the_configured_things() {
        let site = Site::start().await;
        let mut orchestrator = new_orchestrator(site.config(), reachable());

        assert_eq!(orchestrator.bind_all().await, 3);
        assert_eq!(
            orchestrator.binding(Role::Door).unwrap().source(),
            format!("{}/", site.door.url())
        );
        assert_eq!(orchestrator.generation(Role::Door), Some(1));
        assert_eq!(orchestrator.generation(Role::Authenticator), Some(2));
        assert_eq!(orchestrator.generation(Role::AlarmSource), Some(3));

        // The door event and the optional authentication event.
        assert_eq!(site.door.subscriptions(), 1);
        assert_eq!(site.authenticator.subscriptions(), 1);

        orchestrator.shutdown().await;
        assert!(!orchestrator.is_bound(Role::Door));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn alarm_without_permission() {
        let site = Site::start().await;
        let mut orchestrator = new_orchestrator(site.config(), reachable());
        orchestrator.bind_all().await;

        assert_eq!(orchestrator.on_door_opened(&json!(true)).await, Outcome::Alarmed);
        assert_eq!(
            site.speaker.invocations("/alarm"),
            vec![json!({"value": {"duration": 30, "colour": "#ff0000"}})]
        );
        assert!(site.speaker.invocations("/welcome").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn welcome_with_permission() {
        let site = Site::start().await;
        site.authenticator.set_property("/isauth", json!(true));
        let mut orchestrator = new_orchestrator(site.config(), reachable());
        orchestrator.bind_all().await;

        assert_eq!(orchestrator.on_door_opened(&json!(true)).await, Outcome::Welcomed);
        assert_eq!(
            site.speaker.invocations("/welcome"),
            vec![json!({"value": "welcome.mp3"})]
        );
        assert!(site.speaker.invocations("/alarm").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn authentication_expires() {
        let site = Site::start().await;

        let mut orchestrator = new_orchestrator(site.config(), reachable());
        orchestrator.bind_all().await;
        orchestrator.on_authentication();
        assert_eq!(orchestrator.on_door_opened(&json!(true)).await, Outcome::Welcomed);

        let mut config = site.config();
        config.auth_ttl_secs = 0;
        let mut orchestrator = new_orchestrator(config, reachable());
        orchestrator.bind_all().await;
        orchestrator.on_authentication();
        assert_eq!(orchestrator.on_door_opened(&json!(true)).await, Outcome::Alarmed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn falsy_payloads_are_ignored() {
        let site = Site::start().await;
        let mut orchestrator = new_orchestrator(site.config(), reachable());
        orchestrator.bind_all().await;

        for payload in [json!(false), json!(null), json!(0), json!(""), json!({})] {
            assert_eq!(orchestrator.on_door_opened(&payload).await, Outcome::Ignored);
        }
        assert!(site.speaker.invocations("/alarm").is_empty());
        assert!(site.speaker.invocations("/welcome").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn stale_signals_are_ignored() {
        let site = Site::start().await;
        let mut orchestrator = new_orchestrator(site.config(), reachable());
        orchestrator.bind_all().await;
        let generation = orchestrator.generation(Role::Door).unwrap();

        let outcome = orchestrator
            .handle(Signal::DoorOpened {
                generation: generation + 100,
                payload: json!(true),
            })
            .await;
        assert_eq!(outcome, Some(Outcome::Ignored));

        orchestrator
            .handle(Signal::Failed {
                role: Role::Door,
                generation: generation + 100,
            })
            .await;
        assert_eq!(orchestrator.generation(Role::Door), Some(generation));
        assert!(site.speaker.invocations("/alarm").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn missing_alarm_source_skips() {
        let site = Site::start().await;
        let mut config = site.config();
        config.alarm_source_url = UNREACHABLE.into();
        let mut orchestrator = new_orchestrator(config, reachable());

        assert_eq!(orchestrator.bind_all().await, 2);
        assert!(!orchestrator.is_bound(Role::AlarmSource));
        assert_eq!(orchestrator.on_door_opened(&json!(true)).await, Outcome::Skipped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn startup_falls_back_to_the_candidates() {
        let site = Site::start().await;
        let mut config = site.config().candidates([
            Target::new("127.0.0.1", 1),
            site.speaker.target(),
            site.door.target(),
        ]);
        config.door_url = UNREACHABLE.into();
        let mut orchestrator = new_orchestrator(config, reachable());

        assert_eq!(orchestrator.bind_all().await, 3);
        assert_eq!(
            orchestrator.binding(Role::Door).unwrap().source(),
            format!("{}/", site.door.url())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn door_event_raises_the_alarm() {
        let site = Site::start().await;
        let mut orchestrator = new_orchestrator(site.config(), reachable());
        orchestrator.bind_all().await;

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                orchestrator.run(token).await;
                orchestrator
            }
        });

        site.door.publish(json!(true));
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();
        let orchestrator = handle.await.unwrap();

        assert_eq!(site.speaker.invocations("/alarm").len(), 1);
        assert!(!orchestrator.is_bound(Role::Door));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn failed_door_is_replaced() {
        let site = Site::start().await;
        let spare = MockThing::start(door_description).await;

        let probe = Arc::new(SwitchProbe::new(true));
        let config = site.config().candidates([
            site.door.target(),
            spare.target(),
            site.speaker.target(),
        ]);
        let mut orchestrator = new_orchestrator(config, probe.clone());
        orchestrator.bind_all().await;
        assert_eq!(site.door.subscriptions(), 1);

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                orchestrator.run(token).await;
                orchestrator
            }
        });

        probe.set(site.door.target(), false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(spare.subscriptions(), 1);

        // The replaced door is not listened to anymore.
        site.door.publish(json!(true));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(site.speaker.invocations("/alarm").is_empty());

        spare.publish(json!(true));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(site.speaker.invocations("/alarm").len(), 1);

        token.cancel();
        let orchestrator = handle.await.unwrap();
        assert!(!orchestrator.is_bound(Role::Door));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn failover_skips_candidates_that_cannot_be_installed() {
        let site = Site::start().await;
        // Its description points every interaction at a closed port.
        let stale = MockThing::start(|_: &str| door_description("http://127.0.0.1:1")).await;
        let spare = MockThing::start(door_description).await;

        let probe = Arc::new(SwitchProbe::new(true));
        let config = site.config().candidates([
            site.door.target(),
            stale.target(),
            spare.target(),
        ]);
        let mut orchestrator = new_orchestrator(config, probe.clone());
        orchestrator.bind_all().await;

        probe.set(site.door.target(), false);
        assert!(orchestrator.failover(Role::Door).await);
        assert_eq!(
            orchestrator.binding(Role::Door).unwrap().source(),
            format!("{}/", spare.url())
        );
        assert_eq!(spare.subscriptions(), 1);

        orchestrator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn rejected_authentication_grants_nothing() {
        let site = Site::start().await;
        let mut orchestrator = new_orchestrator(site.config(), reachable());
        orchestrator.bind_all().await;

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                orchestrator.run(token).await;
                orchestrator
            }
        });

        site.authenticator.publish(json!(false));
        tokio::time::sleep(Duration::from_millis(300)).await;
        site.door.publish(json!(true));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(site.speaker.invocations("/alarm").len(), 1);
        assert!(site.speaker.invocations("/welcome").is_empty());

        site.authenticator.publish(json!(true));
        tokio::time::sleep(Duration::from_millis(300)).await;
        site.door.publish(json!(true));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(site.speaker.invocations("/welcome").len(), 1);
        assert_eq!(site.speaker.invocations("/alarm").len(), 1);

        token.cancel();
        handle.await.unwrap();
    }
}
