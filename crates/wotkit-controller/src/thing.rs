use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use serde_json::Value;

use tracing::warn;

use wotkit::description::{
    ActionDescription, EventDescription, HTTP_SCHEME, Interaction, PropertyDescription,
    ThingDescription,
};
use wotkit::payload::ValueEnvelope;
use wotkit::schema::DataSchema;

use crate::client::ThingClient;
use crate::error::{Error, ErrorKind, Result};
use crate::failure::Target;
use crate::oracle::{EquivalenceOracle, same_concept};
use crate::subscription::EventSubscription;

/// The semantic types a thing has to offer to fill a role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Required property types.
    pub properties: Vec<String>,
    /// Required action types.
    pub actions: Vec<String>,
    /// Required event types.
    pub events: Vec<String>,
}

impl Capabilities {
    /// Creates an empty set of [`Capabilities`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a property type.
    #[must_use]
    pub fn property(mut self, semantic_type: impl Into<String>) -> Self {
        self.properties.push(semantic_type.into());
        self
    }

    /// Requires an action type.
    #[must_use]
    pub fn action(mut self, semantic_type: impl Into<String>) -> Self {
        self.actions.push(semantic_type.into());
        self
    }

    /// Requires an event type.
    #[must_use]
    pub fn event(mut self, semantic_type: impl Into<String>) -> Self {
        self.events.push(semantic_type.into());
        self
    }
}

/// A remote device known through its [`ThingDescription`].
///
/// Property, action and event handles borrow their [`Thing`], so they
/// cannot outlive it.
pub struct Thing {
    description: ThingDescription,
    source: String,
    client: ThingClient,
    oracle: Arc<dyn EquivalenceOracle>,
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("description", &self.description)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Thing {
    /// Creates a [`Thing`] from an already decoded description.
    pub fn new(
        description: ThingDescription,
        source: impl Into<String>,
        client: ThingClient,
        oracle: Arc<dyn EquivalenceOracle>,
    ) -> Self {
        Self {
            description,
            source: source.into(),
            client,
            oracle,
        }
    }

    /// Fetches the description served at `url`.
    ///
    /// # Errors
    ///
    /// The device is unreachable or serves an invalid description.
    pub async fn fetch(
        url: &str,
        client: ThingClient,
        oracle: Arc<dyn EquivalenceOracle>,
    ) -> Result<Self> {
        let description = client.fetch_description(url).await?;
        Ok(Self::new(description, url, client, oracle))
    }

    /// Returns the [`ThingDescription`].
    #[must_use]
    pub const fn description(&self) -> &ThingDescription {
        &self.description
    }

    /// Returns the URL the description was fetched from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the `HTTP` base URI.
    ///
    /// # Errors
    ///
    /// The description has no `HTTP` base URI.
    pub fn base_uri(&self) -> Result<&str> {
        self.description
            .base_uri(HTTP_SCHEME)
            .map(|(_, base)| base)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnsupportedScheme,
                    format!("{} has no HTTP base URI", self.source),
                )
            })
    }

    /// Returns the host and port serving the `HTTP` base URI.
    #[must_use]
    pub fn target(&self) -> Option<Target> {
        let base = Url::parse(self.base_uri().ok()?).ok()?;
        Some(Target::new(base.host_str()?, base.port_or_known_default()?))
    }

    /// Checks whether the `@type` of the thing is equivalent to any of the
    /// given types.
    pub async fn type_equivalent_to<S: AsRef<str>>(&self, types: &[S]) -> bool {
        match self.description.semantic_type() {
            Some(declared) => self.matches(declared, &self.expand(types)).await,
            None => false,
        }
    }

    /// Returns the first property whose type is equivalent to any of the
    /// given types.
    pub async fn property_by_types<S: AsRef<str>>(&self, types: &[S]) -> Option<Property<'_>> {
        self.first_match(self.description.properties(), &self.expand(types))
            .await
            .map(|description| Property {
                thing: self,
                description,
            })
    }

    /// Returns the first action whose type is equivalent to any of the
    /// given types.
    pub async fn action_by_types<S: AsRef<str>>(&self, types: &[S]) -> Option<Action<'_>> {
        self.first_match(self.description.actions(), &self.expand(types))
            .await
            .map(|description| Action {
                thing: self,
                description,
            })
    }

    /// Returns the first event whose type is equivalent to any of the
    /// given types.
    pub async fn event_by_types<S: AsRef<str>>(&self, types: &[S]) -> Option<Event<'_>> {
        self.first_match(self.description.events(), &self.expand(types))
            .await
            .map(|description| Event {
                thing: self,
                description,
            })
    }

    /// Returns the first property with the given name.
    #[must_use]
    pub fn property_by_name(&self, name: &str) -> Option<Property<'_>> {
        self.description
            .property_by_name(name)
            .map(|description| Property {
                thing: self,
                description,
            })
    }

    /// Returns the first action with the given name.
    #[must_use]
    pub fn action_by_name(&self, name: &str) -> Option<Action<'_>> {
        self.description
            .action_by_name(name)
            .map(|description| Action {
                thing: self,
                description,
            })
    }

    /// Returns the first event with the given name.
    #[must_use]
    pub fn event_by_name(&self, name: &str) -> Option<Event<'_>> {
        self.description
            .event_by_name(name)
            .map(|description| Event {
                thing: self,
                description,
            })
    }

    /// Checks whether every given type has an equivalent property.
    pub async fn has_all_properties_of<S: AsRef<str>>(&self, types: &[S]) -> bool {
        self.has_all(self.description.properties(), types).await
    }

    /// Checks whether every given type has an equivalent action.
    pub async fn has_all_actions_of<S: AsRef<str>>(&self, types: &[S]) -> bool {
        self.has_all(self.description.actions(), types).await
    }

    /// Checks whether every given type has an equivalent event.
    pub async fn has_all_events_of<S: AsRef<str>>(&self, types: &[S]) -> bool {
        self.has_all(self.description.events(), types).await
    }

    /// Checks whether at least one given type has an equivalent property.
    pub async fn has_any_property_of<S: AsRef<str>>(&self, types: &[S]) -> bool {
        self.property_by_types(types).await.is_some()
    }

    /// Checks whether at least one given type has an equivalent action.
    pub async fn has_any_action_of<S: AsRef<str>>(&self, types: &[S]) -> bool {
        self.action_by_types(types).await.is_some()
    }

    /// Checks whether at least one given type has an equivalent event.
    pub async fn has_any_event_of<S: AsRef<str>>(&self, types: &[S]) -> bool {
        self.event_by_types(types).await.is_some()
    }

    /// Checks whether the thing offers every required capability.
    pub async fn satisfies(&self, capabilities: &Capabilities) -> bool {
        self.has_all_properties_of(&capabilities.properties).await
            && self.has_all_actions_of(&capabilities.actions).await
            && self.has_all_events_of(&capabilities.events).await
    }

    // Caller-supplied types may use the prefixes of this description.
    fn expand<S: AsRef<str>>(&self, types: &[S]) -> Vec<String> {
        let namespaces = self.description.namespaces();
        types
            .iter()
            .map(|semantic_type| namespaces.expand(semantic_type.as_ref()))
            .collect()
    }

    async fn matches(&self, declared: &str, types: &[String]) -> bool {
        if types.iter().any(|semantic_type| semantic_type == declared) {
            return true;
        }
        for semantic_type in types {
            if same_concept(self.oracle.as_ref(), semantic_type, declared).await {
                return true;
            }
        }
        false
    }

    async fn first_match<'a, I: Interaction>(
        &self,
        interactions: &'a [I],
        types: &[String],
    ) -> Option<&'a I> {
        for interaction in interactions {
            if let Some(declared) = interaction.semantic_type()
                && self.matches(declared, types).await
            {
                return Some(interaction);
            }
        }
        None
    }

    async fn has_all<I: Interaction, S: AsRef<str>>(&self, interactions: &[I], types: &[S]) -> bool {
        for semantic_type in self.expand(types) {
            if self
                .first_match(interactions, std::slice::from_ref(&semantic_type))
                .await
                .is_none()
            {
                return false;
            }
        }
        true
    }

    fn url<I: Interaction>(&self, interaction: &I) -> Result<String> {
        self.description
            .url(interaction, HTTP_SCHEME)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnsupportedScheme,
                    format!(
                        "`{}` of {} is not reachable through HTTP",
                        label(interaction),
                        self.source
                    ),
                )
            })
    }
}

fn label<I: Interaction>(interaction: &I) -> &str {
    interaction
        .name()
        .or_else(|| interaction.semantic_type())
        .unwrap_or("unnamed")
}

fn check(schema: Option<&DataSchema>, value: &Value) -> Result<()> {
    match schema {
        Some(schema) => Ok(schema.validate(value)?),
        None => Ok(()),
    }
}

/// A property of a [`Thing`].
#[derive(Debug, Clone, Copy)]
pub struct Property<'thing> {
    thing: &'thing Thing,
    description: &'thing PropertyDescription,
}

impl Property<'_> {
    /// Returns the property descriptor.
    #[must_use]
    pub const fn description(&self) -> &PropertyDescription {
        self.description
    }

    /// Returns the absolute `HTTP` URL of the property.
    ///
    /// # Errors
    ///
    /// The property is not reachable through `HTTP`.
    pub fn url(&self) -> Result<String> {
        self.thing.url(self.description)
    }

    /// Reads the current value.
    ///
    /// # Errors
    ///
    /// The request fails, or the device answers with a value that does not
    /// match the declared value type.
    pub async fn value(&self) -> Result<Value> {
        let url = self.url()?;
        let value = self.thing.client.get_value(&url).await?;
        check(self.description.value_type(), &value).map_err(|e| {
            Error::new(
                ErrorKind::MalformedResponse,
                format!("{url} answered with an invalid value: {}", e.description()),
            )
        })?;
        Ok(value)
    }

    /// Validates and writes a value.
    ///
    /// # Errors
    ///
    /// The property is read-only, the value violates the declared value
    /// type, or the request fails.
    pub async fn set(&self, value: &Value) -> Result<()> {
        if self.description.writeable() == Some(false) {
            return Err(Error::new(
                ErrorKind::ReadOnly,
                format!("`{}` is read-only", label(self.description)),
            ));
        }
        check(self.description.value_type(), value)?;

        let url = self.url()?;
        self.thing.client.post_value(&url, Some(value)).await?;
        Ok(())
    }
}

/// An action of a [`Thing`].
#[derive(Debug, Clone, Copy)]
pub struct Action<'thing> {
    thing: &'thing Thing,
    description: &'thing ActionDescription,
}

impl Action<'_> {
    /// Returns the action descriptor.
    #[must_use]
    pub const fn description(&self) -> &ActionDescription {
        self.description
    }

    /// Returns the input data schema.
    #[must_use]
    pub const fn input(&self) -> Option<&DataSchema> {
        self.description.input()
    }

    /// Returns the output data schema.
    #[must_use]
    pub const fn output(&self) -> Option<&DataSchema> {
        self.description.output()
    }

    /// Returns the absolute `HTTP` URL of the action.
    ///
    /// # Errors
    ///
    /// The action is not reachable through `HTTP`.
    pub fn url(&self) -> Result<String> {
        self.thing.url(self.description)
    }

    /// Validates the input and invokes the action.
    ///
    /// An action without input schema is invoked with an empty body. The
    /// output is returned only when an output schema is declared.
    ///
    /// # Errors
    ///
    /// The input violates the input schema, the request fails, or the
    /// output does not match the output schema.
    pub async fn invoke(&self, input: &Value) -> Result<Option<Value>> {
        let url = self.url()?;

        let body = match self.description.input() {
            Some(schema) => {
                schema.validate(input)?;
                Some(input)
            }
            None => {
                if !input.is_null() {
                    warn!("`{}` has no input data, ignore {input}", label(self.description));
                }
                None
            }
        };

        let answer = self.thing.client.post_value(&url, body).await?;

        let Some(schema) = self.description.output() else {
            return Ok(None);
        };

        let output = serde_json::from_slice::<ValueEnvelope<Value>>(&answer)?.into_inner();
        schema.validate(&output).map_err(|e| {
            Error::new(
                ErrorKind::MalformedResponse,
                format!("{url} answered with an invalid output: {}", e.description()),
            )
        })?;
        Ok(Some(output))
    }
}

/// An event of a [`Thing`].
#[derive(Debug, Clone, Copy)]
pub struct Event<'thing> {
    thing: &'thing Thing,
    description: &'thing EventDescription,
}

impl Event<'_> {
    /// Returns the event descriptor.
    #[must_use]
    pub const fn description(&self) -> &EventDescription {
        self.description
    }

    /// Returns the absolute `HTTP` URL of the event.
    ///
    /// # Errors
    ///
    /// The event is not reachable through `HTTP`.
    pub fn url(&self) -> Result<String> {
        self.thing.url(self.description)
    }

    /// Subscribes to the event.
    ///
    /// The returned subscription does not poll until started.
    ///
    /// # Errors
    ///
    /// The event is not reachable through `HTTP`, or the device violates the
    /// subscription protocol.
    pub async fn subscribe(
        &self,
        config: Option<&Value>,
        poll_interval: Duration,
    ) -> Result<EventSubscription> {
        let url = self.url()?;
        let base = self.thing.base_uri()?;
        let resource = self.thing.client.subscribe(&url, base, config).await?;
        Ok(EventSubscription::new(
            resource,
            poll_interval,
            self.thing.client.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use wotkit::description::ThingDescription;

    use crate::client::{DEFAULT_REQUEST_TIMEOUT, ThingClient};
    use crate::error::ErrorKind;
    use crate::failure::Target;
    use crate::oracle::StaticOracle;
    use crate::tests::{MockThing, door_description, speaker_description};

    use super::{Capabilities, Thing};

    const WOT: &str = "http://www.matthias-fisch.de/ontologies/wot#";

    fn offline(description: serde_json::Value, oracle: StaticOracle) -> Thing {
        Thing::new(
            ThingDescription::from_value(description).unwrap(),
            "http://127.0.0.1:1/",
            ThingClient::new(DEFAULT_REQUEST_TIMEOUT).unwrap(),
            Arc::new(oracle),
        )
    }

    #[tokio::test]
    async fn lookup_by_types() {
        let thing = offline(door_description("http://127.0.0.1:5000/door"), StaticOracle::new());

        let event = thing.event_by_types(&[format!("{WOT}DoorOpenEvent")]).await.unwrap();
        assert_eq!(event.url().unwrap(), "http://127.0.0.1:5000/door/openevent");

        // Prefixes of the description are usable in lookups.
        assert!(thing.event_by_types(&["wot:DoorOpenEvent"]).await.is_some());
        assert!(thing.event_by_types(&["wot:DoorCloseEvent"]).await.is_none());
        assert!(thing.property_by_types::<&str>(&[]).await.is_none());
        assert!(thing.type_equivalent_to(&["http://purl.org/iot/vocab/m3-lite#Door"]).await);
        assert_eq!(thing.target(), Some(Target::new("127.0.0.1", 5000)));
    }

    #[tokio::test]
    async fn lookup_through_the_oracle() {
        let oracle = StaticOracle::new().with_link(
            format!("{WOT}DoorOpenEvent"),
            "http://example.org/vocab#EntranceOpened",
        );
        let thing = offline(door_description("http://127.0.0.1:5000/door"), oracle);

        assert!(
            thing
                .has_all_events_of(&["http://example.org/vocab#EntranceOpened"])
                .await
        );
        assert!(
            !thing
                .has_all_events_of(&[
                    "http://example.org/vocab#EntranceOpened",
                    "http://example.org/vocab#EntranceClosed"
                ])
                .await
        );
        assert!(
            thing
                .has_any_event_of(&[
                    "http://example.org/vocab#EntranceClosed",
                    "http://example.org/vocab#EntranceOpened"
                ])
                .await
        );
    }

    #[tokio::test]
    async fn satisfies_capabilities() {
        let thing = offline(speaker_description("http://127.0.0.1:5000/speaker"), StaticOracle::new());

        let alarm = Capabilities::new().action(format!("{WOT}AlarmAction"));
        assert!(thing.satisfies(&alarm).await);
        assert!(thing.satisfies(&Capabilities::new()).await);
        assert!(
            !thing
                .satisfies(&alarm.event(format!("{WOT}DoorOpenEvent")))
                .await
        );
    }

    #[tokio::test]
    async fn unsupported_scheme() {
        let thing = offline(
            json!({
                "@context": [{"wot": WOT}],
                "uris": ["coap://127.0.0.1:5683"],
                "actions": [{"@type": "wot:AlarmAction", "name": "alarm", "hrefs": ["alarm"]}]
            }),
            StaticOracle::new(),
        );

        let action = thing.action_by_name("alarm").unwrap();
        assert_eq!(action.url().unwrap_err().kind(), ErrorKind::UnsupportedScheme);
        assert_eq!(thing.target(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn properties_and_actions() {
        let mock = MockThing::start(speaker_description).await;
        let client = ThingClient::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let thing = Thing::fetch(&mock.url(), client, Arc::new(StaticOracle::new()))
            .await
            .unwrap();

        let volume = thing.property_by_name("volume").unwrap();
        assert_eq!(volume.value().await.unwrap(), json!(0));
        volume.set(&json!(7)).await.unwrap();
        assert_eq!(volume.value().await.unwrap(), json!(7));
        assert_eq!(
            volume.set(&json!(11)).await.unwrap_err().kind(),
            ErrorKind::InvalidValue
        );

        let playing = thing.property_by_name("playing").unwrap();
        assert_eq!(
            playing.set(&json!(true)).await.unwrap_err().kind(),
            ErrorKind::ReadOnly
        );

        let alarm = thing
            .action_by_types(&[format!("{WOT}AlarmAction")])
            .await
            .unwrap();
        let input = json!({"duration": 30, "colour": "#ff0000"});
        assert_eq!(alarm.invoke(&input).await.unwrap(), None);
        assert_eq!(mock.invocations("/alarm"), vec![json!({"value": input})]);

        assert_eq!(
            alarm.invoke(&json!({"colour": "#ff0000"})).await.unwrap_err().kind(),
            ErrorKind::InvalidValue
        );

        mock.set_output("/stop", json!(true));
        let stop = thing.action_by_name("stop").unwrap();
        assert_eq!(stop.invoke(&json!(null)).await.unwrap(), Some(json!(true)));
        assert_eq!(mock.invocations("/stop"), vec![json!(null)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_device() {
        let client = ThingClient::new(Duration::from_millis(200)).unwrap();
        assert_eq!(
            Thing::fetch("http://127.0.0.1:1/", client, Arc::new(StaticOracle::new()))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::RemoteRequest
        );
    }
}
