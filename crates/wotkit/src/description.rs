use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::namespace::Namespaces;
use crate::schema::DataSchema;

/// The scheme of the transport used to interact with devices.
pub const HTTP_SCHEME: &str = "http";

/// Behaviour shared by property, action and event descriptors.
pub trait Interaction {
    /// Returns the fully-qualified semantic type, if declared.
    fn semantic_type(&self) -> Option<&str>;

    /// Returns the name, if declared.
    fn name(&self) -> Option<&str>;

    /// Returns the relative references, aligned with the description URIs.
    fn hrefs(&self) -> &[String];

    /// Returns the schema a caller has to provide a value for.
    ///
    /// This is the `valueType` of properties and events and the `inputData`
    /// of actions.
    fn schema(&self) -> Option<&DataSchema>;
}

/// A property descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescription {
    semantic_type: Option<String>,
    name: Option<String>,
    value_type: Option<DataSchema>,
    writeable: Option<bool>,
    hrefs: Vec<String>,
}

impl PropertyDescription {
    /// Returns the value type.
    #[must_use]
    pub const fn value_type(&self) -> Option<&DataSchema> {
        self.value_type.as_ref()
    }

    /// Returns whether the property is writeable, if declared.
    #[must_use]
    pub const fn writeable(&self) -> Option<bool> {
        self.writeable
    }
}

/// An action descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDescription {
    semantic_type: Option<String>,
    name: Option<String>,
    input: Option<DataSchema>,
    output: Option<DataSchema>,
    hrefs: Vec<String>,
}

impl ActionDescription {
    /// Returns the input data schema.
    #[must_use]
    pub const fn input(&self) -> Option<&DataSchema> {
        self.input.as_ref()
    }

    /// Returns the output data schema.
    #[must_use]
    pub const fn output(&self) -> Option<&DataSchema> {
        self.output.as_ref()
    }
}

/// An event descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDescription {
    semantic_type: Option<String>,
    name: Option<String>,
    value_type: Option<DataSchema>,
    hrefs: Vec<String>,
}

impl EventDescription {
    /// Returns the value type of the event occurrences.
    #[must_use]
    pub const fn value_type(&self) -> Option<&DataSchema> {
        self.value_type.as_ref()
    }
}

macro_rules! interaction {
    ($description:ty, $schema:ident) => {
        impl Interaction for $description {
            fn semantic_type(&self) -> Option<&str> {
                self.semantic_type.as_deref()
            }

            fn name(&self) -> Option<&str> {
                self.name.as_deref()
            }

            fn hrefs(&self) -> &[String] {
                &self.hrefs
            }

            fn schema(&self) -> Option<&DataSchema> {
                self.$schema.as_ref()
            }
        }
    };
}

interaction!(PropertyDescription, value_type);
interaction!(ActionDescription, input);
interaction!(EventDescription, value_type);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContextEntry {
    Iri(String),
    Prefixes(serde_json::Map<String, Value>),
}

#[derive(Deserialize)]
struct RawInteraction {
    #[serde(rename = "@type")]
    semantic_type: Option<String>,
    name: Option<String>,
    #[serde(rename = "valueType")]
    value_type: Option<Value>,
    #[serde(rename = "inputData")]
    input_data: Option<Value>,
    #[serde(rename = "outputData")]
    output_data: Option<Value>,
    writeable: Option<bool>,
    #[serde(default)]
    hrefs: Vec<String>,
}

#[derive(Deserialize)]
struct RawThing {
    #[serde(rename = "@context")]
    context: Option<OneOrMany<ContextEntry>>,
    #[serde(rename = "@type")]
    semantic_type: Option<String>,
    name: Option<String>,
    #[serde(default)]
    uris: Vec<String>,
    #[serde(default)]
    properties: Vec<RawInteraction>,
    #[serde(default)]
    actions: Vec<RawInteraction>,
    #[serde(default)]
    events: Vec<RawInteraction>,
}

// Decoding state shared by all descriptors of a single description.
struct Decoder<'a> {
    namespaces: &'a Namespaces,
    uris: usize,
}

impl Decoder<'_> {
    fn semantic_type(&self, semantic_type: Option<&str>) -> Result<Option<String>> {
        semantic_type
            .map(|token| self.namespaces.resolve(token).map(|iri| iri.into_owned()))
            .transpose()
    }

    fn schema(&self, schema: Option<&Value>, what: &str) -> Result<Option<DataSchema>> {
        schema
            .map(|schema| {
                DataSchema::parse(schema, self.namespaces)
                    .map_err(|e| Error::malformed(format!("{what}: {}", e.description())))
            })
            .transpose()
    }

    fn hrefs(&self, hrefs: Vec<String>, what: &str) -> Result<Vec<String>> {
        if !hrefs.is_empty() && hrefs.len() != self.uris {
            return Err(Error::malformed(format!(
                "{what} declares {} hrefs for {} uris",
                hrefs.len(),
                self.uris
            )));
        }
        Ok(hrefs)
    }

    fn property(&self, raw: RawInteraction, index: usize) -> Result<PropertyDescription> {
        let what = format!("Property {index}");
        Ok(PropertyDescription {
            semantic_type: self.semantic_type(raw.semantic_type.as_deref())?,
            name: raw.name,
            value_type: self.schema(raw.value_type.as_ref(), &what)?,
            writeable: raw.writeable,
            hrefs: self.hrefs(raw.hrefs, &what)?,
        })
    }

    fn action(&self, raw: RawInteraction, index: usize) -> Result<ActionDescription> {
        let what = format!("Action {index}");
        Ok(ActionDescription {
            semantic_type: self.semantic_type(raw.semantic_type.as_deref())?,
            name: raw.name,
            input: self.schema(raw.input_data.as_ref(), &what)?,
            output: self.schema(raw.output_data.as_ref(), &what)?,
            hrefs: self.hrefs(raw.hrefs, &what)?,
        })
    }

    fn event(&self, raw: RawInteraction, index: usize) -> Result<EventDescription> {
        let what = format!("Event {index}");
        Ok(EventDescription {
            semantic_type: self.semantic_type(raw.semantic_type.as_deref())?,
            name: raw.name,
            value_type: self.schema(raw.value_type.as_ref(), &what)?,
            hrefs: self.hrefs(raw.hrefs, &what)?,
        })
    }
}

/// The semantic capability document of a device.
///
/// A description is decoded once from a fetched document and is immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ThingDescription {
    contexts: Vec<String>,
    namespaces: Namespaces,
    semantic_type: Option<String>,
    name: Option<String>,
    uris: Vec<String>,
    properties: Vec<PropertyDescription>,
    actions: Vec<ActionDescription>,
    events: Vec<EventDescription>,
}

impl ThingDescription {
    /// Decodes a [`ThingDescription`] from a JSON value.
    ///
    /// # Errors
    ///
    /// - [`crate::ErrorKind::MalformedDescription`] when the document does
    ///   not have the structure of a description.
    /// - [`crate::ErrorKind::UnknownPrefix`] or
    ///   [`crate::ErrorKind::MalformedReference`] when a `@type` cannot be
    ///   resolved against the `@context`.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawThing = serde_json::from_value(value)?;
        Self::decode(raw)
    }

    /// Decodes a [`ThingDescription`] from JSON bytes.
    ///
    /// # Errors
    ///
    /// See [`ThingDescription::from_value`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawThing = serde_json::from_slice(bytes)?;
        Self::decode(raw)
    }

    fn decode(raw: RawThing) -> Result<Self> {
        let mut contexts = Vec::new();
        let mut namespaces = Namespaces::new();

        for entry in raw.context.map(OneOrMany::into_vec).unwrap_or_default() {
            match entry {
                ContextEntry::Iri(iri) => contexts.push(iri),
                ContextEntry::Prefixes(prefixes) => {
                    for (prefix, iri) in prefixes {
                        match iri {
                            Value::String(iri) => namespaces.register(prefix, iri),
                            _ => log::warn!("Ignore the non-IRI context term `{prefix}`"),
                        }
                    }
                }
            }
        }

        let decoder = Decoder {
            namespaces: &namespaces,
            uris: raw.uris.len(),
        };

        let semantic_type = decoder.semantic_type(raw.semantic_type.as_deref())?;

        let properties = raw
            .properties
            .into_iter()
            .enumerate()
            .map(|(index, raw)| decoder.property(raw, index))
            .collect::<Result<Vec<_>>>()?;

        let actions = raw
            .actions
            .into_iter()
            .enumerate()
            .map(|(index, raw)| decoder.action(raw, index))
            .collect::<Result<Vec<_>>>()?;

        let events = raw
            .events
            .into_iter()
            .enumerate()
            .map(|(index, raw)| decoder.event(raw, index))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            contexts,
            namespaces,
            semantic_type,
            name: raw.name,
            uris: raw.uris,
            properties,
            actions,
            events,
        })
    }

    /// Returns the base contexts, the plain IRIs of the `@context`.
    #[must_use]
    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    /// Returns the prefix table declared by the `@context`.
    #[must_use]
    pub const fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// Returns the fully-qualified semantic type of the thing, if declared.
    #[must_use]
    pub fn semantic_type(&self) -> Option<&str> {
        self.semantic_type.as_deref()
    }

    /// Returns the name of the thing, if declared.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the base URIs, one per transport scheme.
    #[must_use]
    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    /// Returns the properties in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDescription] {
        &self.properties
    }

    /// Returns the actions in declaration order.
    #[must_use]
    pub fn actions(&self) -> &[ActionDescription] {
        &self.actions
    }

    /// Returns the events in declaration order.
    #[must_use]
    pub fn events(&self) -> &[EventDescription] {
        &self.events
    }

    /// Returns the first property with the given name.
    #[must_use]
    pub fn property_by_name(&self, name: &str) -> Option<&PropertyDescription> {
        by_name(&self.properties, name)
    }

    /// Returns the first action with the given name.
    #[must_use]
    pub fn action_by_name(&self, name: &str) -> Option<&ActionDescription> {
        by_name(&self.actions, name)
    }

    /// Returns the first event with the given name.
    #[must_use]
    pub fn event_by_name(&self, name: &str) -> Option<&EventDescription> {
        by_name(&self.events, name)
    }

    /// Returns the position and value of the first base URI using the
    /// given scheme.
    #[must_use]
    pub fn base_uri(&self, scheme: &str) -> Option<(usize, &str)> {
        self.uris
            .iter()
            .enumerate()
            .find(|(_, uri)| {
                uri.split_once("://")
                    .is_some_and(|(uri_scheme, _)| uri_scheme.eq_ignore_ascii_case(scheme))
            })
            .map(|(index, uri)| (index, uri.as_str()))
    }

    /// Builds the absolute URL of an interaction for the given scheme.
    ///
    /// The base URI and the href sharing its position are joined with
    /// exactly one `/`.
    #[must_use]
    pub fn url<I: Interaction + ?Sized>(&self, interaction: &I, scheme: &str) -> Option<String> {
        let (index, base) = self.base_uri(scheme)?;
        let href = interaction.hrefs().get(index)?;
        Some(join(base, href))
    }
}

impl FromStr for ThingDescription {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_slice(s.as_bytes())
    }
}

/// Joins a base URI and a reference with exactly one `/`.
#[must_use]
pub fn join(base: &str, reference: &str) -> String {
    match (base.ends_with('/'), reference.starts_with('/')) {
        (true, true) => format!("{base}{}", &reference[1..]),
        (false, false) if !reference.is_empty() => format!("{base}/{reference}"),
        _ => format!("{base}{reference}"),
    }
}

fn by_name<'a, I: Interaction>(interactions: &'a [I], name: &str) -> Option<&'a I> {
    interactions
        .iter()
        .find(|interaction| interaction.name() == Some(name))
}

/// A description embedded in a bulletin board.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedThing {
    /// The URL the embedded entry is exposed at.
    pub base: String,
    /// The embedded description.
    pub description: ThingDescription,
}

/// A document served at the root of a host.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// A single description.
    Thing(ThingDescription),
    /// A bulletin board embedding the descriptions of several things.
    BulletinBoard(Vec<EmbeddedThing>),
}

impl Document {
    /// Decodes a [`Document`] from a JSON value.
    ///
    /// An `_embedded` array marks a bulletin board. Each embedded entry
    /// must carry a `_base` URL, which becomes the base URI of entries
    /// without `uris` or with an empty list. Malformed entries are skipped.
    ///
    /// # Errors
    ///
    /// The document is neither a valid description nor a bulletin board.
    pub fn from_value(value: Value) -> Result<Self> {
        let Some(embedded) = value.get("_embedded") else {
            return ThingDescription::from_value(value).map(Self::Thing);
        };

        let entries = embedded
            .as_array()
            .ok_or_else(|| Error::malformed("`_embedded` must be an array"))?;

        let things = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match Self::embedded(entry.clone()) {
                Ok(thing) => Some(thing),
                Err(e) => {
                    log::warn!("Skip bulletin board entry {index}: {e}");
                    None
                }
            })
            .collect();

        Ok(Self::BulletinBoard(things))
    }

    /// Decodes a [`Document`] from JSON bytes.
    ///
    /// # Errors
    ///
    /// See [`Document::from_value`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    fn embedded(mut entry: Value) -> Result<EmbeddedThing> {
        let fields = entry
            .as_object_mut()
            .ok_or_else(|| Error::malformed("An embedded entry must be a JSON object"))?;

        let base = match fields.remove("_base") {
            Some(Value::String(base)) => base,
            _ => return Err(Error::malformed("An embedded entry requires a `_base` URL")),
        };

        let has_uris = fields
            .get("uris")
            .and_then(Value::as_array)
            .is_some_and(|uris| !uris.is_empty());
        if !has_uris {
            let _ = fields.insert("uris".into(), Value::Array(vec![Value::String(base.clone())]));
        }

        Ok(EmbeddedThing {
            base,
            description: ThingDescription::from_value(entry)?,
        })
    }

    /// Returns every description of the document.
    #[must_use]
    pub fn into_descriptions(self) -> Vec<ThingDescription> {
        match self {
            Self::Thing(description) => vec![description],
            Self::BulletinBoard(things) => {
                things.into_iter().map(|thing| thing.description).collect()
            }
        }
    }
}
