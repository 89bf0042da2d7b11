use indexmap::IndexMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::namespace::Namespaces;

// Keys with a structural meaning inside a type descriptor. Every other
// string-valued key is a semantic `domain: range` annotation.
const RESERVED_KEYS: &[&str] = &[
    "type",
    "enum",
    "oneOf",
    "options",
    "minimum",
    "maximum",
    "properties",
    "required",
    "constant",
    "value",
    "description",
    "title",
    "unit",
];

/// Primitive kinds of a type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// A JSON string.
    String,
    /// A JSON integer.
    Integer,
    /// A JSON floating-point number.
    Float,
    /// A JSON boolean.
    Boolean,
    /// A JSON object.
    Object,
}

impl PrimitiveType {
    /// Parses a `type` tag. `number` is accepted as an alias of `float`.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "float" | "number" => Some(Self::Float),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    /// Returns the `type` tag.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }

    /// Checks whether a JSON value has this kind.
    ///
    /// Integers are accepted where a float is expected.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A semantic `domain: range` annotation, both sides expanded through the
/// namespaces of the owning description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    /// Annotation domain, for example `http://www.matthias-fisch.de/ontologies/wot#Duration`.
    pub domain: String,
    /// Annotation range, for example `http://dbpedia.org/resource/Second`.
    pub range: String,
}

impl Annotation {
    /// Creates an [`Annotation`].
    pub fn new(domain: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            range: range.into(),
        }
    }
}

/// Value constraints of a scalar schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    /// Allowed values, when an `enum` is declared.
    pub allowed: Option<Vec<Value>>,
    /// Inclusive lower bound.
    pub minimum: Option<f64>,
    /// Inclusive upper bound.
    pub maximum: Option<f64>,
}

impl Constraints {
    /// Checks whether a value satisfies every constraint.
    #[must_use]
    pub fn admits(&self, value: &Value) -> bool {
        if let Some(allowed) = &self.allowed
            && !allowed.contains(value)
        {
            return false;
        }

        let Some(number) = value.as_f64() else {
            return true;
        };

        self.minimum.is_none_or(|minimum| number >= minimum)
            && self.maximum.is_none_or(|maximum| number <= maximum)
    }
}

/// A scalar field carrying its own semantic annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSchema {
    /// Field kind.
    pub kind: PrimitiveType,
    /// Semantic annotations in declaration order.
    pub annotations: Vec<Annotation>,
    /// Value constraints.
    pub constraints: Constraints,
}

/// One enumerated constant of a [`OneOfSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct OneOfOption {
    /// The literal submitted when this option is selected.
    pub constant: Value,
    /// Semantic tags describing the constant.
    pub tags: Vec<Annotation>,
}

/// An enumerated set of semantically tagged constants.
#[derive(Debug, Clone, PartialEq)]
pub struct OneOfSchema {
    /// Kind of the constants.
    pub kind: PrimitiveType,
    /// Options in declaration order.
    pub options: Vec<OneOfOption>,
}

/// An object made of named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    /// Fields in declaration order.
    pub fields: IndexMap<String, DataSchema>,
    /// Names of the required fields.
    pub required: Vec<String>,
}

impl ObjectSchema {
    /// Checks whether a field is required.
    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|required| required == name)
    }
}

/// A type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSchema {
    /// A scalar field.
    Scalar(ScalarSchema),
    /// A choice among enumerated constants.
    OneOf(OneOfSchema),
    /// An object.
    Object(ObjectSchema),
}

impl DataSchema {
    /// Decodes a JSON type descriptor, expanding the semantic annotations
    /// through the given [`Namespaces`].
    ///
    /// # Errors
    ///
    /// The descriptor is not an object, has an unknown `type` tag, or contains
    /// malformed `oneOf`, `enum`, `properties` or `required` entries.
    pub fn parse(value: &Value, namespaces: &Namespaces) -> Result<Self> {
        let descriptor = value
            .as_object()
            .ok_or_else(|| Error::malformed("A type descriptor must be a JSON object"))?;

        let tag = descriptor
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("A type descriptor requires a `type` tag"))?;

        let kind = PrimitiveType::from_tag(tag)
            .ok_or_else(|| Error::malformed(format!("Unknown type tag `{tag}`")))?;

        if kind == PrimitiveType::Object {
            return Self::parse_object(descriptor, namespaces);
        }

        if let Some(options) = descriptor.get("oneOf").or_else(|| descriptor.get("options")) {
            return Self::parse_one_of(kind, options, namespaces);
        }

        let allowed = match descriptor.get("enum") {
            Some(Value::Array(allowed)) => Some(allowed.clone()),
            Some(_) => return Err(Error::malformed("`enum` must be an array")),
            None => None,
        };

        Ok(Self::Scalar(ScalarSchema {
            kind,
            annotations: annotations(descriptor, namespaces),
            constraints: Constraints {
                allowed,
                minimum: descriptor.get("minimum").and_then(Value::as_f64),
                maximum: descriptor.get("maximum").and_then(Value::as_f64),
            },
        }))
    }

    fn parse_one_of(kind: PrimitiveType, options: &Value, namespaces: &Namespaces) -> Result<Self> {
        let options = options
            .as_array()
            .ok_or_else(|| Error::malformed("`oneOf` must be an array"))?;

        let options = options
            .iter()
            .map(|option| {
                let option = option
                    .as_object()
                    .ok_or_else(|| Error::malformed("A `oneOf` option must be a JSON object"))?;
                let constant = option
                    .get("constant")
                    .or_else(|| option.get("value"))
                    .cloned()
                    .ok_or_else(|| Error::malformed("A `oneOf` option requires a `constant`"))?;
                Ok(OneOfOption {
                    constant,
                    tags: annotations(option, namespaces),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::OneOf(OneOfSchema { kind, options }))
    }

    fn parse_object(descriptor: &Map<String, Value>, namespaces: &Namespaces) -> Result<Self> {
        let fields = match descriptor.get("properties") {
            Some(Value::Object(properties)) => properties
                .iter()
                .map(|(name, field)| {
                    Self::parse(field, namespaces)
                        .map(|schema| (name.clone(), schema))
                        .map_err(|e| {
                            Error::malformed(format!("Field `{name}`: {}", e.description()))
                        })
                })
                .collect::<Result<IndexMap<_, _>>>()?,
            Some(_) => return Err(Error::malformed("`properties` must be a JSON object")),
            None => IndexMap::new(),
        };

        let required = match descriptor.get("required") {
            Some(Value::Array(required)) => required
                .iter()
                .map(|name| {
                    name.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| Error::malformed("`required` entries must be strings"))
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(Error::malformed("`required` must be an array")),
            None => Vec::new(),
        };

        Ok(Self::Object(ObjectSchema { fields, required }))
    }

    /// Returns the primitive kind of the schema.
    #[must_use]
    pub const fn kind(&self) -> PrimitiveType {
        match self {
            Self::Scalar(scalar) => scalar.kind,
            Self::OneOf(one_of) => one_of.kind,
            Self::Object(_) => PrimitiveType::Object,
        }
    }

    /// Validates a value against the schema.
    ///
    /// # Errors
    ///
    /// The value has the wrong kind, violates an `enum`, `minimum` or `maximum`
    /// constraint, is not one of the declared constants, or misses a required
    /// object field.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.validate_at(value, "value")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<()> {
        if !self.kind().accepts(value) {
            return Err(Error::invalid_value(format!(
                "`{path}` must be of type {}, found {value}",
                self.kind()
            )));
        }

        match self {
            Self::Scalar(scalar) => {
                if scalar.constraints.admits(value) {
                    Ok(())
                } else {
                    Err(Error::invalid_value(format!(
                        "`{path}` value {value} violates its constraints"
                    )))
                }
            }
            Self::OneOf(one_of) => {
                if one_of.options.iter().any(|option| option.constant == *value) {
                    Ok(())
                } else {
                    Err(Error::invalid_value(format!(
                        "`{path}` value {value} is not one of the declared constants"
                    )))
                }
            }
            Self::Object(object) => {
                // `accepts` guarantees an object here.
                let Some(fields) = value.as_object() else {
                    return Ok(());
                };
                for (name, schema) in &object.fields {
                    match fields.get(name) {
                        Some(field) => schema.validate_at(field, &format!("{path}.{name}"))?,
                        None if object.is_required(name) => {
                            return Err(Error::invalid_value(format!(
                                "`{path}` misses the required field `{name}`"
                            )));
                        }
                        None => {}
                    }
                }
                Ok(())
            }
        }
    }
}

fn annotations(entries: &Map<String, Value>, namespaces: &Namespaces) -> Vec<Annotation> {
    entries
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .filter_map(|(key, value)| {
            value
                .as_str()
                .map(|range| Annotation::new(namespaces.expand(key), namespaces.expand(range)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::error::ErrorKind;
    use crate::namespace::Namespaces;

    use super::{Annotation, DataSchema, PrimitiveType};

    fn namespaces() -> Namespaces {
        Namespaces::new()
            .with("wot", "http://www.matthias-fisch.de/ontologies/wot#")
            .with("dbr", "http://dbpedia.org/resource/")
            .with("dbo", "http://dbpedia.org/ontology/")
    }

    fn alarm_input() -> DataSchema {
        DataSchema::parse(
            &json!({
                "type": "object",
                "properties": {
                    "duration": {
                        "type": "integer",
                        "wot:Duration": "dbr:Second",
                        "minimum": 1,
                        "maximum": 600
                    },
                    "colour": {
                        "type": "string",
                        "oneOf": [
                            { "constant": "#ff0000", "dbo:Colour": "dbr:Red" },
                            { "constant": "#0000ff", "dbo:Colour": "dbr:Blue" }
                        ]
                    }
                },
                "required": ["duration"]
            }),
            &namespaces(),
        )
        .unwrap()
    }

    #[test]
    fn scalar_annotations_are_expanded() {
        let schema = DataSchema::parse(
            &json!({ "type": "integer", "wot:Duration": "dbr:Second", "unit": "s" }),
            &namespaces(),
        )
        .unwrap();

        let DataSchema::Scalar(scalar) = schema else {
            panic!("Expected a scalar schema");
        };
        assert_eq!(scalar.kind, PrimitiveType::Integer);
        assert_eq!(
            scalar.annotations,
            vec![Annotation::new(
                "http://www.matthias-fisch.de/ontologies/wot#Duration",
                "http://dbpedia.org/resource/Second"
            )]
        );
    }

    #[test]
    fn bare_terms_are_kept() {
        let schema =
            DataSchema::parse(&json!({"type": "integer", "Duration": "Second"}), &namespaces())
                .unwrap();
        let DataSchema::Scalar(scalar) = schema else {
            panic!("Expected a scalar schema");
        };
        assert_eq!(scalar.annotations, vec![Annotation::new("Duration", "Second")]);
    }

    #[test]
    fn object_schema() {
        let DataSchema::Object(object) = alarm_input() else {
            panic!("Expected an object schema");
        };
        assert_eq!(
            object.fields.keys().collect::<Vec<_>>(),
            vec!["duration", "colour"]
        );
        assert!(object.is_required("duration"));
        assert!(!object.is_required("colour"));

        let DataSchema::OneOf(colour) = &object.fields["colour"] else {
            panic!("Expected a one-of schema");
        };
        assert_eq!(colour.options.len(), 2);
        assert_eq!(colour.options[0].constant, json!("#ff0000"));
        assert_eq!(
            colour.options[1].tags,
            vec![Annotation::new(
                "http://dbpedia.org/ontology/Colour",
                "http://dbpedia.org/resource/Blue"
            )]
        );
    }

    #[test]
    fn legacy_options_spelling() {
        let schema = DataSchema::parse(
            &json!({
                "type": "string",
                "options": [{ "value": "welcome.mp3", "wot:SoundFile": "wot:WelcomeSound" }]
            }),
            &namespaces(),
        )
        .unwrap();
        let DataSchema::OneOf(one_of) = schema else {
            panic!("Expected a one-of schema");
        };
        assert_eq!(one_of.options[0].constant, json!("welcome.mp3"));
    }

    #[test]
    fn number_alias() {
        let schema = DataSchema::parse(&json!({"type": "number"}), &namespaces()).unwrap();
        assert_eq!(schema.kind(), PrimitiveType::Float);
    }

    #[test]
    fn malformed_descriptors() {
        for descriptor in [
            json!("integer"),
            json!({"minimum": 1}),
            json!({"type": "complex"}),
            json!({"type": "string", "oneOf": {}}),
            json!({"type": "string", "oneOf": [{"dbo:Colour": "dbr:Red"}]}),
            json!({"type": "object", "properties": {"a": {"type": "nope"}}}),
            json!({"type": "object", "required": "a"}),
        ] {
            assert_eq!(
                DataSchema::parse(&descriptor, &namespaces()).unwrap_err().kind(),
                ErrorKind::MalformedDescription,
                "{descriptor}"
            );
        }
    }

    #[test]
    fn validate_values() {
        let schema = alarm_input();

        assert!(schema.validate(&json!({"duration": 30})).is_ok());
        assert!(schema.validate(&json!({"duration": 30, "colour": "#0000ff"})).is_ok());

        for value in [
            json!(30),
            json!({}),
            json!({"duration": 0}),
            json!({"duration": 601}),
            json!({"duration": "30"}),
            json!({"duration": 30, "colour": "#00ff00"}),
        ] {
            assert_eq!(
                schema.validate(&value).unwrap_err().kind(),
                ErrorKind::InvalidValue,
                "{value}"
            );
        }
    }

    #[test]
    fn validate_enum() {
        let schema = DataSchema::parse(
            &json!({"type": "string", "enum": ["alarm.mp3", "ring.mp3"]}),
            &namespaces(),
        )
        .unwrap();
        assert!(schema.validate(&json!("ring.mp3")).is_ok());
        assert!(schema.validate(&json!("welcome.mp3")).is_err());
    }
}
