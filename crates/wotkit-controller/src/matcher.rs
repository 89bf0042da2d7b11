use std::sync::Arc;

use futures_util::future::BoxFuture;

use serde_json::{Map, Value};

use tracing::debug;

use wotkit::description::Interaction;
use wotkit::schema::{DataSchema, OneOfSchema, PrimitiveType, ScalarSchema};

use crate::error::{Error, ErrorKind, Result};
use crate::oracle::{EquivalenceOracle, same_concept};

/// A typed value a rule submits for a scalar field.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// An integer.
    Integer(i64),
    /// A floating-point number.
    Float(f64),
    /// A string.
    String(String),
    /// A boolean.
    Boolean(bool),
}

impl Literal {
    /// Returns the primitive kind of the literal.
    #[must_use]
    pub const fn kind(&self) -> PrimitiveType {
        match self {
            Self::Integer(_) => PrimitiveType::Integer,
            Self::Float(_) => PrimitiveType::Float,
            Self::String(_) => PrimitiveType::String,
            Self::Boolean(_) => PrimitiveType::Boolean,
        }
    }

    /// Returns the JSON representation of the literal.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Integer(v) => Value::from(*v),
            Self::Float(v) => Value::from(*v),
            Self::String(v) => Value::from(v.as_str()),
            Self::Boolean(v) => Value::from(*v),
        }
    }
}

macro_rules! literal_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Literal {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

literal_from!(
    i64 => Integer,
    i32 => Integer,
    u32 => Integer,
    f64 => Float,
    f32 => Float,
    String => String,
    &str => String,
    bool => Boolean,
);

#[derive(Debug, Clone)]
struct ValueRule {
    domain: String,
    range: String,
    literal: Literal,
}

#[derive(Debug, Clone)]
struct OneOfRule {
    domain: String,
    range: String,
}

fn unknown_semantics(path: &str) -> Error {
    Error::new(
        ErrorKind::UnknownSemantics,
        format!("No rule matches the semantics of `{path}`"),
    )
}

/// Derives concrete input values from semantic rules.
///
/// Value rules submit a literal for scalar fields annotated with an
/// equivalent `domain: range` pair. One-of rules select the first constant
/// tagged with an equivalent pair. Rules are tried in registration order
/// and the first compatible one wins.
pub struct CapabilityMatcher {
    oracle: Arc<dyn EquivalenceOracle>,
    value_rules: Vec<ValueRule>,
    one_of_rules: Vec<OneOfRule>,
}

impl std::fmt::Debug for CapabilityMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityMatcher")
            .field("value_rules", &self.value_rules)
            .field("one_of_rules", &self.one_of_rules)
            .finish_non_exhaustive()
    }
}

impl CapabilityMatcher {
    /// Creates a [`CapabilityMatcher`] without rules.
    #[must_use]
    pub fn new(oracle: Arc<dyn EquivalenceOracle>) -> Self {
        Self {
            oracle,
            value_rules: Vec::new(),
            one_of_rules: Vec::new(),
        }
    }

    /// Adds a value rule while constructing a [`CapabilityMatcher`].
    #[must_use]
    #[inline]
    pub fn value_rule(
        mut self,
        domain: impl Into<String>,
        range: impl Into<String>,
        literal: impl Into<Literal>,
    ) -> Self {
        self.add_value_rule(domain, range, literal);
        self
    }

    /// Adds a one-of rule while constructing a [`CapabilityMatcher`].
    #[must_use]
    #[inline]
    pub fn one_of_rule(mut self, domain: impl Into<String>, range: impl Into<String>) -> Self {
        self.add_one_of_rule(domain, range);
        self
    }

    /// Appends a value rule.
    pub fn add_value_rule(
        &mut self,
        domain: impl Into<String>,
        range: impl Into<String>,
        literal: impl Into<Literal>,
    ) {
        self.value_rules.push(ValueRule {
            domain: domain.into(),
            range: range.into(),
            literal: literal.into(),
        });
    }

    /// Appends a one-of rule.
    pub fn add_one_of_rule(&mut self, domain: impl Into<String>, range: impl Into<String>) {
        self.one_of_rules.push(OneOfRule {
            domain: domain.into(),
            range: range.into(),
        });
    }

    /// Builds a value for the schema a caller has to fill in.
    ///
    /// An interaction without schema builds to `null`.
    ///
    /// # Errors
    ///
    /// See [`CapabilityMatcher::build`].
    pub async fn build_for<I: Interaction + Sync>(&self, interaction: &I) -> Result<Value> {
        match interaction.schema() {
            Some(schema) => self.build(schema).await,
            None => Ok(Value::Null),
        }
    }

    /// Builds a value satisfying a schema.
    ///
    /// Optional object fields no rule matches are omitted.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::UnknownSemantics`] naming the path of the first required
    /// field no rule matches.
    pub async fn build(&self, schema: &DataSchema) -> Result<Value> {
        self.build_at(schema, "input".into()).await
    }

    fn build_at<'a>(&'a self, schema: &'a DataSchema, path: String) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match schema {
                DataSchema::Scalar(scalar) => self.scalar(scalar, &path).await,
                DataSchema::OneOf(one_of) => self.one_of(one_of, &path).await,
                DataSchema::Object(object) => {
                    let mut fields = Map::new();
                    for (name, field) in &object.fields {
                        let field_path = format!("{path}.{name}");
                        match self.build_at(field, field_path).await {
                            Ok(value) => {
                                fields.insert(name.clone(), value);
                            }
                            Err(e)
                                if e.kind() == ErrorKind::UnknownSemantics
                                    && !object.is_required(name) =>
                            {
                                debug!("Omit the optional field `{path}.{name}`");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(Value::Object(fields))
                }
            }
        })
    }

    async fn scalar(&self, scalar: &ScalarSchema, path: &str) -> Result<Value> {
        for annotation in &scalar.annotations {
            for rule in &self.value_rules {
                if rule.literal.kind() != scalar.kind {
                    continue;
                }
                let value = rule.literal.to_value();
                if !scalar.constraints.admits(&value) {
                    continue;
                }
                if self.equivalent(&annotation.domain, &rule.domain).await
                    && self.equivalent(&annotation.range, &rule.range).await
                {
                    return Ok(value);
                }
            }
        }
        Err(unknown_semantics(path))
    }

    async fn one_of(&self, one_of: &OneOfSchema, path: &str) -> Result<Value> {
        for option in &one_of.options {
            for tag in &option.tags {
                for rule in &self.one_of_rules {
                    if self.equivalent(&tag.domain, &rule.domain).await
                        && self.equivalent(&tag.range, &rule.range).await
                    {
                        return Ok(option.constant.clone());
                    }
                }
            }
        }
        Err(unknown_semantics(path))
    }

    async fn equivalent(&self, a: &str, b: &str) -> bool {
        same_concept(self.oracle.as_ref(), a, b).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use wotkit::description::ThingDescription;
    use wotkit::namespace::Namespaces;
    use wotkit::schema::DataSchema;

    use crate::error::{Error, ErrorKind};
    use crate::oracle::StaticOracle;
    use crate::tests::speaker_description;

    use super::{CapabilityMatcher, Literal};

    const WOT: &str = "http://www.matthias-fisch.de/ontologies/wot#";
    const DBR: &str = "http://dbpedia.org/resource/";
    const DBO: &str = "http://dbpedia.org/ontology/";

    fn schema(descriptor: Value) -> DataSchema {
        let namespaces = Namespaces::new()
            .with("wot", WOT)
            .with("dbr", DBR)
            .with("dbo", DBO);
        DataSchema::parse(&descriptor, &namespaces).unwrap()
    }

    fn new_matcher() -> CapabilityMatcher {
        CapabilityMatcher::new(Arc::new(StaticOracle::new()))
    }

    fn colour() -> Value {
        json!({
            "type": "string",
            "oneOf": [
                {"constant": "#00ff00", "dbo:Colour": "dbr:Green"},
                {"constant": "#ff0000", "dbo:Colour": "dbr:Red"}
            ]
        })
    }

    #[tokio::test]
    async fn scalar_from_bare_terms() {
        let matcher = new_matcher().value_rule("Duration", "Second", 30);
        let value = matcher
            .build(&schema(json!({"type": "integer", "Duration": "Second"})))
            .await
            .unwrap();
        assert_eq!(value, json!(30));
    }

    #[tokio::test]
    async fn one_of_selects_the_tagged_constant() {
        let matcher = new_matcher().one_of_rule(format!("{DBO}Colour"), format!("{DBR}Red"));
        assert_eq!(matcher.build(&schema(colour())).await.unwrap(), json!("#ff0000"));

        let matcher = new_matcher().one_of_rule(format!("{DBO}Colour"), format!("{DBR}Blue"));
        let error = matcher.build(&schema(colour())).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownSemantics);
    }

    #[tokio::test]
    async fn seconds_and_milliseconds() {
        let matcher = new_matcher()
            .value_rule(format!("{WOT}Duration"), format!("{DBR}Second"), 30)
            .value_rule(format!("{WOT}Duration"), format!("{DBR}Millisecond"), 30_000);

        let seconds = schema(json!({"type": "integer", "wot:Duration": "dbr:Second"}));
        let milliseconds = schema(json!({"type": "integer", "wot:Duration": "dbr:Millisecond"}));

        assert_eq!(matcher.build(&seconds).await.unwrap(), json!(30));
        assert_eq!(matcher.build(&milliseconds).await.unwrap(), json!(30_000));
    }

    #[tokio::test]
    async fn first_registered_rule_wins() {
        let matcher = new_matcher()
            .value_rule("Duration", "Second", 30)
            .value_rule("Duration", "Second", 45);
        let value = matcher
            .build(&schema(json!({"type": "integer", "Duration": "Second"})))
            .await
            .unwrap();
        assert_eq!(value, json!(30));
    }

    #[tokio::test]
    async fn incompatible_rules_are_skipped() {
        // Datatype mismatch.
        let matcher = new_matcher().value_rule("Duration", "Second", 30);
        let error = matcher
            .build(&schema(json!({"type": "float", "Duration": "Second"})))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownSemantics);

        // Out of range literals fall through to the next rule.
        let matcher = new_matcher()
            .value_rule("Duration", "Second", 30)
            .value_rule("Duration", "Second", 5);
        let value = matcher
            .build(&schema(
                json!({"type": "integer", "Duration": "Second", "minimum": 1, "maximum": 10}),
            ))
            .await
            .unwrap();
        assert_eq!(value, json!(5));

        let matcher = new_matcher().value_rule("Mode", "Silent", Literal::from("mute"));
        let error = matcher
            .build(&schema(
                json!({"type": "string", "Mode": "Silent", "enum": ["quiet", "loud"]}),
            ))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownSemantics);
    }

    #[tokio::test]
    async fn equivalence_through_the_oracle() {
        let oracle = StaticOracle::new()
            .with_link(format!("{DBR}Red"), "http://example.org/colours#Crimson");
        let matcher = CapabilityMatcher::new(Arc::new(oracle))
            .one_of_rule(format!("{DBO}Colour"), "http://example.org/colours#Crimson");

        assert_eq!(matcher.build(&schema(colour())).await.unwrap(), json!("#ff0000"));
    }

    #[tokio::test]
    async fn object_fields() {
        let input = schema(json!({
            "type": "object",
            "properties": {
                "duration": {"type": "integer", "wot:Duration": "dbr:Second"},
                "colour": colour()
            },
            "required": ["duration"]
        }));

        // An optional field without rule is omitted.
        let matcher = new_matcher().value_rule(format!("{WOT}Duration"), format!("{DBR}Second"), 30);
        assert_eq!(matcher.build(&input).await.unwrap(), json!({"duration": 30}));

        let matcher = matcher
            .one_of_rule(format!("{DBO}Colour"), format!("{DBR}Red"));
        assert_eq!(
            matcher.build(&input).await.unwrap(),
            json!({"duration": 30, "colour": "#ff0000"})
        );

        // A required field without rule fails with its path.
        let matcher = new_matcher().one_of_rule(format!("{DBO}Colour"), format!("{DBR}Red"));
        assert_eq!(
            matcher.build(&input).await.unwrap_err(),
            Error::new(
                ErrorKind::UnknownSemantics,
                "No rule matches the semantics of `input.duration`"
            )
        );
    }

    #[tokio::test]
    async fn interaction_without_schema() {
        let td = ThingDescription::from_value(speaker_description("http://127.0.0.1:5000")).unwrap();
        let stop = td.action_by_name("stop").unwrap();
        assert_eq!(new_matcher().build_for(stop).await.unwrap(), Value::Null);

        let welcome = td.action_by_name("welcome").unwrap();
        let matcher = new_matcher().one_of_rule(format!("{WOT}SoundFile"), format!("{WOT}WelcomeSound"));
        assert_eq!(matcher.build_for(welcome).await.unwrap(), json!("welcome.mp3"));
    }

    #[test]
    fn literals() {
        assert_eq!(Literal::from(30).to_value(), json!(30));
        assert_eq!(Literal::from(1.5).to_value(), json!(1.5));
        assert_eq!(Literal::from(true).to_value(), json!(true));
        assert_eq!(Literal::from("#ff0000").to_value(), json!("#ff0000"));
        assert_eq!(Literal::from(f64::NAN).to_value(), Value::Null);
    }
}
