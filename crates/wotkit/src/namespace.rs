use std::borrow::Cow;

use hashbrown::HashMap;

use crate::error::{Error, ErrorKind, Result};

/// Returns `true` when `token` is a fully-qualified IRI, that is a scheme
/// followed by `://` and a non-empty host.
#[must_use]
pub fn is_absolute_iri(token: &str) -> bool {
    let Some((scheme, rest)) = token.split_once("://") else {
        return false;
    };

    let mut chars = scheme.chars();
    let valid_scheme = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.rsplit_once('@').map_or(host, |(_, host)| host);

    valid_scheme && !host.is_empty() && !host.starts_with(':')
}

/// A prefix table resolving compact IRIs such as `dbp:open`.
///
/// A table is populated once per Thing Description from the map entries of
/// its `@context` and never changes afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespaces {
    prefixes: HashMap<String, String>,
}

impl Namespaces {
    /// Creates an empty [`Namespaces`] table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a prefix while constructing a [`Namespaces`] table.
    #[must_use]
    #[inline]
    pub fn with(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.register(prefix, iri);
        self
    }

    /// Registers a prefix, replacing any previous IRI bound to it.
    pub fn register(&mut self, prefix: impl Into<String>, iri: impl Into<String>) {
        let prefix = prefix.into();
        let iri = iri.into();
        if let Some(previous) = self.prefixes.insert(prefix.clone(), iri) {
            log::warn!("Prefix `{prefix}` redefined, previous IRI was `{previous}`");
        }
    }

    /// Returns the IRI bound to a prefix, if any.
    #[must_use]
    pub fn prefix(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    /// Returns the number of registered prefixes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// Checks whether the table has no prefixes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Resolves a token into a fully-qualified IRI.
    ///
    /// A fully-qualified IRI is returned unchanged, so resolution is
    /// idempotent.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::MalformedReference`] when the token has no `:`, an
    ///   empty prefix or local part, or more than one `:` separator.
    /// - [`ErrorKind::UnknownPrefix`] when the prefix is not registered.
    pub fn resolve<'a>(&self, token: &'a str) -> Result<Cow<'a, str>> {
        if is_absolute_iri(token) {
            return Ok(Cow::Borrowed(token));
        }

        let (prefix, local) = token.split_once(':').ok_or_else(|| {
            Error::new(
                ErrorKind::MalformedReference,
                format!("`{token}` is neither an IRI nor a compact IRI"),
            )
        })?;

        if prefix.is_empty() || local.is_empty() || local.contains(':') {
            return Err(Error::new(
                ErrorKind::MalformedReference,
                format!("`{token}` cannot be split into prefix and local part"),
            ));
        }

        let iri = self.prefixes.get(prefix).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownPrefix,
                format!("Prefix `{prefix}` of `{token}` is not declared"),
            )
        })?;

        Ok(Cow::Owned(format!("{iri}{local}")))
    }

    /// Resolves a token, returning it unchanged when it cannot be resolved.
    ///
    /// Used for schema annotations and lookup types, where bare vocabulary
    /// terms like `Duration` are legitimate.
    #[must_use]
    pub fn expand(&self, token: &str) -> String {
        self.resolve(token)
            .map_or_else(|_| token.to_owned(), Cow::into_owned)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;

    use super::{Namespaces, is_absolute_iri};

    const DBP: &str = "http://dbpedia.org/property/";

    fn namespaces() -> Namespaces {
        Namespaces::new()
            .with("dbp", DBP)
            .with("m3lite", "http://purl.org/iot/vocab/m3-lite#")
    }

    #[test]
    fn absolute_iris() {
        assert!(is_absolute_iri("http://dbpedia.org/resource/Red"));
        assert!(is_absolute_iri("https://user@example.org:8080/a#b"));
        assert!(!is_absolute_iri("dbp:open"));
        assert!(!is_absolute_iri("http:///path"));
        assert!(!is_absolute_iri("1http://example.org"));
        assert!(!is_absolute_iri("Duration"));
    }

    #[test]
    fn resolve_compact_iri() {
        let ns = namespaces();
        assert_eq!(ns.resolve("dbp:open").unwrap(), "http://dbpedia.org/property/open");
        assert_eq!(
            ns.resolve("m3lite:Door").unwrap(),
            "http://purl.org/iot/vocab/m3-lite#Door"
        );
    }

    #[test]
    fn resolve_is_idempotent() {
        let ns = namespaces();
        let once = ns.resolve("dbp:closed").unwrap().into_owned();
        let twice = ns.resolve(&once).unwrap();
        assert_eq!(once, twice);

        let iri = "http://www.matthias-fisch.de/ontologies/wot#AlarmAction";
        assert_eq!(ns.resolve(iri).unwrap(), iri);
    }

    #[test]
    fn unknown_prefix() {
        let error = namespaces().resolve("saref:OpenCloseState").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownPrefix);
    }

    #[test]
    fn malformed_references() {
        let ns = namespaces();
        for token in ["Duration", ":open", "dbp:", "dbp:a:b", ""] {
            assert_eq!(
                ns.resolve(token).unwrap_err().kind(),
                ErrorKind::MalformedReference,
                "{token}"
            );
        }
    }

    #[test]
    fn expand_is_lenient() {
        let ns = namespaces();
        assert_eq!(ns.expand("dbp:open"), "http://dbpedia.org/property/open");
        assert_eq!(ns.expand("Duration"), "Duration");
        assert_eq!(ns.expand("cc:Permission"), "cc:Permission");
    }

    #[test]
    fn redefined_prefix_replaces() {
        let mut ns = namespaces();
        ns.register("dbp", "http://example.org/");
        assert_eq!(ns.len(), 2);
        assert_eq!(ns.prefix("dbp"), Some("http://example.org/"));
    }
}
