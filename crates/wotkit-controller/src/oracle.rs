use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use indexmap::{IndexMap, IndexSet};

use tracing::warn;

use crate::error::{Error, ErrorKind, Result};

/// Answers whether two semantic identifiers denote the same concept.
///
/// The relation is the transitive closure of an undirected equivalence
/// graph, so it is reflexive, symmetric and transitive.
#[async_trait]
pub trait EquivalenceOracle: Send + Sync {
    /// Checks whether two IRIs are equivalent.
    ///
    /// # Errors
    ///
    /// The equivalence service could not be queried.
    async fn equivalent(&self, a: &str, b: &str) -> Result<bool>;

    /// Lists the IRIs equivalent to the given one, excluding itself.
    ///
    /// # Errors
    ///
    /// The equivalence service could not be queried.
    async fn equivalents(&self, iri: &str) -> Result<Vec<String>>;
}

// Identical identifiers never reach the oracle. A failing oracle is logged
// and treated as a negative answer.
pub(crate) async fn same_concept(oracle: &dyn EquivalenceOracle, a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    match oracle.equivalent(a, b).await {
        Ok(equivalent) => equivalent,
        Err(e) => {
            warn!("Treat `{a}` and `{b}` as not equivalent: {e}");
            false
        }
    }
}

/// An in-memory equivalence graph.
///
/// Links are undirected and equivalence follows chains of links.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    links: IndexMap<String, IndexSet<String>>,
}

impl StaticOracle {
    /// Creates an empty [`StaticOracle`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a link while constructing a [`StaticOracle`].
    #[must_use]
    #[inline]
    pub fn with_link(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.link(a, b);
        self
    }

    /// Declares two IRIs equivalent.
    pub fn link(&mut self, a: impl Into<String>, b: impl Into<String>) {
        let a = a.into();
        let b = b.into();
        self.links.entry(a.clone()).or_default().insert(b.clone());
        self.links.entry(b).or_default().insert(a);
    }

    // Breadth-first visit of the connected component of `iri`.
    fn closure<'a>(&'a self, iri: &'a str) -> IndexSet<&'a str> {
        let mut visited = IndexSet::new();
        let mut queue = VecDeque::from([iri]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(neighbours) = self.links.get(current) {
                queue.extend(neighbours.iter().map(String::as_str));
            }
        }

        visited.shift_remove(iri);
        visited
    }
}

#[async_trait]
impl EquivalenceOracle for StaticOracle {
    async fn equivalent(&self, a: &str, b: &str) -> Result<bool> {
        Ok(a == b || self.closure(a).contains(b))
    }

    async fn equivalents(&self, iri: &str) -> Result<Vec<String>> {
        Ok(self.closure(iri).into_iter().map(str::to_owned).collect())
    }
}

/// Default number of answers kept by a [`CachedOracle`].
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

// Evicts the oldest answers once `capacity` is reached.
fn remember<K: std::hash::Hash + Eq, V>(
    cache: &mut IndexMap<K, V>,
    capacity: usize,
    key: K,
    value: V,
) {
    while cache.len() >= capacity.max(1) {
        cache.shift_remove_index(0);
    }
    cache.insert(key, value);
}

/// Memoizes the answers of another oracle.
///
/// At most `capacity` pairs and `capacity` lists are kept, the oldest ones
/// are evicted first. Failed queries are not cached.
pub struct CachedOracle<O> {
    inner: O,
    capacity: usize,
    pairs: Mutex<IndexMap<(String, String), bool>>,
    lists: Mutex<IndexMap<String, Vec<String>>>,
}

impl<O: EquivalenceOracle> CachedOracle<O> {
    /// Wraps an oracle, keeping up to [`DEFAULT_CACHE_CAPACITY`] answers.
    #[must_use]
    pub fn new(inner: O) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    /// Wraps an oracle, keeping up to `capacity` answers of each kind.
    #[must_use]
    pub fn with_capacity(inner: O, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            pairs: Mutex::new(IndexMap::new()),
            lists: Mutex::new(IndexMap::new()),
        }
    }

    // Equivalence is symmetric, so both orders share one entry.
    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_owned(), b.to_owned())
        } else {
            (b.to_owned(), a.to_owned())
        }
    }
}

#[async_trait]
impl<O: EquivalenceOracle> EquivalenceOracle for CachedOracle<O> {
    async fn equivalent(&self, a: &str, b: &str) -> Result<bool> {
        let key = Self::key(a, b);
        if let Some(answer) = self.pairs.lock().ok().and_then(|pairs| pairs.get(&key).copied()) {
            return Ok(answer);
        }

        let answer = self.inner.equivalent(a, b).await?;
        if let Ok(mut pairs) = self.pairs.lock() {
            remember(&mut *pairs, self.capacity, key, answer);
        }
        Ok(answer)
    }

    async fn equivalents(&self, iri: &str) -> Result<Vec<String>> {
        if let Some(list) = self.lists.lock().ok().and_then(|lists| lists.get(iri).cloned()) {
            return Ok(list);
        }

        let list = self.inner.equivalents(iri).await?;
        if let Ok(mut lists) = self.lists.lock() {
            remember(&mut *lists, self.capacity, iri.to_owned(), list.clone());
        }
        Ok(list)
    }
}

fn oracle_error(description: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Oracle, description)
}

/// The public Linked Open Vocabularies endpoint.
pub const DEFAULT_SPARQL_ENDPOINT: &str = "http://lov.okfn.org/dataset/lov/sparql";

#[cfg(feature = "sparql")]
pub use sparql::SparqlOracle;

#[cfg(feature = "sparql")]
mod sparql {
    use std::time::Duration;

    use async_trait::async_trait;

    use reqwest::Client;
    use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};

    use serde::Deserialize;
    use serde::de::DeserializeOwned;

    use tracing::debug;

    use wotkit::namespace::is_absolute_iri;

    use crate::error::Result;

    use super::{EquivalenceOracle, oracle_error};

    const PREFIXES: &str = "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
                            PREFIX owl: <http://www.w3.org/2002/07/owl#>\n";

    const PREDICATES: [&str; 3] = ["rdfs:seeAlso", "owl:sameAs", "owl:equivalentClass"];

    #[derive(Deserialize)]
    struct AskAnswer {
        boolean: bool,
    }

    #[derive(Deserialize)]
    struct SelectAnswer {
        results: Results,
    }

    #[derive(Deserialize)]
    struct Results {
        bindings: Vec<Binding>,
    }

    #[derive(Deserialize)]
    struct Binding {
        o: Option<Term>,
    }

    #[derive(Deserialize)]
    struct Term {
        #[serde(rename = "type")]
        kind: String,
        value: String,
    }

    // Characters which cannot appear inside an `<...>` IRI reference.
    fn check_iri(iri: &str) -> Result<()> {
        if iri
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\'))
        {
            return Err(oracle_error(format!("`{iri}` cannot be used in a query")));
        }
        Ok(())
    }

    fn ask_query(a: &str, b: &str) -> String {
        let patterns = PREDICATES
            .iter()
            .flat_map(|predicate| {
                [
                    format!("{{ <{a}> {predicate}+ <{b}> . }}"),
                    format!("{{ <{b}> {predicate}+ <{a}> . }}"),
                ]
            })
            .collect::<Vec<_>>()
            .join(" UNION ");
        format!("{PREFIXES}ASK {{ {patterns} }}")
    }

    fn select_query(iri: &str) -> String {
        let patterns = PREDICATES
            .iter()
            .flat_map(|predicate| {
                [
                    format!("{{ <{iri}> {predicate}+ ?o . }}"),
                    format!("{{ ?o {predicate}+ <{iri}> . }}"),
                ]
            })
            .collect::<Vec<_>>()
            .join(" UNION ");
        format!("{PREFIXES}SELECT DISTINCT ?o {{ {patterns} }}")
    }

    /// An oracle querying a `SPARQL` endpoint.
    ///
    /// Equivalence follows `rdfs:seeAlso`, `owl:sameAs` and
    /// `owl:equivalentClass` chains in both directions.
    #[derive(Debug, Clone)]
    pub struct SparqlOracle {
        endpoint: String,
        client: Client,
    }

    impl SparqlOracle {
        /// Creates a [`SparqlOracle`] for the given endpoint.
        ///
        /// # Errors
        ///
        /// The `HTTP` client could not be built.
        pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
            let client = Client::builder().timeout(timeout).build()?;
            Ok(Self {
                endpoint: endpoint.into(),
                client,
            })
        }

        /// Returns the endpoint.
        #[must_use]
        pub fn endpoint(&self) -> &str {
            &self.endpoint
        }

        async fn query<T: DeserializeOwned>(&self, query: String) -> Result<T> {
            debug!("Query {}: {query}", self.endpoint);

            let response = self
                .client
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "application/sparql-query")
                .header(ACCEPT, "application/sparql-results+json")
                .header(USER_AGENT, "wotkit-controller")
                .body(query)
                .send()
                .await
                .map_err(|e| oracle_error(format!("Endpoint unreachable: {e}")))?;

            if !response.status().is_success() {
                return Err(oracle_error(format!(
                    "Endpoint answered with status {}",
                    response.status()
                )));
            }

            response
                .json::<T>()
                .await
                .map_err(|e| oracle_error(format!("Malformed endpoint answer: {e}")))
        }
    }

    #[async_trait]
    impl EquivalenceOracle for SparqlOracle {
        async fn equivalent(&self, a: &str, b: &str) -> Result<bool> {
            if a == b {
                return Ok(true);
            }
            check_iri(a)?;
            check_iri(b)?;
            // Bare vocabulary terms are unknown to any knowledge base.
            if !is_absolute_iri(a) || !is_absolute_iri(b) {
                return Ok(false);
            }

            let answer: AskAnswer = self.query(ask_query(a, b)).await?;
            Ok(answer.boolean)
        }

        async fn equivalents(&self, iri: &str) -> Result<Vec<String>> {
            check_iri(iri)?;
            if !is_absolute_iri(iri) {
                return Ok(Vec::new());
            }

            let answer: SelectAnswer = self.query(select_query(iri)).await?;
            Ok(answer
                .results
                .bindings
                .into_iter()
                .filter_map(|binding| binding.o)
                .filter(|term| term.kind == "uri" && term.value != iri)
                .map(|term| term.value)
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use crate::error::ErrorKind;

        use super::{ask_query, check_iri, select_query};

        #[test]
        fn queries_cover_both_directions() {
            let query = ask_query("http://a.org/A", "http://b.org/B");
            assert!(query.starts_with("PREFIX rdfs:"));
            assert!(query.contains("ASK {"));
            assert!(query.contains("{ <http://a.org/A> owl:sameAs+ <http://b.org/B> . }"));
            assert!(query.contains("{ <http://b.org/B> rdfs:seeAlso+ <http://a.org/A> . }"));
            assert_eq!(query.matches(" UNION ").count(), 5);

            let query = select_query("http://a.org/A");
            assert!(query.contains("SELECT DISTINCT ?o"));
            assert!(query.contains("{ ?o owl:equivalentClass+ <http://a.org/A> . }"));
        }

        #[test]
        fn injection_is_rejected() {
            assert!(check_iri("http://dbpedia.org/resource/Second").is_ok());
            for iri in ["http://a.org/A> } DROP ALL {", "http://a.org/A B", "http://a.org/`"] {
                assert_eq!(check_iri(iri).unwrap_err().kind(), ErrorKind::Oracle);
            }
        }
    }
}
