use std::sync::Arc;

use futures_util::future::join_all;

use reqwest::Url;

use tracing::{debug, info, warn};

use wotkit::description::{Document, HTTP_SCHEME};

use crate::client::ThingClient;
use crate::failure::{Probe, Target};
use crate::oracle::EquivalenceOracle;
use crate::thing::{Capabilities, Thing};

/// Finds the reachable hosts of a static candidate pool.
#[derive(Clone)]
pub struct HostScanner {
    candidates: Vec<Target>,
    probe: Arc<dyn Probe>,
}

impl std::fmt::Debug for HostScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostScanner")
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

impl HostScanner {
    /// Creates a [`HostScanner`] over a candidate pool.
    pub fn new(candidates: impl IntoIterator<Item = Target>, probe: Arc<dyn Probe>) -> Self {
        Self {
            candidates: candidates.into_iter().collect(),
            probe,
        }
    }

    /// Returns the candidate pool.
    #[must_use]
    pub fn candidates(&self) -> &[Target] {
        &self.candidates
    }

    /// Probes every candidate concurrently and returns the reachable ones
    /// in pool order.
    pub async fn scan(&self) -> Vec<Target> {
        let probes = self
            .candidates
            .iter()
            .map(|candidate| self.probe.is_reachable(candidate));

        let reachable = join_all(probes).await;

        let hosts = self
            .candidates
            .iter()
            .zip(reachable)
            .filter_map(|(candidate, reachable)| reachable.then(|| candidate.clone()))
            .collect::<Vec<_>>();

        debug!("{} of {} candidates are reachable", hosts.len(), self.candidates.len());
        hosts
    }

    pub(crate) async fn is_reachable(&self, target: &Target) -> bool {
        self.probe.is_reachable(target).await
    }
}

fn target_of(url: &str) -> Option<Target> {
    let url = Url::parse(url).ok()?;
    Some(Target::new(url.host_str()?, url.port_or_known_default()?))
}

/// Turns the reachable hosts of a [`HostScanner`] into [`Thing`]s.
///
/// Each live host is asked for the document at its root, which is either a
/// single description or a bulletin board. Hosts and entries that fail are
/// skipped.
pub struct Discovery {
    scanner: HostScanner,
    client: ThingClient,
    oracle: Arc<dyn EquivalenceOracle>,
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("scanner", &self.scanner)
            .finish_non_exhaustive()
    }
}

impl Discovery {
    /// Creates a [`Discovery`].
    #[must_use]
    pub fn new(
        scanner: HostScanner,
        client: ThingClient,
        oracle: Arc<dyn EquivalenceOracle>,
    ) -> Self {
        Self {
            scanner,
            client,
            oracle,
        }
    }

    /// Returns the [`HostScanner`].
    #[must_use]
    pub const fn scanner(&self) -> &HostScanner {
        &self.scanner
    }

    /// Discovers every thing exposed by the reachable hosts.
    pub async fn discover(&self) -> Vec<Thing> {
        let mut things = Vec::new();
        for target in self.scanner.scan().await {
            things.extend(self.things_at(&target).await);
        }
        info!("Discovered {} things", things.len());
        things
    }

    /// Returns the first discovered thing offering every capability.
    pub async fn find(&self, capabilities: &Capabilities) -> Option<Thing> {
        for target in self.scanner.scan().await {
            for thing in self.things_at(&target).await {
                if thing.satisfies(capabilities).await {
                    info!("{} offers the required capabilities", thing.source());
                    return Some(thing);
                }
                debug!("{} lacks the required capabilities", thing.source());
            }
        }
        None
    }

    /// Returns every discovered thing offering every capability, in pool
    /// order.
    pub async fn find_all(&self, capabilities: &Capabilities) -> Vec<Thing> {
        let mut found = Vec::new();
        for target in self.scanner.scan().await {
            for thing in self.things_at(&target).await {
                if thing.satisfies(capabilities).await {
                    found.push(thing);
                } else {
                    debug!("{} lacks the required capabilities", thing.source());
                }
            }
        }
        found
    }

    async fn things_at(&self, target: &Target) -> Vec<Thing> {
        let url = format!("{HTTP_SCHEME}://{target}/");

        let document = match self.client.fetch_document(&url).await {
            Ok(document) => document,
            Err(e) => {
                warn!("Skip {target}: {e}");
                return Vec::new();
            }
        };

        match document {
            Document::Thing(description) => vec![self.thing(description, url)],
            Document::BulletinBoard(entries) => {
                let mut things = Vec::new();
                for entry in entries {
                    let reachable = match target_of(&entry.base) {
                        Some(entry_target) if &entry_target == target => true,
                        Some(entry_target) => self.scanner.is_reachable(&entry_target).await,
                        None => false,
                    };
                    if reachable {
                        things.push(self.thing(entry.description, entry.base));
                    } else {
                        warn!("Skip the unreachable bulletin board entry {}", entry.base);
                    }
                }
                things
            }
        }
    }

    fn thing(&self, description: wotkit::description::ThingDescription, source: String) -> Thing {
        Thing::new(description, source, self.client.clone(), self.oracle.clone())
    }
}
