//! Candidate endpoint catalog
//!
//! Copy-on-write store of VPN endpoints:
//! - Readers load a whole snapshot without locking
//! - Every write clones the list, modifies it and swaps it in via `rcu`
//! - The version counter bumps once per committed write
//!
//! Seeded with the built-in catalog until the host replaces it.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One VPN endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Stable identifier, e.g. `de-frankfurt-01`
    pub id: String,
    pub name: String,
    pub country: String,
    pub city: String,
    /// Continent label ("Europe", "North America", "Asia")
    pub region: String,
    pub hostname: String,
    /// Last known latency in milliseconds
    pub ping_ms: u32,
    /// Server load percentage (0-100)
    pub load: u8,
    #[serde(default)]
    pub favorite: bool,
}

impl Endpoint {
    /// Address handed to the latency probe.
    pub fn address(&self) -> &str {
        &self.hostname
    }

    /// Case-insensitive substring match on country or continent.
    pub fn matches_region(&self, region: &str) -> bool {
        let needle = region.to_lowercase();
        self.country.to_lowercase().contains(&needle)
            || self.region.to_lowercase().contains(&needle)
    }
}

/// Lock-free endpoint catalog
pub struct CandidateStore {
    current: ArcSwap<Vec<Endpoint>>,
    version: AtomicU64,
}

impl CandidateStore {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            current: ArcSwap::from_pointee(endpoints),
            version: AtomicU64::new(0),
        }
    }

    /// Store seeded with [`default_catalog`].
    pub fn with_default_catalog() -> Self {
        Self::new(default_catalog())
    }

    /// Current snapshot (lock-free)
    #[inline]
    pub fn snapshot(&self) -> Arc<Vec<Endpoint>> {
        self.current.load_full()
    }

    pub fn list(&self) -> Vec<Endpoint> {
        self.current.load().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    pub fn by_id(&self, id: &str) -> Option<Endpoint> {
        self.current.load().iter().find(|e| e.id == id).cloned()
    }

    pub fn by_region(&self, region: &str) -> Vec<Endpoint> {
        self.current
            .load()
            .iter()
            .filter(|e| e.matches_region(region))
            .cloned()
            .collect()
    }

    pub fn favorites(&self) -> Vec<Endpoint> {
        self.current
            .load()
            .iter()
            .filter(|e| e.favorite)
            .cloned()
            .collect()
    }

    /// Snapshot version, bumped on every write.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn update_ping(&self, id: &str, ping_ms: u32) -> bool {
        self.modify(id, |e| e.ping_ms = ping_ms)
    }

    pub fn update_load(&self, id: &str, load: u8) -> bool {
        self.modify(id, |e| e.load = load.min(100))
    }

    /// Flip the favorite flag. Returns the new value, or `None` for an unknown id.
    pub fn toggle_favorite(&self, id: &str) -> Option<bool> {
        if !self.modify(id, |e| e.favorite = !e.favorite) {
            return None;
        }
        self.by_id(id).map(|e| e.favorite)
    }

    /// Apply many ping results in a single snapshot swap.
    pub fn update_pings(&self, results: &[(String, u32)]) {
        if results.is_empty() {
            return;
        }
        self.current.rcu(|current| {
            let mut next = current.as_ref().clone();
            for endpoint in next.iter_mut() {
                if let Some((_, ping)) = results.iter().find(|(id, _)| *id == endpoint.id) {
                    endpoint.ping_ms = *ping;
                }
            }
            next
        });
        self.bump();
    }

    /// Replace the whole catalog, e.g. after a remote reload.
    pub fn replace_catalog(&self, endpoints: Vec<Endpoint>) {
        let count = endpoints.len();
        self.current.store(Arc::new(endpoints));
        let version = self.bump();
        log::info!("Candidate catalog replaced: {} endpoints (version {})", count, version);
    }

    fn modify(&self, id: &str, apply: impl Fn(&mut Endpoint)) -> bool {
        if !self.current.load().iter().any(|e| e.id == id) {
            return false;
        }
        self.current.rcu(|current| {
            let mut next = current.as_ref().clone();
            if let Some(endpoint) = next.iter_mut().find(|e| e.id == id) {
                apply(endpoint);
            }
            next
        });
        self.bump();
        true
    }

    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for CandidateStore {
    fn default() -> Self {
        Self::with_default_catalog()
    }
}

#[allow(clippy::too_many_arguments)]
fn endpoint(
    id: &str,
    name: &str,
    country: &str,
    city: &str,
    region: &str,
    hostname: &str,
    ping_ms: u32,
    load: u8,
) -> Endpoint {
    Endpoint {
        id: id.to_string(),
        name: name.to_string(),
        country: country.to_string(),
        city: city.to_string(),
        region: region.to_string(),
        hostname: hostname.to_string(),
        ping_ms,
        load,
        favorite: false,
    }
}

/// Built-in catalog with baseline ping and load.
pub fn default_catalog() -> Vec<Endpoint> {
    vec![
        endpoint("de-frankfurt-01", "Germany 1", "Germany", "Frankfurt", "Europe", "de1.gameboost.pro", 23, 45),
        endpoint("nl-amsterdam-01", "Netherlands 1", "Netherlands", "Amsterdam", "Europe", "nl1.gameboost.pro", 31, 38),
        endpoint("fr-paris-01", "France 1", "France", "Paris", "Europe", "fr1.gameboost.pro", 45, 52),
        endpoint("uk-london-01", "UK 1", "United Kingdom", "London", "Europe", "uk1.gameboost.pro", 67, 61),
        endpoint("pl-warsaw-01", "Poland 1", "Poland", "Warsaw", "Europe", "pl1.gameboost.pro", 89, 73),
        endpoint("es-madrid-01", "Spain 1", "Spain", "Madrid", "Europe", "es1.gameboost.pro", 112, 84),
        endpoint("us-east-01", "US East 1", "United States", "New York", "North America", "us-east1.gameboost.pro", 145, 67),
        endpoint("us-west-01", "US West 1", "United States", "Los Angeles", "North America", "us-west1.gameboost.pro", 178, 71),
        endpoint("jp-tokyo-01", "Japan 1", "Japan", "Tokyo", "Asia", "jp1.gameboost.pro", 234, 56),
        endpoint("sg-singapore-01", "Singapore 1", "Singapore", "Singapore", "Asia", "sg1.gameboost.pro", 198, 49),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_seeded() {
        let store = CandidateStore::default();
        assert_eq!(store.len(), 10);
        assert_eq!(store.version(), 0);

        let de = store.by_id("de-frankfurt-01").expect("seeded");
        assert_eq!(de.city, "Frankfurt");
        assert_eq!(de.ping_ms, 23);
        assert_eq!(de.load, 45);
        assert!(store.by_id("xx-nowhere-01").is_none());
    }

    #[test]
    fn region_lookup_matches_country_or_continent() {
        let store = CandidateStore::default();

        let europe: Vec<String> = store.by_region("europe").into_iter().map(|e| e.id).collect();
        assert_eq!(europe.len(), 6);
        assert!(europe.contains(&"de-frankfurt-01".to_string()));
        assert!(europe.contains(&"nl-amsterdam-01".to_string()));

        assert_eq!(store.by_region("United States").len(), 2);
        assert_eq!(store.by_region("GERMANY").len(), 1);
        assert!(store.by_region("Antarctica").is_empty());
    }

    #[test]
    fn toggle_favorite_twice_restores_endpoint() {
        let store = CandidateStore::default();
        let before = store.by_id("fr-paris-01").expect("seeded");

        assert_eq!(store.toggle_favorite("fr-paris-01"), Some(true));
        assert_eq!(store.favorites().len(), 1);
        assert_eq!(store.toggle_favorite("fr-paris-01"), Some(false));

        assert_eq!(store.by_id("fr-paris-01"), Some(before));
        assert!(store.favorites().is_empty());
        assert_eq!(store.toggle_favorite("xx-nowhere-01"), None);
    }

    #[test]
    fn writes_swap_whole_snapshots() {
        let store = CandidateStore::default();
        let old = store.snapshot();

        assert!(store.update_ping("jp-tokyo-01", 120));
        assert!(store.update_load("jp-tokyo-01", 250));
        assert!(!store.update_ping("xx-nowhere-01", 1));

        let jp = store.by_id("jp-tokyo-01").expect("seeded");
        assert_eq!(jp.ping_ms, 120);
        assert_eq!(jp.load, 100);
        // Snapshot taken before the writes is untouched.
        assert_eq!(old.iter().find(|e| e.id == "jp-tokyo-01").map(|e| e.ping_ms), Some(234));
        assert_eq!(store.version(), 2);

        store.update_pings(&[("de-frankfurt-01".into(), 12), ("sg-singapore-01".into(), 90)]);
        assert_eq!(store.by_id("sg-singapore-01").map(|e| e.ping_ms), Some(90));
        assert_eq!(store.version(), 3);

        store.replace_catalog(Vec::new());
        assert!(store.is_empty());
        assert_eq!(store.version(), 4);
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        use std::thread;

        let store = Arc::new(CandidateStore::default());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.snapshot();
                        assert_eq!(snapshot.len(), 10);
                        let pings: Vec<u32> = snapshot.iter().map(|e| e.ping_ms).collect();
                        // All pings in one snapshot come from the same write.
                        let first = pings[0];
                        if first >= 1000 {
                            assert!(pings.iter().all(|p| *p == first));
                        }
                    }
                })
            })
            .collect();

        let writer_store = Arc::clone(&store);
        let writer = thread::spawn(move || {
            for round in 0..200u32 {
                let ids: Vec<(String, u32)> = writer_store
                    .list()
                    .into_iter()
                    .map(|e| (e.id, 1000 + round))
                    .collect();
                writer_store.update_pings(&ids);
            }
        });

        for reader in readers {
            reader.join().expect("reader thread panicked");
        }
        writer.join().expect("writer thread panicked");
        assert_eq!(store.version(), 200);
    }
}
