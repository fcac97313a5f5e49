use crate::fetch::{FetchError, FetchRequest, HttpFetcher};
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use std::fmt;
use std::sync::Arc;

/// Key sets fetched from JWKS endpoints, keyed by URI.
///
/// Entries are fetched on first use and kept until cleared. Two concurrent
/// first fetches of the same URI both hit the network; the first one stored
/// wins.
#[derive(Clone)]
pub struct JwksCache {
    fetcher: Arc<dyn HttpFetcher>,
    entries: Arc<DashMap<String, Arc<JwkSet>>>,
}

impl JwksCache {
    /// Create an empty cache fetching through `fetcher`.
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// The key set at `uri`, fetching it on a miss.
    pub async fn get(&self, uri: &str) -> Result<Arc<JwkSet>, FetchError> {
        let cached = self.entries.get(uri).map(|entry| Arc::clone(entry.value()));
        if let Some(set) = cached {
            return Ok(set);
        }

        tracing::debug!(uri = %uri, "Fetching JWKS");
        let body = self.fetcher.fetch(FetchRequest::get(uri)).await?;
        let set: JwkSet = serde_json::from_value(body)
            .map_err(|e| FetchError::InvalidBody(format!("not a JWK set: {}", e)))?;
        tracing::debug!(uri = %uri, keys = set.keys.len(), "JWKS cached");

        let entry = self.entries.entry(uri.to_string()).or_insert(Arc::new(set));
        Ok(Arc::clone(entry.value()))
    }

    /// Store a key set without fetching.
    pub fn insert(&self, uri: impl Into<String>, set: JwkSet) {
        self.entries.insert(uri.into(), Arc::new(set));
    }

    /// Whether `uri` has a cached key set.
    pub fn contains(&self, uri: &str) -> bool {
        self.entries.contains_key(uri)
    }

    /// Drop one entry, or every entry when `uri` is `None`.
    pub fn clear(&self, uri: Option<&str>) {
        match uri {
            Some(uri) => {
                self.entries.remove(uri);
            }
            None => self.entries.clear(),
        }
    }

    /// Number of cached key sets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
