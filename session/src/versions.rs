//! Pyright version lookups against the npm registry.
//!
//! "Latest" resolutions are cached in a single slot with a TTL so version
//! checks don't hammer the registry. When a refresh observes a *different*
//! latest version, the caller is told: an unspecified version option now
//! resolves differently, which invalidates every pooled session that was
//! started without an explicit version.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum VersionLookupError {
    #[error("npm registry request failed")]
    Http(#[from] reqwest::Error),
}

/// Result of a "latest" resolution.
pub(crate) struct LatestLookup {
    pub version: String,
    /// True when this resolution produced a different version than the
    /// previous one (or there was no previous one).
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
struct VersionManifest {
    version: String,
}

#[derive(Debug, Deserialize)]
struct PackageMetadata {
    versions: HashMap<String, serde::de::IgnoredAny>,
}

struct CachedLatest {
    version: String,
    resolved_at: Instant,
}

pub(crate) struct VersionResolver {
    http: reqwest::Client,
    base_url: String,
    ttl: Duration,
    cache: Mutex<Option<CachedLatest>>,
}

impl VersionResolver {
    pub fn new(base_url: String, ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            ttl,
            cache: Mutex::new(None),
        }
    }

    fn package_url(&self, suffix: &str) -> String {
        format!("{}/pyright{suffix}", self.base_url.trim_end_matches('/'))
    }

    /// Resolve "latest", serving from the cache while it is fresh.
    ///
    /// Holding the cache lock across the fetch means concurrent callers
    /// wait for one lookup instead of racing their own.
    pub async fn latest(&self) -> Result<LatestLookup, VersionLookupError> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.resolved_at.elapsed() < self.ttl {
                tracing::debug!("returning cached latest pyright version {}", cached.version);
                return Ok(LatestLookup {
                    version: cached.version.clone(),
                    changed: false,
                });
            }
        }

        let manifest: VersionManifest = self
            .http
            .get(self.package_url("/latest"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!("npm registry reports latest pyright {}", manifest.version);
        let changed = cache
            .as_ref()
            .map_or(true, |cached| cached.version != manifest.version);
        *cache = Some(CachedLatest {
            version: manifest.version.clone(),
            resolved_at: Instant::now(),
        });

        Ok(LatestLookup {
            version: manifest.version,
            changed,
        })
    }

    /// Supported versions, newest first, capped at `limit`. The 1.0.x
    /// line predates the playground protocol features and is filtered out.
    pub async fn list(&self, limit: usize) -> Result<Vec<String>, VersionLookupError> {
        let metadata: PackageMetadata = self
            .http
            .get(self.package_url(""))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut versions: Vec<String> = metadata
            .versions
            .into_keys()
            .filter(|version| !version.starts_with("1.0."))
            .collect();
        versions.sort_by(|a, b| compare_versions(b, a));
        versions.truncate(limit);
        Ok(versions)
    }
}

/// Order dotted version strings by numeric components, so that
/// `1.1.100 > 1.1.99`. Non-numeric components count as zero; missing
/// trailing components too.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| {
        s.split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect::<Vec<_>>()
    };
    let left = parse(a);
    let right = parse(b);
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}
