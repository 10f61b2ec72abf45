//! Spindle aggregate: fold per-service cache records from many accounts and
//! regions into application views.
//!
//! The fold is associative and commutative, so shards (one per account/region)
//! can be folded independently and merged in any order.

#![forbid(unsafe_code)]

pub mod cache;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use spindle_annotate::Annotator;
use spindle_core::names::NameParser;
use spindle_core::{Manifest, Moniker};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use cache::{MemoryServiceCache, RecordBatch};

/// One service as observed by a regional cache read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub account: String,
    pub region: String,
    pub service_name: String,
    #[serde(default)]
    pub moniker: Moniker,
}

impl ServiceRecord {
    /// Build a record for a deployed manifest, deriving its moniker from annotations.
    pub fn from_manifest<P: NameParser>(account: &str, region: &str, manifest: &Manifest, annotator: &Annotator<P>) -> Self {
        Self {
            account: account.to_string(),
            region: region.to_string(),
            service_name: manifest.name.clone(),
            moniker: annotator.get_moniker(manifest),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// account -> service names
    pub cluster_names: BTreeMap<String, BTreeSet<String>>,
}

impl Application {
    pub fn new(name: &str) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("name".to_string(), name.to_string());
        Self { name: name.to_string(), attributes, cluster_names: BTreeMap::new() }
    }

    /// Union with `other`; existing attribute values win.
    pub fn merge(&mut self, other: Application) {
        for (k, v) in other.attributes {
            self.attributes.entry(k).or_insert(v);
        }
        for (account, names) in other.cluster_names {
            self.cluster_names.entry(account).or_default().extend(names);
        }
    }
}

/// Applications keyed by name; at most one per name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationSet {
    apps: BTreeMap<String, Application>,
}

impl ApplicationSet {
    pub fn len(&self) -> usize { self.apps.len() }
    pub fn is_empty(&self) -> bool { self.apps.is_empty() }

    /// Fold one record in. Records without an application are dropped; returns whether it counted.
    pub fn fold(&mut self, record: &ServiceRecord, expand: bool) -> bool {
        let Some(app) = record.moniker.app_name() else {
            counter!("aggregate_records_dropped_total", 1u64);
            debug!(account = %record.account, region = %record.region, service = %record.service_name, "record without application dropped");
            return false;
        };
        let entry = self.apps.entry(app.to_string()).or_insert_with(|| Application::new(app));
        if expand {
            entry
                .cluster_names
                .entry(record.account.clone())
                .or_default()
                .insert(record.service_name.clone());
        }
        true
    }

    pub fn merge(&mut self, other: ApplicationSet) {
        for (name, app) in other.apps {
            match self.apps.get_mut(&name) {
                Some(existing) => existing.merge(app),
                None => { self.apps.insert(name, app); }
            }
        }
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&Application> {
        self.apps.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Application> {
        self.apps.values()
    }

    pub fn into_vec(self) -> Vec<Application> {
        self.apps.into_values().collect()
    }
}

/// Fold `records` into applications, ignoring which account/region each came from.
pub fn aggregate<'a, I>(records: I, expand: bool) -> ApplicationSet
where
    I: IntoIterator<Item = &'a ServiceRecord>,
{
    let mut out = ApplicationSet::default();
    let mut seen = 0u64;
    for record in records {
        seen += 1;
        out.fold(record, expand);
    }
    counter!("aggregate_records_total", seen);
    out
}

/// Regional cache collaborator. Reads are eventually consistent snapshots.
pub trait ServiceCacheReader: Send + Sync {
    fn read_all(&self, account: &str, region: &str) -> Result<Vec<ServiceRecord>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegions {
    pub name: String,
    pub regions: Vec<String>,
}

/// Accounts and their regions; fixed for the duration of one aggregation.
pub trait AccountRepository: Send + Sync {
    fn accounts(&self) -> Vec<AccountRegions>;
}

impl AccountRepository for Vec<AccountRegions> {
    fn accounts(&self) -> Vec<AccountRegions> { self.clone() }
}

fn max_parallel_shards() -> usize {
    std::env::var("SPINDLE_AGG_PARALLELISM")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(4)
}

fn fold_shard(cache: &dyn ServiceCacheReader, account: &str, region: &str, expand: bool) -> Result<ApplicationSet> {
    let records = cache
        .read_all(account, region)
        .with_context(|| format!("reading services for {}/{}", account, region))?;
    counter!("aggregate_shards_total", 1u64);
    debug!(account = %account, region = %region, records = records.len(), "folding shard");
    Ok(aggregate(&records, expand))
}

/// Application views over every configured account and region.
pub struct ApplicationProvider {
    accounts: Arc<dyn AccountRepository>,
    cache: Arc<dyn ServiceCacheReader>,
}

impl ApplicationProvider {
    pub fn new(accounts: Arc<dyn AccountRepository>, cache: Arc<dyn ServiceCacheReader>) -> Self {
        Self { accounts, cache }
    }

    /// Sequential scan-and-fold. Cache read failures propagate; callers own retries.
    pub fn applications(&self, expand: bool) -> Result<ApplicationSet> {
        let t0 = Instant::now();
        let mut out = ApplicationSet::default();
        for account in self.accounts.accounts() {
            for region in &account.regions {
                out.merge(fold_shard(self.cache.as_ref(), &account.name, region, expand)?);
            }
        }
        histogram!("aggregate_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(apps = out.len(), expand, "aggregated applications");
        Ok(out)
    }

    /// Expanded lookup of a single application by exact name.
    pub fn application(&self, name: &str) -> Result<Option<Application>> {
        Ok(self.applications(true)?.get(name).cloned())
    }

    /// Fold every shard on the blocking pool, bounded by `SPINDLE_AGG_PARALLELISM`,
    /// merging partials as they complete.
    ///
    /// The first failed shard fails the whole call. Shards still waiting for a
    /// permit are cancelled; folds already running on the blocking pool cannot
    /// be interrupted, so they finish and their results are discarded.
    pub async fn applications_parallel(&self, expand: bool) -> Result<ApplicationSet> {
        let t0 = Instant::now();
        let permits = Arc::new(Semaphore::new(max_parallel_shards()));
        let mut tasks = JoinSet::new();
        for account in self.accounts.accounts() {
            for region in account.regions {
                let cache = Arc::clone(&self.cache);
                let permits = Arc::clone(&permits);
                let account = account.name.clone();
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await?;
                    let partial = tokio::task::spawn_blocking(move || fold_shard(cache.as_ref(), &account, &region, expand)).await??;
                    Ok::<_, anyhow::Error>(partial)
                });
            }
        }
        let shards = tasks.len();
        let mut out = ApplicationSet::default();
        while let Some(joined) = tasks.join_next().await {
            let partial = joined.context("aggregate shard task failed").and_then(|r| r);
            match partial {
                Ok(partial) => out.merge(partial),
                Err(e) => {
                    tasks.abort_all();
                    let cancelled = tasks.len();
                    while tasks.join_next().await.is_some() {}
                    warn!(error = %e, cancelled, shards, "aggregation aborted after shard failure");
                    return Err(e);
                }
            }
        }
        histogram!("aggregate_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(apps = out.len(), shards, expand, "aggregated applications");
        Ok(out)
    }
}
