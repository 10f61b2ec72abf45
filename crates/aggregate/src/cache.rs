//! In-memory regional service sources, keyed by (account, region).

use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use rustc_hash::FxHashMap;
use spindle_annotate::Annotator;
use spindle_core::names::NameParser;
use spindle_core::Manifest;
use tracing::debug;

use crate::{AccountRegions, AccountRepository, ServiceCacheReader, ServiceRecord};

type ShardKey = (String, String);

/// Latest record per service name within each account/region shard.
#[derive(Default)]
pub struct MemoryServiceCache {
    shards: RwLock<FxHashMap<ShardKey, FxHashMap<String, ServiceRecord>>>,
}

impl MemoryServiceCache {
    pub fn new() -> Self { Self::default() }

    /// Insert or replace the record for `record.service_name` in its shard.
    pub fn put(&self, record: ServiceRecord) {
        let key = (record.account.clone(), record.region.clone());
        let mut shards = self.shards.write().unwrap_or_else(PoisonError::into_inner);
        shards.entry(key).or_default().insert(record.service_name.clone(), record);
    }

    /// Record a deployed manifest as seen in `account`/`region`.
    pub fn observe<P: NameParser>(&self, account: &str, region: &str, manifest: &Manifest, annotator: &Annotator<P>) {
        let record = ServiceRecord::from_manifest(account, region, manifest, annotator);
        debug!(account = %account, region = %region, service = %record.service_name, app = ?record.moniker.app, "observed service");
        self.put(record);
    }

    pub fn len(&self) -> usize {
        let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
        shards.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl ServiceCacheReader for MemoryServiceCache {
    fn read_all(&self, account: &str, region: &str) -> Result<Vec<ServiceRecord>> {
        let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
        let key = (account.to_string(), region.to_string());
        let mut out: Vec<ServiceRecord> = shards.get(&key).map(|s| s.values().cloned().collect()).unwrap_or_default();
        out.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        Ok(out)
    }
}

impl AccountRepository for MemoryServiceCache {
    /// Accounts and regions that currently hold records, in sorted order.
    fn accounts(&self) -> Vec<AccountRegions> {
        let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
        account_regions(shards.keys())
    }
}

/// A fixed batch of records, e.g. loaded from a file. Unlike
/// [`MemoryServiceCache`], records sharing a service name are all kept, so the
/// folded result does not depend on the order of the batch.
#[derive(Debug, Default)]
pub struct RecordBatch {
    shards: FxHashMap<ShardKey, Vec<ServiceRecord>>,
    len: usize,
}

impl RecordBatch {
    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }
}

impl FromIterator<ServiceRecord> for RecordBatch {
    fn from_iter<I: IntoIterator<Item = ServiceRecord>>(iter: I) -> Self {
        let mut batch = Self::default();
        for record in iter {
            let key = (record.account.clone(), record.region.clone());
            batch.shards.entry(key).or_default().push(record);
            batch.len += 1;
        }
        batch
    }
}

impl ServiceCacheReader for RecordBatch {
    fn read_all(&self, account: &str, region: &str) -> Result<Vec<ServiceRecord>> {
        let key = (account.to_string(), region.to_string());
        Ok(self.shards.get(&key).cloned().unwrap_or_default())
    }
}

impl AccountRepository for RecordBatch {
    fn accounts(&self) -> Vec<AccountRegions> { account_regions(self.shards.keys()) }
}

fn account_regions<'a>(keys: impl Iterator<Item = &'a ShardKey>) -> Vec<AccountRegions> {
    let mut by_account: FxHashMap<&str, Vec<String>> = FxHashMap::default();
    for (account, region) in keys {
        by_account.entry(account.as_str()).or_default().push(region.clone());
    }
    let mut out: Vec<AccountRegions> = by_account
        .into_iter()
        .map(|(name, mut regions)| {
            regions.sort();
            AccountRegions { name: name.to_string(), regions }
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}
