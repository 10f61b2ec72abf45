#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use spindle_aggregate::{AccountRegions, ApplicationProvider, MemoryServiceCache, RecordBatch, ServiceCacheReader, ServiceRecord};
use spindle_annotate::{manifest, Annotator};
use spindle_core::{Manifest, Moniker, ResourceKind};

fn deployed(name: &str, app: Option<&str>) -> Manifest {
    let annotator = Annotator::new();
    let mut m = Manifest::new(ResourceKind::Deployment, name).with_template();
    if let Some(app) = app {
        annotator.set_moniker(&mut m, &Moniker::for_app(app)).unwrap();
    }
    m
}

#[test]
fn replay_observations_into_applications() {
    let annotator = Annotator::new();
    let cache = Arc::new(MemoryServiceCache::new());

    // Explicitly annotated, name-derived, and an app annotation overriding the name.
    cache.observe("prod", "us-east-1", &deployed("checkout", Some("shop")), &annotator);
    cache.observe("prod", "us-west-2", &deployed("shop-web-v002", None), &annotator);
    cache.observe("test", "us-east-1", &deployed("cart-v001", Some("shop")), &annotator);
    // Reserved names never produce an application.
    cache.observe("prod", "us-east-1", &Manifest::new(ResourceKind::ClusterRole, "system:aggregate-to-view"), &annotator);

    let provider = ApplicationProvider::new(cache.clone(), cache.clone());
    let apps = provider.applications(true).unwrap();
    assert_eq!(apps.len(), 1);

    let shop = provider.application("shop").unwrap().unwrap();
    assert_eq!(shop.cluster_names["prod"].iter().collect::<Vec<_>>(), vec!["checkout", "shop-web-v002"]);
    assert_eq!(shop.cluster_names["test"].iter().collect::<Vec<_>>(), vec!["cart-v001"]);
    assert!(provider.application("cart").unwrap().is_none());

    let collapsed = provider.applications(false).unwrap();
    assert!(collapsed.get("shop").unwrap().cluster_names.is_empty());
}

#[test]
fn replay_from_yaml_documents() {
    let annotator = Annotator::new();
    let cache = MemoryServiceCache::new();
    let docs = [
        "kind: Service\nmetadata:\n  name: orders\n  annotations:\n    moniker.spinnaker.io/application: \"\\\"orders\\\"\"\n",
        "kind: ReplicaSet\nmetadata:\n  name: orders-7d9c8f\n  annotations:\n    deployment.kubernetes.io/revision: \"4\"\n",
    ];
    for doc in docs {
        let (_, m) = manifest::parse_document(doc).unwrap();
        cache.observe("prod", "us-east-1", &m, &annotator);
    }
    let records = cache.read_all("prod", "us-east-1").unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.moniker.app.as_deref() == Some("orders")));
    let rs = records.iter().find(|r| r.service_name == "orders-7d9c8f").unwrap();
    assert_eq!(rs.moniker.sequence, Some(4));
}

struct FailingCache;

impl ServiceCacheReader for FailingCache {
    fn read_all(&self, account: &str, region: &str) -> Result<Vec<ServiceRecord>> {
        if region == "broken" {
            return Err(anyhow!("cache unavailable"));
        }
        Ok(vec![ServiceRecord {
            account: account.into(),
            region: region.into(),
            service_name: "svc".into(),
            moniker: Moniker::for_app("app"),
        }])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reader_failures_reach_the_caller() {
    let accounts = Arc::new(vec![AccountRegions { name: "prod".into(), regions: vec!["ok".into(), "broken".into()] }]);
    let provider = ApplicationProvider::new(accounts, Arc::new(FailingCache));

    let err = provider.applications(true).unwrap_err();
    assert!(format!("{:#}", err).contains("prod/broken"), "err={:#}", err);
    let err = provider.applications_parallel(true).await.unwrap_err();
    assert!(format!("{:#}", err).contains("cache unavailable"), "err={:#}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn record_file_order_does_not_matter() {
    let file = r#"[
        {"account": "a1", "region": "r1", "serviceName": "svc", "moniker": {"app": "x"}},
        {"account": "a1", "region": "r1", "serviceName": "svc", "moniker": {"app": "y"}},
        {"account": "a2", "region": "r1", "serviceName": "svc", "moniker": {"app": "x"}}
    ]"#;
    let forward: Vec<ServiceRecord> = serde_json::from_str(file).unwrap();
    let reversed: Vec<ServiceRecord> = forward.iter().rev().cloned().collect();

    let mut views = Vec::new();
    for records in [forward, reversed] {
        let batch: Arc<RecordBatch> = Arc::new(records.into_iter().collect());
        let provider = ApplicationProvider::new(batch.clone(), batch);
        views.push(provider.applications(true).unwrap().into_vec());
        views.push(provider.applications_parallel(true).await.unwrap().into_vec());
    }
    let names: Vec<&str> = views[0].iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
    assert_eq!(views[0][0].cluster_names.keys().collect::<Vec<_>>(), vec!["a1", "a2"]);
    assert!(views.iter().all(|v| v == &views[0]));
}

/// Healthy shards block until released; the `broken` shard fails at once.
#[derive(Default)]
struct GatedCache {
    released: AtomicBool,
    finished: AtomicUsize,
}

impl ServiceCacheReader for GatedCache {
    fn read_all(&self, account: &str, region: &str) -> Result<Vec<ServiceRecord>> {
        if region == "broken" {
            return Err(anyhow!("cache unavailable"));
        }
        while !self.released.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ServiceRecord { account: account.into(), region: region.into(), service_name: "svc".into(), moniker: Moniker::for_app("app") }])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shard_failure_does_not_wait_for_running_folds() {
    let accounts = Arc::new(vec![AccountRegions { name: "prod".into(), regions: vec!["slow-a".into(), "broken".into(), "slow-b".into()] }]);
    let cache = Arc::new(GatedCache::default());
    let provider = ApplicationProvider::new(accounts, cache.clone());

    let err = tokio::time::timeout(Duration::from_secs(10), provider.applications_parallel(true))
        .await
        .expect("aggregation should fail without waiting for blocked shards")
        .unwrap_err();
    assert!(format!("{:#}", err).contains("prod/broken"), "err={:#}", err);
    assert_eq!(cache.finished.load(Ordering::SeqCst), 0);

    cache.released.store(true, Ordering::SeqCst);
}
