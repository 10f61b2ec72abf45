//! Loading manifests from YAML/JSON documents and writing annotations back.

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value as Json};
use spindle_core::{Annotations, Manifest, ResourceKind};
use tracing::warn;

fn max_manifest_bytes() -> usize {
    std::env::var("SPINDLE_MAX_MANIFEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000)
}

fn max_manifest_nodes() -> usize {
    std::env::var("SPINDLE_MAX_MANIFEST_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

/// Stops counting as soon as `max` nodes have been seen.
fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max {
            return;
        }
        *cur += 1;
        match v {
            Json::Object(map) => map.values().for_each(|vv| walk(vv, cur, max)),
            Json::Array(arr) => arr.iter().for_each(|vv| walk(vv, cur, max)),
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// Parse a single YAML (or JSON) document into its raw form and a [`Manifest`] view.
pub fn parse_document(text: &str) -> Result<(Json, Manifest)> {
    if text.len() > max_manifest_bytes() {
        return Err(anyhow!("manifest too large (>{} bytes)", max_manifest_bytes()));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(text).context("parsing manifest YAML")?;
    let doc = serde_json::to_value(val).context("converting YAML to JSON")?;
    if node_budget_exceeded(&doc, max_manifest_nodes()) {
        return Err(anyhow!("manifest too complex (>{} nodes)", max_manifest_nodes()));
    }
    let manifest = from_json(&doc)?;
    Ok((doc, manifest))
}

pub fn from_json(doc: &Json) -> Result<Manifest> {
    let kind = doc.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("manifest missing kind"))?;
    let meta = doc.get("metadata");
    let name = meta
        .and_then(|m| m.get("name"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest missing metadata.name"))?;
    let mut manifest = Manifest::new(ResourceKind::parse(kind), name);
    manifest.namespace = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).map(|s| s.to_string());
    manifest.annotations = annotations_at(doc, "/metadata/annotations");
    if doc.pointer("/spec/template").is_some_and(Json::is_object) {
        manifest.template_annotations = Some(annotations_at(doc, "/spec/template/metadata/annotations"));
    }
    Ok(manifest)
}

fn annotations_at(doc: &Json, pointer: &str) -> Annotations {
    let mut out = Annotations::new();
    let Some(obj) = doc.pointer(pointer).and_then(Json::as_object) else { return out };
    for (k, v) in obj {
        match v.as_str() {
            Some(s) => { out.insert(k.clone(), s.to_string()); }
            None => warn!(key = %k, "non-string annotation value ignored"),
        }
    }
    out
}

/// Copy the manifest's annotation stores into `doc`, creating maps as needed.
pub fn write_back(doc: &mut Json, manifest: &Manifest) {
    if let Some(obj) = ensure_object(doc, &["metadata", "annotations"]) {
        fill(obj, &manifest.annotations);
    }
    if let Some(template) = &manifest.template_annotations {
        if doc.pointer("/spec/template").is_some_and(Json::is_object) {
            if let Some(obj) = ensure_object(doc, &["spec", "template", "metadata", "annotations"]) {
                fill(obj, template);
            }
        }
    }
}

fn fill(obj: &mut Map<String, Json>, annotations: &Annotations) {
    for (k, v) in annotations {
        obj.insert(k.clone(), Json::String(v.clone()));
    }
}

fn ensure_object<'a>(root: &'a mut Json, path: &[&str]) -> Option<&'a mut Map<String, Json>> {
    let mut cur = root;
    for seg in path {
        cur = match cur {
            Json::Object(map) => map.entry(seg.to_string()).or_insert_with(|| Json::Object(Map::new())),
            _ => return None,
        };
    }
    cur.as_object_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keys, Annotator};
    use spindle_core::Moniker;

    const DEPLOYMENT: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: orders-prod
  namespace: shop
  annotations:
    team: payments
spec:
  template:
    metadata:
      labels:
        app: orders
";

    #[test]
    fn parses_kind_name_and_stores() {
        let (_, m) = parse_document(DEPLOYMENT).unwrap();
        assert_eq!(m.kind, ResourceKind::Deployment);
        assert_eq!(m.name, "orders-prod");
        assert_eq!(m.namespace.as_deref(), Some("shop"));
        assert_eq!(m.annotations.get("team").map(String::as_str), Some("payments"));
        assert_eq!(m.template_annotations, Some(Annotations::new()));
    }

    #[test]
    fn service_has_no_template_store() {
        let (_, m) = parse_document(r#"{"kind":"Service","metadata":{"name":"orders"}}"#).unwrap();
        assert_eq!(m.template_annotations, None);
    }

    #[test]
    fn errors_are_friendly() {
        let e1 = parse_document("metadata:\n  name: x\n").unwrap_err().to_string();
        assert!(e1.contains("missing kind"), "e1={}", e1);
        let e2 = parse_document("kind: Service\nmetadata: {}\n").unwrap_err().to_string();
        assert!(e2.contains("missing metadata.name"), "e2={}", e2);
    }

    #[test]
    fn write_back_fills_both_stores() {
        let (mut doc, mut m) = parse_document(DEPLOYMENT).unwrap();
        Annotator::new().set_moniker(&mut m, &Moniker::for_app("orders")).unwrap();
        write_back(&mut doc, &m);
        assert_eq!(doc.pointer("/metadata/annotations/team"), Some(&Json::from("payments")));
        let app_ptr = format!("/spec/template/metadata/annotations/{}", keys::APPLICATION.replace('/', "~1"));
        assert_eq!(doc.pointer(&app_ptr), Some(&Json::from("orders")));
        assert_eq!(from_json(&doc).unwrap(), m);
    }

    #[test]
    fn node_budget_counts_nested_values() {
        let doc = serde_json::json!({"kind": "Service", "metadata": {"name": "a", "labels": {"x": "1"}}});
        assert!(!node_budget_exceeded(&doc, 10));
        assert!(node_budget_exceeded(&doc, 6));
        assert!(node_budget_exceeded(&doc, 3));
    }

    #[test]
    fn oversized_documents_are_rejected() {
        let items = vec!["0"; 100_001].join(",");
        let text = format!("kind: ConfigMap\nmetadata:\n  name: big\nitems: [{}]\n", items);
        let err = parse_document(&text).unwrap_err().to_string();
        assert!(err.contains("too complex"), "err={}", err);
    }
}
