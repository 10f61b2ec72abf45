//! Best-effort parsing of `app-stack-detail-vNNN` resource names.
//!
//! Names that do not follow the convention still parse; they simply yield
//! fewer fields. Nothing here fails.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static VALID_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._~^-]+$").expect("static regex"));
static SEQUENCED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)-v([0-9]{3,})$").expect("static regex"));

/// Prefix reserved for platform-owned resources (e.g. `system:controller:...` roles).
pub const SYSTEM_PREFIX: &str = "system:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedName {
    pub cluster: Option<String>,
    pub app: Option<String>,
    pub stack: Option<String>,
    pub detail: Option<String>,
    pub sequence: Option<i64>,
}

pub trait NameParser: Send + Sync {
    fn parse(&self, name: &str) -> ParsedName;
}

/// Convention parser aware of platform-reserved names.
///
/// Reserved names keep the whole name as the cluster and never invent an
/// application for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceAwareNames;

impl NameParser for ResourceAwareNames {
    fn parse(&self, name: &str) -> ParsedName {
        if name.starts_with(SYSTEM_PREFIX) {
            return ParsedName { cluster: Some(name.to_string()), ..ParsedName::default() };
        }
        parse_conventional(name)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn parse_conventional(name: &str) -> ParsedName {
    if !VALID_NAME.is_match(name) {
        return ParsedName::default();
    }
    let (cluster, sequence) = match SEQUENCED.captures(name) {
        Some(caps) => {
            let seq = caps.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
            (caps.get(1).map_or(name, |m| m.as_str()), seq)
        }
        None => (name, None),
    };
    let mut parts = cluster.splitn(3, '-');
    let app = parts.next().and_then(non_empty);
    let stack = parts.next().and_then(non_empty);
    let detail = parts.next().and_then(non_empty);
    ParsedName { cluster: Some(cluster.to_string()), app, stack, detail, sequence }
}
