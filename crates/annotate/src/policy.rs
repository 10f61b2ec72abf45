//! Traffic, caching and rollout-strategy annotations.

use metrics::counter;
use serde::{Deserialize, Serialize};
use spindle_core::names::NameParser;
use spindle_core::{AnnotationError, AttributeStore, Manifest};
use tracing::warn;

use crate::{keys, Annotator};

/// Load balancers routing to a resource, in the order they were attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traffic {
    pub load_balancers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingProperties {
    pub ignore: bool,
    pub application: String,
}

/// Tri-state `versioned` flag; `Default` leaves the choice to the kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Versioned {
    True,
    False,
    #[default]
    Default,
}

impl Versioned {
    fn as_flag(self) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            Self::Default => None,
        }
    }
}

/// How a manifest is pushed to the cluster. At most one flag is set at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStrategy {
    #[default]
    Apply,
    Recreate,
    Replace,
    ServerSideApply { force_conflicts: bool },
}

const DEPLOY_STRATEGY_KEYS: [&str; 3] = [keys::RECREATE, keys::REPLACE, keys::SERVER_SIDE_APPLY];

impl DeployStrategy {
    pub fn from_annotations<S: AttributeStore + ?Sized>(annotations: &S) -> Self {
        let flag = |key: &str| annotations.get(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
        if flag(keys::RECREATE) {
            return Self::Recreate;
        }
        if flag(keys::REPLACE) {
            return Self::Replace;
        }
        match annotations.get(keys::SERVER_SIDE_APPLY) {
            Some(v) if v.eq_ignore_ascii_case("true") => Self::ServerSideApply { force_conflicts: false },
            Some(v) if v.eq_ignore_ascii_case("force-conflicts") => Self::ServerSideApply { force_conflicts: true },
            _ => Self::Apply,
        }
    }

    fn flag(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Apply => None,
            Self::Recreate => Some((keys::RECREATE, "true")),
            Self::Replace => Some((keys::REPLACE, "true")),
            Self::ServerSideApply { force_conflicts: false } => Some((keys::SERVER_SIDE_APPLY, "true")),
            Self::ServerSideApply { force_conflicts: true } => Some((keys::SERVER_SIDE_APPLY, "force-conflicts")),
        }
    }

    /// Replace whatever deploy-strategy flag is present with this one.
    pub fn set_annotations<S: AttributeStore + ?Sized>(self, annotations: &mut S) {
        for key in DEPLOY_STRATEGY_KEYS {
            annotations.remove(key);
        }
        if let Some((key, value)) = self.flag() {
            annotations.insert_if_absent(key, value.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStrategy {
    pub versioned: Versioned,
    pub max_version_history: Option<i64>,
    pub use_source_capacity: bool,
    pub deploy_strategy: DeployStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RolloutStrategy {
    Highlander,
    RedBlack,
    BlueGreen,
}

/// The parts of a deploy request that constrain annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployDescription {
    pub rollout: Option<RolloutStrategy>,
}

impl DeployDescription {
    pub fn is_blue_green(&self) -> bool {
        matches!(self.rollout, Some(RolloutStrategy::RedBlack | RolloutStrategy::BlueGreen))
    }
}

impl<P: NameParser> Annotator<P> {
    pub fn get_traffic(&self, manifest: &Manifest) -> Traffic {
        Traffic { load_balancers: self.codec.read_or(&manifest.annotations, keys::LOAD_BALANCERS, Vec::new()) }
    }

    /// Setting the same load balancers twice is a no-op; setting different ones is a conflict.
    pub fn set_traffic(&self, manifest: &mut Manifest, traffic: &Traffic) -> Result<(), AnnotationError> {
        if manifest.annotations.contains_key(keys::LOAD_BALANCERS) {
            let current = self.get_traffic(manifest);
            if current.load_balancers == traffic.load_balancers {
                return Ok(());
            }
            counter!("annotation_conflicts_total", 1u64);
            return Err(AnnotationError::Conflict {
                key: keys::LOAD_BALANCERS.to_string(),
                existing: current.load_balancers,
                requested: traffic.load_balancers.clone(),
            });
        }
        self.codec.store(&mut manifest.annotations, keys::LOAD_BALANCERS, Some(&traffic.load_balancers))
    }

    pub fn get_caching_properties(&self, manifest: &Manifest) -> CachingProperties {
        let annotations = &manifest.annotations;
        CachingProperties {
            ignore: self.codec.read_or(annotations, keys::IGNORE_CACHING, false),
            application: self.codec.read_or(annotations, keys::APPLICATION, String::new()),
        }
    }

    pub fn get_strategy(&self, manifest: &Manifest) -> ManifestStrategy {
        let annotations = &manifest.annotations;
        let versioned = match self.codec.read::<bool, _>(annotations, keys::VERSIONED) {
            Some(true) => Versioned::True,
            Some(false) => Versioned::False,
            None => Versioned::Default,
        };
        ManifestStrategy {
            versioned,
            max_version_history: self.codec.read(annotations, keys::MAX_VERSION_HISTORY),
            use_source_capacity: self.codec.read_or(annotations, keys::USE_SOURCE_CAPACITY, false),
            deploy_strategy: DeployStrategy::from_annotations(annotations),
        }
    }

    /// Write the strategy. The versioning keys follow first-writer-wins; the
    /// deploy strategy flag replaces any previous one.
    pub fn set_strategy(&self, manifest: &mut Manifest, strategy: &ManifestStrategy) -> Result<(), AnnotationError> {
        let annotations = &mut manifest.annotations;
        self.codec.store(annotations, keys::VERSIONED, strategy.versioned.as_flag().as_ref())?;
        self.codec.store(annotations, keys::MAX_VERSION_HISTORY, strategy.max_version_history.as_ref())?;
        let use_source_capacity = strategy.use_source_capacity.then_some(true);
        self.codec.store(annotations, keys::USE_SOURCE_CAPACITY, use_source_capacity.as_ref())?;
        self.set_deploy_strategy(manifest, strategy.deploy_strategy);
        Ok(())
    }

    pub fn set_deploy_strategy(&self, manifest: &mut Manifest, strategy: DeployStrategy) {
        strategy.set_annotations(&mut manifest.annotations);
    }

    /// Blue/green rollouts disable the previous version rather than deleting
    /// it, so at least two versions must be retained.
    pub fn validate_rollout_constraints(&self, manifest: &Manifest, deploy: &DeployDescription) -> Result<(), AnnotationError> {
        let max_version_history = self.get_strategy(manifest).max_version_history;
        match max_version_history {
            Some(max) if deploy.is_blue_green() && max < 2 => {
                warn!(name = %manifest.name, max, "max version history too low for blue/green rollout");
                Err(AnnotationError::Validation(format!(
                    "the max version history specified in your manifest conflicts with the behavior of the blue/green rollout strategy; \
                     please update your {} annotation to a value greater than or equal to 2",
                    keys::MAX_VERSION_HISTORY
                )))
            }
            _ => Ok(()),
        }
    }
}
