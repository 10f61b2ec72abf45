//! Spindle annotate: the identity and provenance protocol stored in resource annotations.
//!
//! Every accessor goes through an [`Annotator`], which owns the [`Codec`] and the
//! name parser used for convention-based fallbacks.

#![forbid(unsafe_code)]

pub mod artifact;
pub mod codec;
pub mod manifest;
pub mod moniker;
pub mod policy;

use spindle_core::names::{NameParser, ResourceAwareNames};

pub use codec::{AnnotationValue, Codec, ValueKind};
pub use moniker::{manifest_application, manifest_cluster, SequenceSource};
pub use policy::{CachingProperties, DeployDescription, DeployStrategy, ManifestStrategy, RolloutStrategy, Traffic, Versioned};

/// Annotation keys. `*.spinnaker.io` keys are owned by this protocol; the
/// `*.kubernetes.io` ones are written by other tools and only ever read.
pub mod keys {
    pub const MONIKER_PREFIX: &str = "moniker.spinnaker.io";
    pub const ARTIFACT_PREFIX: &str = "artifact.spinnaker.io";
    pub const TRAFFIC_PREFIX: &str = "traffic.spinnaker.io";
    pub const CACHING_PREFIX: &str = "caching.spinnaker.io";
    pub const STRATEGY_PREFIX: &str = "strategy.spinnaker.io";

    pub const CLUSTER: &str = "moniker.spinnaker.io/cluster";
    pub const APPLICATION: &str = "moniker.spinnaker.io/application";
    pub const STACK: &str = "moniker.spinnaker.io/stack";
    pub const DETAIL: &str = "moniker.spinnaker.io/detail";
    pub const SEQUENCE: &str = "moniker.spinnaker.io/sequence";

    pub const TYPE: &str = "artifact.spinnaker.io/type";
    pub const NAME: &str = "artifact.spinnaker.io/name";
    pub const LOCATION: &str = "artifact.spinnaker.io/location";
    pub const VERSION: &str = "artifact.spinnaker.io/version";

    pub const IGNORE_CACHING: &str = "caching.spinnaker.io/ignore";
    pub const LOAD_BALANCERS: &str = "traffic.spinnaker.io/load-balancers";

    pub const VERSIONED: &str = "strategy.spinnaker.io/versioned";
    pub const MAX_VERSION_HISTORY: &str = "strategy.spinnaker.io/max-version-history";
    pub const USE_SOURCE_CAPACITY: &str = "strategy.spinnaker.io/use-source-capacity";
    pub const RECREATE: &str = "strategy.spinnaker.io/recreate";
    pub const REPLACE: &str = "strategy.spinnaker.io/replace";
    pub const SERVER_SIDE_APPLY: &str = "strategy.spinnaker.io/server-side-apply";

    pub const DEPLOYMENT_REVISION: &str = "deployment.kubernetes.io/revision";
    pub const LAST_APPLIED_CONFIGURATION: &str = "kubectl.kubernetes.io/last-applied-configuration";
}

/// Reads and writes the annotation protocol on manifests.
#[derive(Debug, Clone, Default)]
pub struct Annotator<P = ResourceAwareNames> {
    codec: Codec,
    names: P,
}

impl Annotator {
    pub fn new() -> Self { Self::default() }
}

impl<P: NameParser> Annotator<P> {
    pub fn with_parts(codec: Codec, names: P) -> Self { Self { codec, names } }

    pub fn codec(&self) -> &Codec { &self.codec }
}
