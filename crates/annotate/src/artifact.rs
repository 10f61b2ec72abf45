//! Artifact provenance annotations.

use spindle_core::names::NameParser;
use spindle_core::{AnnotationError, Annotations, Artifact, ArtifactMetadata, Manifest};

use crate::{keys, Annotator};

impl<P: NameParser> Annotator<P> {
    /// Record which artifact produced `manifest`. Resources without a tracked
    /// artifact are left untouched.
    pub fn set_artifact(&self, manifest: &mut Manifest, artifact: Option<&Artifact>) -> Result<(), AnnotationError> {
        let Some(artifact) = artifact else { return Ok(()) };
        for store in manifest.stores_mut() {
            self.store_artifact(store, artifact)?;
        }
        Ok(())
    }

    fn store_artifact(&self, store: &mut Annotations, artifact: &Artifact) -> Result<(), AnnotationError> {
        self.codec.store(store, keys::TYPE, artifact.artifact_type.as_ref())?;
        self.codec.store(store, keys::NAME, artifact.name.as_ref())?;
        self.codec.store(store, keys::LOCATION, artifact.location.as_ref())?;
        self.codec.store(store, keys::VERSION, artifact.version.as_ref())
    }

    /// The artifact `manifest` was deployed from, as seen from `account`.
    pub fn get_artifact(&self, manifest: &Manifest, account: &str) -> Option<Artifact> {
        let annotations = &manifest.annotations;
        let artifact_type = self.codec.read::<String, _>(annotations, keys::TYPE).filter(|t| !t.trim().is_empty())?;

        Some(Artifact {
            artifact_type: Some(artifact_type),
            name: self.codec.read(annotations, keys::NAME),
            location: self.codec.read(annotations, keys::LOCATION),
            version: self.codec.read(annotations, keys::VERSION),
            metadata: ArtifactMetadata {
                last_applied_configuration: self.get_last_applied_configuration(manifest),
                account: Some(account.to_string()),
            },
        })
    }

    /// The manifest kubectl recorded on its last client-side apply, if readable.
    pub fn get_last_applied_configuration(&self, manifest: &Manifest) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.codec.read(&manifest.annotations, keys::LAST_APPLIED_CONFIGURATION)
    }
}
