//! Moniker (identity) annotations.

use smallvec::{smallvec, SmallVec};
use spindle_core::names::NameParser;
use spindle_core::{AnnotationError, Annotations, Manifest, Moniker, ResourceKind};

use crate::{keys, Annotator};

/// Where a moniker sequence may come from, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSource {
    Annotation(&'static str),
    ParsedName,
}

/// Replica sets owned by a deployment controller carry its revision; use it
/// when no explicit sequence was written.
pub fn sequence_sources(kind: &ResourceKind) -> SmallVec<[SequenceSource; 3]> {
    let mut sources: SmallVec<[SequenceSource; 3]> = smallvec![SequenceSource::Annotation(keys::SEQUENCE)];
    if *kind == ResourceKind::ReplicaSet {
        sources.push(SequenceSource::Annotation(keys::DEPLOYMENT_REVISION));
    }
    sources.push(SequenceSource::ParsedName);
    sources
}

impl<P: NameParser> Annotator<P> {
    pub fn get_moniker(&self, manifest: &Manifest) -> Moniker {
        let annotations = &manifest.annotations;
        let parsed = self.names.parse(&manifest.name);

        let sequence = sequence_sources(&manifest.kind).into_iter().find_map(|source| match source {
            SequenceSource::Annotation(key) => self.codec.read::<i64, _>(annotations, key),
            SequenceSource::ParsedName => parsed.sequence,
        });

        Moniker {
            cluster: self.codec.read(annotations, keys::CLUSTER).or(parsed.cluster),
            app: self.codec.read(annotations, keys::APPLICATION).or(parsed.app),
            stack: self.codec.read(annotations, keys::STACK),
            detail: self.codec.read(annotations, keys::DETAIL),
            sequence,
        }
    }

    /// Write `moniker` into the manifest and its pod template, if any.
    pub fn set_moniker(&self, manifest: &mut Manifest, moniker: &Moniker) -> Result<(), AnnotationError> {
        if moniker.app_name().is_none() {
            return Err(AnnotationError::Validation(format!(
                "every deployed resource must be assigned a moniker with an application ({} {} has none)",
                manifest.kind, manifest.name
            )));
        }
        for store in manifest.stores_mut() {
            self.store_moniker(store, moniker)?;
        }
        Ok(())
    }

    fn store_moniker(&self, store: &mut Annotations, moniker: &Moniker) -> Result<(), AnnotationError> {
        self.codec.store(store, keys::CLUSTER, moniker.cluster.as_ref())?;
        self.codec.store(store, keys::APPLICATION, moniker.app.as_ref())?;
        self.codec.store(store, keys::STACK, moniker.stack.as_ref())?;
        self.codec.store(store, keys::DETAIL, moniker.detail.as_ref())?;
        self.codec.store(store, keys::SEQUENCE, moniker.sequence.as_ref())
    }
}

/// Raw cluster annotation, or `""`.
pub fn manifest_cluster(manifest: &Manifest) -> &str {
    manifest.annotations.get(keys::CLUSTER).map(String::as_str).unwrap_or("")
}

/// Raw application annotation, or `""`.
pub fn manifest_application(manifest: &Manifest) -> &str {
    manifest.annotations.get(keys::APPLICATION).map(String::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rs(name: &str) -> Manifest { Manifest::new(ResourceKind::ReplicaSet, name) }

    #[test]
    fn derives_from_name_without_annotations() {
        let m = Manifest::new(ResourceKind::Deployment, "orders-prod-v004");
        let mk = Annotator::new().get_moniker(&m);
        assert_eq!(mk.app.as_deref(), Some("orders"));
        assert_eq!(mk.cluster.as_deref(), Some("orders-prod"));
        assert_eq!(mk.stack, None);
        assert_eq!(mk.detail, None);
        assert_eq!(mk.sequence, Some(4));
    }

    #[test]
    fn annotations_override_name() {
        let mut m = Manifest::new(ResourceKind::Service, "orders-prod-v004");
        m.annotations.insert(keys::APPLICATION.into(), "billing".into());
        m.annotations.insert(keys::CLUSTER.into(), "\"billing-main\"".into());
        m.annotations.insert(keys::SEQUENCE.into(), "9".into());
        let mk = Annotator::new().get_moniker(&m);
        assert_eq!(mk.app.as_deref(), Some("billing"));
        assert_eq!(mk.cluster.as_deref(), Some("billing-main"));
        assert_eq!(mk.sequence, Some(9));
    }

    #[test]
    fn replica_set_falls_back_to_deployment_revision() {
        let mut m = rs("frontend-7d9c8f");
        m.annotations.insert(keys::DEPLOYMENT_REVISION.into(), "5".into());
        assert_eq!(Annotator::new().get_moniker(&m).sequence, Some(5));
    }

    #[test]
    fn explicit_sequence_beats_revision() {
        let mut m = rs("frontend-v002");
        m.annotations.insert(keys::SEQUENCE.into(), "3".into());
        m.annotations.insert(keys::DEPLOYMENT_REVISION.into(), "5".into());
        assert_eq!(Annotator::new().get_moniker(&m).sequence, Some(3));
    }

    #[test]
    fn malformed_revision_falls_through_to_name() {
        let mut m = rs("frontend-v002");
        m.annotations.insert(keys::DEPLOYMENT_REVISION.into(), "five".into());
        assert_eq!(Annotator::new().get_moniker(&m).sequence, Some(2));
    }

    #[test]
    fn revision_ignored_for_other_kinds() {
        let mut m = Manifest::new(ResourceKind::Deployment, "frontend");
        m.annotations.insert(keys::DEPLOYMENT_REVISION.into(), "5".into());
        assert_eq!(Annotator::new().get_moniker(&m).sequence, None);
    }

    #[test]
    fn set_moniker_requires_app() {
        let mut m = Manifest::new(ResourceKind::Deployment, "web");
        let err = Annotator::new().set_moniker(&mut m, &Moniker::default()).unwrap_err();
        assert!(matches!(err, AnnotationError::Validation(_)));
        let err = Annotator::new().set_moniker(&mut m, &Moniker::for_app(" ")).unwrap_err();
        assert!(err.to_string().contains("application"));
        assert!(m.annotations.is_empty());
    }

    #[test]
    fn set_moniker_writes_template_and_round_trips() {
        let annotator = Annotator::new();
        let mut m = Manifest::new(ResourceKind::Deployment, "whatever").with_template();
        let mk = Moniker {
            app: Some("web".into()),
            cluster: Some("web-main".into()),
            stack: Some("main".into()),
            detail: None,
            sequence: Some(7),
        };
        annotator.set_moniker(&mut m, &mk).unwrap();
        assert_eq!(annotator.get_moniker(&m), mk);
        assert_eq!(m.template_annotations.as_ref(), Some(&m.annotations));
        assert_eq!(manifest_cluster(&m), "web-main");
        assert_eq!(manifest_application(&m), "web");
        assert!(!m.annotations.contains_key(keys::DETAIL));
    }

    #[test]
    fn set_moniker_keeps_existing_identity() {
        let annotator = Annotator::new();
        let mut m = Manifest::new(ResourceKind::Deployment, "web");
        annotator.set_moniker(&mut m, &Moniker::for_app("first")).unwrap();
        annotator.set_moniker(&mut m, &Moniker::for_app("second")).unwrap();
        assert_eq!(annotator.get_moniker(&m).app.as_deref(), Some("first"));
    }
}
