//! Explicit template registry built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::TrustModelTemplate;

/// Templates keyed by `name@version`.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Arc<dyn TrustModelTemplate>>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template, replacing any previous one with the same identifier.
    pub fn register(&mut self, template: impl TrustModelTemplate + 'static) -> &mut Self {
        let template: Arc<dyn TrustModelTemplate> = Arc::new(template);
        self.templates.insert(template.identifier(), template);
        self
    }

    #[must_use]
    pub fn resolve(&self, identifier: &str) -> Option<Arc<dyn TrustModelTemplate>> {
        self.templates.get(identifier).cloned()
    }

    pub fn templates(&self) -> impl Iterator<Item = &Arc<dyn TrustModelTemplate>> {
        self.templates.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::error::CoreError;
    use crate::evidence::EvidenceType;
    use crate::model::{Params, Spawned, TemplateKind};

    #[derive(Debug)]
    struct Empty(&'static str);

    impl TrustModelTemplate for Empty {
        fn name(&self) -> &str {
            "EMPTY"
        }
        fn version(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn kind(&self) -> TemplateKind {
            TemplateKind::Static
        }
        fn spawn(&self, _params: &Params) -> Result<Spawned, CoreError> {
            Ok(Spawned::default())
        }
        fn evidence_types(&self) -> BTreeSet<EvidenceType> {
            BTreeSet::new()
        }
    }

    #[test]
    fn resolve_by_identifier() {
        let mut registry = TemplateRegistry::new();
        registry.register(Empty("0.0.1")).register(Empty("0.0.2"));
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("EMPTY@0.0.2").is_some());
        assert!(registry.resolve("EMPTY@9.9.9").is_none());
        assert!(registry.resolve("EMPTY").is_none());
    }
}
