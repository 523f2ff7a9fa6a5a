//! Template catalog lookup
//!
//! Template and pack-blueprint management lives elsewhere; the compiler only
//! needs to know whether a template-set id exists.

use std::collections::HashSet;

/// Existence check for template sets referenced by sections
pub trait TemplateCatalog: Send + Sync {
    fn resolve_template_set(&self, id: &str) -> bool;
}

/// Catalog backed by a fixed list of ids (from configuration)
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateCatalog {
    ids: HashSet<String>,
}

impl StaticTemplateCatalog {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl TemplateCatalog for StaticTemplateCatalog {
    fn resolve_template_set(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_catalog_lookup() {
        let catalog = StaticTemplateCatalog::new(["TS-BASIC", "TS-GST"]);
        assert!(catalog.resolve_template_set("TS-GST"));
        assert!(!catalog.resolve_template_set("TS-NONE"));
    }
}
