//! Application state management
//!
//! Contains shared state accessible across all handlers. Every durable
//! record lives under the configured data directory.

use crate::activation::{ActivationWorkflow, GrantStore, RequestStore};
use crate::audit::JsonlAuditLog;
use crate::config::Settings;
use crate::pipeline::{Compiler, PipelinePolicy, SchemePipeline, StaticTemplateCatalog};
use crate::scheme::{ArtifactStore, DefinitionStore, MetadataStore, SchemeLayout, SectionsIndex};
use crate::storage::KeyLocks;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Scheme metadata records
    pub schemes: Arc<MetadataStore>,

    /// Ordered sections per scheme
    pub sections: Arc<SectionsIndex>,

    /// Import / compile / publish
    pub pipeline: SchemePipeline,

    /// Vendor access requests and grants
    pub activation: ActivationWorkflow,

    /// Append-only audit trail
    pub audit: Arc<JsonlAuditLog>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Self {
        let data_dir = settings.storage.data_dir.as_path();
        let locks = Arc::new(KeyLocks::new(
            data_dir.join("locks"),
            settings.storage.lock_settings(),
        ));
        let layout = SchemeLayout::new(data_dir);
        let audit = Arc::new(JsonlAuditLog::new(data_dir.join("audit.log")));

        let schemes = Arc::new(MetadataStore::new(layout.clone(), locks.clone()));
        let definitions = Arc::new(DefinitionStore::new(layout.clone()));
        let sections = Arc::new(SectionsIndex::new(layout.clone(), locks.clone()));
        let artifacts = Arc::new(ArtifactStore::new(layout));

        let catalog = Arc::new(StaticTemplateCatalog::new(
            settings.pipeline.template_sets.iter().cloned(),
        ));
        let compiler = Compiler::new(schemes.clone(), definitions.clone(), sections.clone(), catalog);
        let pipeline = SchemePipeline::new(
            schemes.clone(),
            definitions,
            sections.clone(),
            artifacts,
            compiler,
            audit.clone(),
            PipelinePolicy {
                count_failed_compiles: settings.pipeline.count_failed_compiles,
            },
        );

        let activation = ActivationWorkflow::new(
            RequestStore::new(data_dir),
            GrantStore::new(data_dir),
            schemes.clone(),
            locks,
            audit.clone(),
        );

        Self {
            schemes,
            sections,
            pipeline,
            activation,
            audit,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
