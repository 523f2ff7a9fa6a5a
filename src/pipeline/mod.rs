//! Scheme Pipeline Module
//!
//! Turns an authored definition into something vendors can use:
//!
//! 1. **Validate**: structural and cross-reference checks on raw JSON
//! 2. **Import**: store the normalized definition (draft -> imported)
//! 3. **Compile**: fold the sections index into an artifact (-> compiled)
//! 4. **Publish**: stamp sections published and recompile (-> published)

pub mod catalog;
pub mod compiler;
pub mod lifecycle;
pub mod types;
pub mod validator;

pub use catalog::StaticTemplateCatalog;
pub use compiler::Compiler;
pub use lifecycle::{PipelinePolicy, SchemePipeline};
pub use types::*;
