//! Activation module - vendor access requests and grants

mod models;
mod store;
mod workflow;

pub use models::{AccessGrant, ActivationRequest, Decision};
pub use store::{GrantStore, RequestStore};
pub use workflow::ActivationWorkflow;
