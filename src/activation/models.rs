//! Activation data models
//!
//! A vendor asks for access to a published scheme; an approver decides the
//! request exactly once. Approval produces (or refreshes) the access grant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role written on every grant issued by the workflow
pub const VENDOR_ROLE: &str = "vendor";

/// Request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Awaiting a decision
    Pending,
    Approved,
    Rejected,
}

/// Approver's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl From<Decision> for RequestStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => RequestStatus::Approved,
            Decision::Rejected => RequestStatus::Rejected,
        }
    }
}

/// A vendor's request for access to a scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest {
    pub request_id: Uuid,
    /// Vendor identity
    pub yoj_id: String,
    pub scheme_id: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub note: Option<String>,
    /// Actor that submitted the request
    #[serde(default)]
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    #[serde(default)]
    pub decision_note: Option<String>,
}

impl ActivationRequest {
    pub fn new(yoj_id: String, scheme_id: String, requested_by: String, note: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            yoj_id,
            scheme_id,
            status: RequestStatus::Pending,
            note,
            requested_by,
            requested_at: Utc::now(),
            decided_at: None,
            decided_by: None,
            decision_note: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Record the decision on a copy of this request
    pub fn decided(&self, decision: Decision, decider: &str, note: Option<String>) -> Self {
        Self {
            status: decision.into(),
            decided_at: Some(Utc::now()),
            decided_by: Some(decider.to_string()),
            decision_note: note,
            ..self.clone()
        }
    }
}

/// Durable record enabling a vendor's access to a scheme.
/// Identity is the (yojId, schemeId) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub yoj_id: String,
    pub scheme_id: String,
    pub enabled: bool,
    pub enabled_at: DateTime<Utc>,
    pub enabled_by: String,
    pub role: String,
    /// Request that last enabled this grant
    pub request_id: Uuid,
}

impl AccessGrant {
    pub fn from_request(request: &ActivationRequest, decider: &str, at: DateTime<Utc>) -> Self {
        Self {
            yoj_id: request.yoj_id.clone(),
            scheme_id: request.scheme_id.clone(),
            enabled: true,
            enabled_at: at,
            enabled_by: decider.to_string(),
            role: VENDOR_ROLE.to_string(),
            request_id: request.request_id,
        }
    }
}
