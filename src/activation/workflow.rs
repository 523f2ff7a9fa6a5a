//! Activation Workflow
//!
//! Vendors submit access requests against published schemes; approvers
//! decide each request once. Approval writes the grant before the decided
//! request, so a failure in between leaves the request pending and a retry
//! lands on the same single grant.

use super::models::{AccessGrant, ActivationRequest, Decision};
use super::store::{grant_lock_key, request_lock_key, GrantStore, RequestStore};
use crate::audit::{AuditEvent, AuditSink};
use crate::error::AppError;
use crate::scheme::{MetadataStore, SchemeStatus};
use crate::storage::KeyLocks;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct ActivationWorkflow {
    requests: RequestStore,
    grants: GrantStore,
    schemes: Arc<MetadataStore>,
    locks: Arc<KeyLocks>,
    audit: Arc<dyn AuditSink>,
}

impl ActivationWorkflow {
    pub fn new(
        requests: RequestStore,
        grants: GrantStore,
        schemes: Arc<MetadataStore>,
        locks: Arc<KeyLocks>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            requests,
            grants,
            schemes,
            locks,
            audit,
        }
    }

    /// Vendor asks for access to a published scheme
    pub async fn submit(
        &self,
        yoj_id: &str,
        scheme_id: &str,
        submitter: &str,
        note: Option<String>,
    ) -> Result<ActivationRequest, AppError> {
        let yoj_id = yoj_id.trim();
        if yoj_id.is_empty() {
            return Err(AppError::BadRequest("yojId is required".to_string()));
        }

        let scheme = self.schemes.load(scheme_id).await?;
        if scheme.status != SchemeStatus::Published {
            return Err(AppError::Conflict(format!(
                "scheme {} is {} and not open for activation",
                scheme_id, scheme.status
            )));
        }

        let guard = self.locks.acquire(&grant_lock_key(yoj_id, scheme_id)).await?;
        let already_pending = self
            .requests
            .list()?
            .into_iter()
            .any(|r| r.is_pending() && r.yoj_id == yoj_id && r.scheme_id == scheme_id);
        if already_pending {
            return Err(AppError::Conflict(format!(
                "{} already has a pending request for {}",
                yoj_id, scheme_id
            )));
        }

        let request = ActivationRequest::new(
            yoj_id.to_string(),
            scheme_id.to_string(),
            submitter.to_string(),
            note,
        );
        self.requests.write_locked(&guard, &request)?;
        drop(guard);

        info!(
            "Activation requested: {} -> {} ({}) by {}",
            yoj_id, scheme_id, request.request_id, submitter
        );
        self.audit.log(
            AuditEvent::ActivationRequested,
            scheme_id,
            submitter,
            json!({ "requestId": request.request_id, "yojId": yoj_id }),
        );
        Ok(request)
    }

    pub fn get(&self, request_id: Uuid) -> Result<ActivationRequest, AppError> {
        self.requests.load(request_id)
    }

    /// Pending requests, oldest first
    pub fn list_pending(&self) -> Result<Vec<ActivationRequest>, AppError> {
        let mut requests = self.requests.list()?;
        requests.retain(ActivationRequest::is_pending);
        Ok(requests)
    }

    pub fn list_for_vendor(&self, yoj_id: &str) -> Result<Vec<ActivationRequest>, AppError> {
        let mut requests = self.requests.list()?;
        requests.retain(|r| r.yoj_id == yoj_id);
        Ok(requests)
    }

    /// Decide a pending request. Approval enables the vendor's grant
    /// regardless of the scheme's current status.
    pub async fn decide(
        &self,
        request_id: Uuid,
        decision: Decision,
        decider: &str,
        note: Option<String>,
    ) -> Result<ActivationRequest, AppError> {
        let guard = self.locks.acquire(&request_lock_key(request_id)).await?;
        let request = self.requests.load(request_id)?;
        if !request.is_pending() {
            return Err(AppError::AlreadyDecided(request_id.to_string()));
        }

        let decided = request.decided(decision, decider, note);
        let grant = match decision {
            Decision::Approved => {
                let grant_guard = self
                    .locks
                    .acquire(&grant_lock_key(&request.yoj_id, &request.scheme_id))
                    .await?;
                let at = decided.decided_at.unwrap_or_else(chrono::Utc::now);
                let grant = AccessGrant::from_request(&decided, decider, at);
                self.grants.write_locked(&grant_guard, &grant)?;
                Some(grant)
            }
            Decision::Rejected => None,
        };
        self.requests.write_locked(&guard, &decided)?;
        drop(guard);

        let event = match decision {
            Decision::Approved => AuditEvent::ActivationApproved,
            Decision::Rejected => AuditEvent::ActivationRejected,
        };
        info!(
            "Activation {} for {} -> {} by {}",
            decided.status,
            decided.yoj_id,
            decided.scheme_id,
            decider
        );
        self.audit.log(
            event,
            &decided.scheme_id,
            decider,
            json!({
                "requestId": request_id,
                "yojId": decided.yoj_id,
                "grantEnabled": grant.is_some(),
            }),
        );
        Ok(decided)
    }

    pub fn grant(&self, yoj_id: &str, scheme_id: &str) -> Result<AccessGrant, AppError> {
        self.grants
            .find(yoj_id, scheme_id)?
            .ok_or_else(|| AppError::NotFound(format!("No grant for {} on {}", yoj_id, scheme_id)))
    }

    pub fn grants_for_vendor(&self, yoj_id: &str) -> Result<Vec<AccessGrant>, AppError> {
        self.grants.list_for_vendor(yoj_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::models::RequestStatus;
    use crate::audit::JsonlAuditLog;
    use crate::scheme::{SchemeCategory, SchemeLayout, SchemePatch};
    use crate::storage::LockSettings;
    use pretty_assertions::assert_eq;

    struct Harness {
        _dir: tempfile::TempDir,
        workflow: ActivationWorkflow,
        schemes: Arc<MetadataStore>,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let locks = Arc::new(KeyLocks::new(dir.path().join("locks"), LockSettings::default()));
        let schemes = Arc::new(MetadataStore::new(SchemeLayout::new(dir.path()), locks.clone()));
        let workflow = ActivationWorkflow::new(
            RequestStore::new(dir.path()),
            GrantStore::new(dir.path()),
            schemes.clone(),
            locks,
            Arc::new(JsonlAuditLog::new(dir.path().join("audit.log"))),
        );

        schemes
            .create("SCM-TEST", "Test", "", SchemeCategory::Registration, "op")
            .await
            .unwrap();
        Harness {
            _dir: dir,
            workflow,
            schemes,
        }
    }

    async fn publish(h: &Harness) {
        for status in [SchemeStatus::Imported, SchemeStatus::Compiled, SchemeStatus::Published] {
            h.schemes
                .update("SCM-TEST", SchemePatch::attempt(Some(status)), "op")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_submit_requires_published_scheme() {
        let h = harness().await;

        let unpublished = h.workflow.submit("Y123", "SCM-TEST", "Y123", None).await;
        assert!(matches!(unpublished, Err(AppError::Conflict(_))));

        let missing = h.workflow.submit("Y123", "SCM-NONE", "Y123", None).await;
        assert!(matches!(missing, Err(AppError::SchemeNotFound(_))));

        publish(&h).await;
        let request = h
            .workflow
            .submit("Y123", "SCM-TEST", "vendor-portal", Some("please".to_string()))
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.requested_by, "vendor-portal");

        let duplicate = h.workflow.submit("Y123", "SCM-TEST", "Y123", None).await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_approval_enables_grant() {
        let h = harness().await;
        publish(&h).await;
        let request = h.workflow.submit("Y123", "SCM-TEST", "Y123", None).await.unwrap();

        let decided = h
            .workflow
            .decide(request.request_id, Decision::Approved, "approver", None)
            .await
            .unwrap();

        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(decided.decided_by.as_deref(), Some("approver"));
        let grant = h.workflow.grant("Y123", "SCM-TEST").unwrap();
        assert!(grant.enabled);
        assert_eq!(grant.role, "vendor");
        assert_eq!(grant.request_id, request.request_id);
        assert!(h.workflow.list_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_decision_is_rejected() {
        let h = harness().await;
        publish(&h).await;
        let request = h.workflow.submit("Y123", "SCM-TEST", "Y123", None).await.unwrap();
        h.workflow
            .decide(request.request_id, Decision::Approved, "approver", None)
            .await
            .unwrap();
        let grant_before = h.workflow.grant("Y123", "SCM-TEST").unwrap();

        let again = h
            .workflow
            .decide(request.request_id, Decision::Rejected, "other", None)
            .await;

        assert!(matches!(again, Err(AppError::AlreadyDecided(_))));
        assert_eq!(h.workflow.grant("Y123", "SCM-TEST").unwrap(), grant_before);
        assert_eq!(h.workflow.get(request.request_id).unwrap().status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_repeated_approvals_keep_one_grant() {
        let h = harness().await;
        publish(&h).await;

        for decider in ["a1", "a2"] {
            let request = h.workflow.submit("Y123", "SCM-TEST", "Y123", None).await.unwrap();
            h.workflow
                .decide(request.request_id, Decision::Approved, decider, None)
                .await
                .unwrap();
        }

        let grants = h.workflow.grants_for_vendor("Y123").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].enabled_by, "a2");
        assert_eq!(h.workflow.list_for_vendor("Y123").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lookalike_vendors_do_not_share_grants() {
        let h = harness().await;
        publish(&h).await;

        for yoj_id in ["Y_1", "Y.1"] {
            let request = h.workflow.submit(yoj_id, "SCM-TEST", yoj_id, None).await.unwrap();
            h.workflow
                .decide(request.request_id, Decision::Approved, "approver", None)
                .await
                .unwrap();
        }

        assert_eq!(h.workflow.grant("Y_1", "SCM-TEST").unwrap().yoj_id, "Y_1");
        assert_eq!(h.workflow.grant("Y.1", "SCM-TEST").unwrap().yoj_id, "Y.1");
        assert_eq!(h.workflow.grants_for_vendor("Y_1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_decisions_apply_once() {
        let h = harness().await;
        publish(&h).await;
        let request = h.workflow.submit("Y123", "SCM-TEST", "Y123", None).await.unwrap();

        let (first, second) = tokio::join!(
            h.workflow.decide(request.request_id, Decision::Approved, "a1", None),
            h.workflow.decide(request.request_id, Decision::Approved, "a2", None),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AppError::AlreadyDecided(_))))
                .count(),
            1
        );

        let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
        let grants = h.workflow.grants_for_vendor("Y123").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(Some(grants[0].enabled_by.as_str()), winner.decided_by.as_deref());
        assert_eq!(h.workflow.get(request.request_id).unwrap(), *winner);
    }

    #[tokio::test]
    async fn test_rejection_writes_no_grant() {
        let h = harness().await;
        publish(&h).await;
        let request = h.workflow.submit("Y123", "SCM-TEST", "Y123", None).await.unwrap();

        let decided = h
            .workflow
            .decide(request.request_id, Decision::Rejected, "approver", Some("incomplete".to_string()))
            .await
            .unwrap();

        assert_eq!(decided.status, RequestStatus::Rejected);
        assert_eq!(decided.decision_note.as_deref(), Some("incomplete"));
        assert!(matches!(h.workflow.grant("Y123", "SCM-TEST"), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pending_listed_oldest_first() {
        let h = harness().await;
        publish(&h).await;
        let first = h.workflow.submit("Y1", "SCM-TEST", "Y1", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = h.workflow.submit("Y2", "SCM-TEST", "Y2", None).await.unwrap();

        let pending: Vec<Uuid> = h.workflow.list_pending().unwrap().iter().map(|r| r.request_id).collect();
        assert_eq!(pending, vec![first.request_id, second.request_id]);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let h = harness().await;
        let result = h.workflow.decide(Uuid::new_v4(), Decision::Approved, "a", None).await;
        assert!(matches!(result, Err(AppError::RequestNotFound(_))));
    }
}
