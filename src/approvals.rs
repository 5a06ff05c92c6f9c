//! Approval workflow records
//!
//! Every approval-request transition (draft created, approved, denied) is
//! recorded in the audit ledger as
//! `{request_id, tenant_id, actor_id, action, resource, decision, reason}`.
//! Tenant and actor identifiers are recorded as given.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AppendReceipt, AuditLedger};
use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    DraftCreated,
    Approved,
    Denied,
}

impl ApprovalAction {
    /// Decision recorded alongside the action
    pub fn decision(&self) -> &'static str {
        match self {
            Self::DraftCreated => "pending",
            Self::Approved => "approve",
            Self::Denied => "deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub request_id: Uuid,
    pub tenant_id: Value,
    pub actor_id: Value,
    pub action: ApprovalAction,
    pub resource: String,
    pub decision: String,
    pub reason: Option<String>,
}

impl ApprovalEvent {
    pub fn new(
        request_id: Uuid,
        tenant_id: impl Into<Value>,
        actor_id: impl Into<Value>,
        action: ApprovalAction,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            action,
            resource: resource.into(),
            decision: action.decision().to_string(),
            reason: None,
        }
    }

    /// Open a new approval request
    pub fn draft(
        tenant_id: impl Into<Value>,
        actor_id: impl Into<Value>,
        resource: impl Into<String>,
    ) -> Self {
        Self::new(
            Uuid::new_v4(),
            tenant_id,
            actor_id,
            ApprovalAction::DraftCreated,
            resource,
        )
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Event for a decision on this request by another actor
    pub fn decide(&self, actor_id: impl Into<Value>, action: ApprovalAction) -> Result<Self> {
        if action == ApprovalAction::DraftCreated {
            return Err(LedgerError::InvalidPayload(
                "a decision must approve or deny".to_string(),
            ));
        }
        Ok(Self::new(
            self.request_id,
            self.tenant_id.clone(),
            actor_id,
            action,
            self.resource.clone(),
        ))
    }
}

/// Append one approval transition to the ledger
pub async fn record_approval(ledger: &AuditLedger, event: &ApprovalEvent) -> Result<AppendReceipt> {
    let receipt = ledger.append_serializable(event).await?;
    info!(
        "Recorded approval {:?} for request {} on {} at sequence {}",
        event.action, event.request_id, event.resource, receipt.sequence
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{EntryFilter, MemoryStore, SystemClock};
    use crate::config::LedgerConfig;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_event_payload_shape() {
        let event = ApprovalEvent::draft(12, "user-7", "business/42").with_reason("new listing");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["tenant_id"], json!(12));
        assert_eq!(value["actor_id"], json!("user-7"));
        assert_eq!(value["action"], json!("draft_created"));
        assert_eq!(value["decision"], json!("pending"));
        assert_eq!(value["reason"], json!("new listing"));
        assert_eq!(value["resource"], json!("business/42"));
    }

    #[test]
    fn test_decision_must_approve_or_deny() {
        let draft = ApprovalEvent::draft(1, 2, "r1");
        assert!(draft.decide(3, ApprovalAction::DraftCreated).is_err());

        let denied = draft.decide(3, ApprovalAction::Denied).unwrap();
        assert_eq!(denied.request_id, draft.request_id);
        assert_eq!(denied.decision, "deny");
        assert_eq!(denied.actor_id, json!(3));
    }

    #[tokio::test]
    async fn test_record_approval_lifecycle() {
        let ledger = AuditLedger::open(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            &LedgerConfig::default(),
        )
        .await
        .unwrap();

        let draft = ApprovalEvent::draft(5, "clerk", "membership/19");
        let approved = draft
            .decide("council", ApprovalAction::Approved)
            .unwrap()
            .with_reason("documents verified");

        let first = record_approval(&ledger, &draft).await.unwrap();
        let second = record_approval(&ledger, &approved).await.unwrap();
        assert_eq!((first.sequence, second.sequence), (0, 1));

        let request = draft.request_id.to_string();
        let history = ledger
            .list(&EntryFilter::new().field("request_id", request.as_str()))
            .await
            .unwrap();
        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.entries[1].payload.get("decision"), Some(&json!("approve")));
        assert!(ledger.verify_all().await.unwrap().ok);
    }
}
