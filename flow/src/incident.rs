//! # Downstream Incident Dispatch
//!
//! The boundary between this core and the rest of the emergency pipeline.
//! When the final screen validates, the orchestrator hands the fully
//! collected field set to an [`IncidentSink`] exactly once — creation of
//! the incident record, notification fan-out, and ambulance dispatch all
//! live behind that trait, outside this crate.
//!
//! The sink is injected so tests can count calls and force failures. A
//! sink failure (or timeout) is a *recoverable* outcome: the session stays
//! on the confirmation screen and the bystander can resubmit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Everything the downstream pipeline needs to open an incident.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentReport {
    /// The flow correlation token, for tying follow-up messages back to
    /// the originating conversation.
    pub flow_token: String,
    /// The scanned member, when the token carried one.
    pub member_id: Option<String>,
    /// When the bystander confirmed the submission.
    pub activated_at: DateTime<Utc>,
    /// The full set of fields collected across the form.
    pub fields: Map<String, Value>,
}

impl IncidentReport {
    /// Builds a report from a completed session's collected fields.
    pub fn from_fields(flow_token: &str, fields: Map<String, Value>) -> Self {
        let member_id = fields
            .get("member_id")
            .and_then(Value::as_str)
            .map(String::from);
        Self {
            flow_token: flow_token.to_string(),
            member_id,
            activated_at: Utc::now(),
            fields,
        }
    }
}

/// Proof the downstream pipeline accepted the incident.
#[derive(Debug, Clone)]
pub struct IncidentReceipt {
    /// The incident identifier shown to the bystander and threaded through
    /// follow-up messages, e.g. `INC-20260807143012-4F2A`.
    pub incident_id: String,
}

/// Ways the downstream call can fail. Both are recoverable from the
/// session's point of view.
#[derive(Debug, Error)]
pub enum IncidentError {
    /// The call did not complete within the configured bound.
    #[error("incident dispatch timed out after {0:?}")]
    Timeout(Duration),

    /// The downstream collaborator rejected or failed the creation.
    #[error("incident dispatch failed: {0}")]
    Failed(String),
}

/// The downstream incident-creation collaborator.
#[async_trait]
pub trait IncidentSink: Send + Sync {
    /// Creates the incident and kicks off the emergency workflow.
    ///
    /// Called at most once per completed session in the absence of
    /// failures; the caller's idempotency layer absorbs duplicate
    /// deliveries of the final request.
    async fn create_incident(&self, report: &IncidentReport) -> Result<IncidentReceipt, IncidentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_lifts_member_id_out_of_fields() {
        let mut fields = Map::new();
        fields.insert("member_id".into(), json!("LT-2025-A7X9K3"));
        fields.insert("emergency_type".into(), json!("collapse"));

        let report = IncidentReport::from_fields("EMERGENCY:LT-2025-A7X9K3", fields);
        assert_eq!(report.member_id.as_deref(), Some("LT-2025-A7X9K3"));
        assert_eq!(report.fields["emergency_type"], "collapse");
    }

    #[test]
    fn report_without_member_is_fine() {
        let report = IncidentReport::from_fields("opaque", Map::new());
        assert!(report.member_id.is_none());
    }
}
