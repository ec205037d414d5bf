//! # Flow Endpoint API
//!
//! Builds the axum router and sequences one encrypted exchange:
//!
//! codec decode → crypto open → session lookup / replay check →
//! state-machine step → (terminal) downstream dispatch → crypto seal →
//! codec encode.
//!
//! ## Endpoints
//!
//! | Method | Path      | Description                              |
//! |--------|-----------|------------------------------------------|
//! | POST   | `/flow`   | The provider's encrypted data exchange   |
//! | GET    | `/health` | Liveness probe                           |
//!
//! ## HTTP contract
//!
//! The status code is part of the provider's protocol, not ours to choose:
//!
//! - `200` + raw base64 body — every decrypted outcome, including in-band
//!   validation and business errors. The client cannot read an unencrypted
//!   error body, so errors it should see travel inside the envelope.
//! - `421` + empty body — key unwrap or payload authentication failed.
//!   Tells the client to discard its cached public key, re-fetch, retry.
//!   Never returned for anything but cryptographic failure.
//! - `400` + empty body — envelope malformed before any crypto attempt.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use lifeline_flow::codec;
use lifeline_flow::crypto::{self, EndpointKey};
use lifeline_flow::incident::{IncidentError, IncidentReceipt, IncidentReport, IncidentSink};
use lifeline_flow::machine::{self, Action, FlowRequest, FlowResponse, StepOutcome};
use lifeline_flow::session::{Fingerprint, SessionStore};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The server's reported version string.
    pub version: String,
    /// The RSA private key that unwraps per-request AES keys.
    pub endpoint_key: Arc<EndpointKey>,
    /// The session store — the only shared mutable state in the endpoint.
    pub sessions: Arc<SessionStore>,
    /// The downstream incident pipeline.
    pub sink: Arc<dyn IncidentSink>,
    /// Bound on the terminal dispatch call.
    pub downstream_timeout: Duration,
    /// Prometheus handles for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the axum [`Router`] with the flow endpoint, health probe, and
/// request tracing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/flow", post(flow_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the process is alive.
///
/// Unencrypted by design: this is for orchestrators and load balancers,
/// not for the messaging provider (which pings through `/flow`).
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lifeline-flow-endpoint",
        "version": state.version,
    }))
}

/// `POST /flow` — the provider's encrypted data exchange.
async fn flow_handler(State(state): State<AppState>, body: Bytes) -> Response {
    state.metrics.requests_total.inc();
    let _timer = state.metrics.request_duration_seconds.start_timer();

    // 1. Frame checks. Nothing cryptographic has happened yet, so a
    //    failure here is a plain 400.
    let envelope = match codec::decode(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            state.metrics.malformed_total.inc();
            tracing::warn!(error = %err, "malformed envelope");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // 2. Key unwrap + payload decrypt. Both failure modes collapse into
    //    421 so the client refreshes its cached public key. This status
    //    is reserved for cryptographic failure alone.
    let (plaintext, symmetric) = match crypto::open(&envelope, &state.endpoint_key) {
        Ok(opened) => opened,
        Err(err) => {
            state.metrics.decrypt_failures_total.inc();
            tracing::warn!(error = %err, "envelope decryption failed; signalling key refresh");
            return StatusCode::MISDIRECTED_REQUEST.into_response();
        }
    };

    // 3. Everything decrypted is answered in-band, over the same key.
    let response_plaintext = handle_decrypted(&state, &plaintext).await;

    // 4. Seal under the flipped request IV. The symmetric key dies (and
    //    zeroizes) with this scope.
    let sealed = match crypto::seal(&response_plaintext, &symmetric, &envelope.iv) {
        Ok(sealed) => sealed,
        Err(err) => {
            tracing::error!(error = %err, "response encryption failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        [(header::CONTENT_TYPE, "text/plain")],
        codec::encode(&sealed),
    )
        .into_response()
}

/// Routes one decrypted request and returns the plaintext response bytes.
async fn handle_decrypted(state: &AppState, plaintext: &[u8]) -> Vec<u8> {
    let request = match FlowRequest::parse(plaintext) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "flow payload is not valid JSON");
            return FlowResponse::error(
                lifeline_flow::config::FLOW_API_VERSION,
                "malformed flow payload",
            )
            .to_bytes();
        }
    };
    let version = request.version_or_default().to_string();

    // Health checks bypass the state machine and the session store
    // entirely — no lock, no record, no trace in the map.
    if Action::parse(&request.action) == Some(Action::Ping) {
        return FlowResponse::ping(&version).to_bytes();
    }

    let Some(token) = request.flow_token.clone() else {
        tracing::warn!("flow request without a flow_token");
        return FlowResponse::error(&version, "missing flow token").to_bytes();
    };

    let slot = match state.sessions.get_or_create(&token) {
        Ok(slot) => slot,
        Err(err) => {
            tracing::warn!(error = %err, "refusing new session");
            return FlowResponse::error(&version, "service is busy; please try again").to_bytes();
        }
    };

    // Per-session serialization point. A duplicate delivery racing the
    // original blocks here, then observes the replay cache below.
    let mut record = slot.lock().await;
    state.metrics.live_sessions.set(state.sessions.len() as i64);

    if state.sessions.is_expired(&record) {
        tracing::debug!(flow_token = %token, "session expired mid-flow; restarting");
        record.reset();
    }

    let fingerprint = Fingerprint::of(plaintext);
    if let Some(cached) = record.replay(&fingerprint) {
        state.metrics.replays_total.inc();
        tracing::debug!(flow_token = %token, request = %fingerprint, "duplicate delivery; serving cached response");
        return cached;
    }

    let (response, remember) = match machine::step(&mut record, &request) {
        Ok(StepOutcome::Respond(response)) => (response, true),

        Ok(StepOutcome::Complete { fields }) => {
            match dispatch_incident(state, &token, fields).await {
                Ok(receipt) => {
                    state.metrics.incidents_created_total.inc();
                    record.terminal = true;
                    tracing::info!(
                        flow_token = %token,
                        incident_id = %receipt.incident_id,
                        "intake complete, incident created"
                    );
                    (
                        FlowResponse::success(&version, &token, &receipt.incident_id),
                        true,
                    )
                }
                Err(err) => {
                    state.metrics.incidents_failed_total.inc();
                    tracing::error!(
                        flow_token = %token,
                        error = %err,
                        "incident dispatch failed; session left open for resubmission"
                    );
                    // Recoverable: the record stays on the confirmation
                    // screen and is deliberately NOT remembered, so a
                    // resubmission re-attempts the dispatch.
                    (
                        FlowResponse::error(
                            &version,
                            "We could not reach the dispatch service. Please submit again.",
                        ),
                        false,
                    )
                }
            }
        }

        Err(fault) => {
            state.metrics.transition_faults_total.inc();
            tracing::warn!(flow_token = %token, fault = %fault, "invalid transition");
            record.terminal = true;
            (
                FlowResponse::error(
                    &version,
                    "This form session can no longer continue. Please reopen the form.",
                ),
                true,
            )
        }
    };

    let bytes = response.to_bytes();
    if remember {
        record.remember(fingerprint, bytes.clone());
    }
    bytes
}

/// Hands a completed field set downstream, under the configured timeout.
async fn dispatch_incident(
    state: &AppState,
    flow_token: &str,
    fields: serde_json::Map<String, serde_json::Value>,
) -> Result<IncidentReceipt, IncidentError> {
    let report = IncidentReport::from_fields(flow_token, fields);
    match tokio::time::timeout(
        state.downstream_timeout,
        state.sink.create_incident(&report),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(IncidentError::Timeout(state.downstream_timeout)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
