//! # Flow State Machine
//!
//! Maps (current screen, submitted data) to (validation outcome, next
//! screen, prefilled data) or a terminal action. The machine is pure over
//! a borrowed [`SessionRecord`] — it performs no I/O and knows nothing
//! about crypto, HTTP, or the downstream dispatcher. The orchestrator
//! feeds it decrypted requests under the per-session lock and deals with
//! the consequences.
//!
//! ## Transition rules
//!
//! - `INIT` puts the session on the first screen, always, regardless of
//!   any `screen` field in the request.
//! - `data_exchange` validates against the session's current screen. A
//!   failure re-prompts on the same screen with an `error_message`; a
//!   success merges the validated fields and advances. Advancing past the
//!   last screen is the terminal transition — the machine reports
//!   [`StepOutcome::Complete`] and the orchestrator takes it from there.
//! - `BACK` moves one screen toward the start without discarding anything
//!   already collected; on the first screen it stays put.
//! - `ping` never reaches this module — the orchestrator answers it before
//!   touching any session state.
//!
//! Anything else is a [`TransitionError`]: a malformed or misbehaving
//! client, answered with a terminal error screen and logged as a protocol
//! anomaly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{EMERGENCY_TOKEN_PREFIX, FLOW_API_VERSION, MEMBER_ID_PREFIX};
use crate::screens::Screen;
use crate::session::SessionRecord;

/// A transition that no defined (action, screen) combination matches.
/// Permanent faults — the client is broken, not unlucky.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The action string is not part of the protocol.
    #[error("unknown action \"{0}\"")]
    UnknownAction(String),

    /// `data_exchange` arrived without a `screen` field.
    #[error("data_exchange without a screen")]
    MissingScreen,

    /// The named screen is not part of this flow.
    #[error("unknown screen \"{0}\"")]
    UnknownScreen(String),

    /// The submitted screen does not match where the session actually is.
    #[error("screen mismatch: session is on {expected}, request says {got}")]
    ScreenMismatch {
        expected: &'static str,
        got: String,
    },

    /// The session already reached a terminal state.
    #[error("session already completed")]
    TerminalSession,
}

/// The decrypted request payload.
#[derive(Debug, Deserialize)]
pub struct FlowRequest {
    /// Data-API version. Echoed back; absent means [`FLOW_API_VERSION`].
    #[serde(default)]
    pub version: Option<String>,
    /// One of `ping`, `INIT`, `data_exchange`, `BACK`.
    #[serde(default)]
    pub action: String,
    /// The screen this submission belongs to. Absent for INIT and ping.
    #[serde(default)]
    pub screen: Option<String>,
    /// The fields submitted from that screen.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// The flow correlation token, echoed with every request.
    #[serde(default)]
    pub flow_token: Option<String>,
}

impl FlowRequest {
    /// Parses the decrypted plaintext. A parse failure here is a client
    /// fault reported in-band — the envelope already authenticated.
    pub fn parse(plaintext: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(plaintext)
    }

    /// The version to echo in the response.
    pub fn version_or_default(&self) -> &str {
        self.version.as_deref().unwrap_or(FLOW_API_VERSION)
    }
}

/// Protocol actions. Parsed manually so an unknown string becomes a
/// [`TransitionError`] rather than a serde failure of the whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ping,
    Init,
    DataExchange,
    Back,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Action> {
        match raw {
            "ping" => Some(Action::Ping),
            "INIT" => Some(Action::Init),
            "data_exchange" => Some(Action::DataExchange),
            "BACK" => Some(Action::Back),
            _ => None,
        }
    }
}

/// The plaintext response payload, pre-encryption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResponse {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen: Option<String>,
    pub data: Map<String, Value>,
}

impl FlowResponse {
    /// The health-check echo. Carries no screen and touches no session.
    pub fn ping(version: &str) -> Self {
        let mut data = Map::new();
        data.insert("status".into(), Value::String("active".into()));
        Self {
            version: version.to_string(),
            action: Some("ping".into()),
            screen: None,
            data,
        }
    }

    /// A screen to render next, with its prefilled data.
    pub fn screen(version: &str, screen: Screen, data: Map<String, Value>) -> Self {
        Self {
            version: version.to_string(),
            action: None,
            screen: Some(screen.name().to_string()),
            data,
        }
    }

    /// The terminal error screen. Ends the conversation.
    pub fn error(version: &str, message: &str) -> Self {
        let mut data = Map::new();
        data.insert("error_message".into(), Value::String(message.to_string()));
        Self {
            version: version.to_string(),
            action: None,
            screen: Some("error".into()),
            data,
        }
    }

    /// The terminal SUCCESS screen, shaped the way the provider closes a
    /// flow: an extension message carrying the token and the incident id.
    pub fn success(version: &str, flow_token: &str, incident_id: &str) -> Self {
        let mut data = Map::new();
        data.insert(
            "extension_message_response".into(),
            serde_json::json!({
                "params": {
                    "flow_token": flow_token,
                    "incident_id": incident_id,
                }
            }),
        );
        Self {
            version: version.to_string(),
            action: None,
            screen: Some("SUCCESS".into()),
            data,
        }
    }

    /// Serializes for encryption. Field order is fixed by the struct, so
    /// identical responses serialize to identical bytes — which is what
    /// makes replayed requests byte-identical on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("response serialization cannot fail")
    }
}

/// What one state-machine step decided.
#[derive(Debug)]
pub enum StepOutcome {
    /// Send this response; the session continues (or was already terminal).
    Respond(FlowResponse),
    /// The final screen validated. The orchestrator must now hand the
    /// collected fields downstream exactly once and answer with SUCCESS.
    Complete {
        /// Everything collected across the whole session.
        fields: Map<String, Value>,
    },
}

/// Advances `record` by one request.
///
/// Must be called with the session's per-key lock held. Touches the
/// record's activity timestamp for every request it handles.
pub fn step(
    record: &mut SessionRecord,
    request: &FlowRequest,
) -> Result<StepOutcome, TransitionError> {
    let version = request.version_or_default().to_string();
    let action = Action::parse(&request.action)
        .ok_or_else(|| TransitionError::UnknownAction(request.action.clone()))?;
    record.touch();

    match action {
        // Defensive: the orchestrator answers pings before session lookup,
        // but a ping that does arrive here is still just an echo.
        Action::Ping => Ok(StepOutcome::Respond(FlowResponse::ping(&version))),

        Action::Init => Ok(StepOutcome::Respond(initialize(record, &version, request))),

        Action::Back => {
            if !record.initialized {
                return Ok(StepOutcome::Respond(initialize(record, &version, request)));
            }
            if record.terminal {
                return Err(TransitionError::TerminalSession);
            }
            // From the first screen, BACK stays on the first screen.
            let target = record.current_screen.prev().unwrap_or(record.current_screen);
            record.current_screen = target;
            Ok(StepOutcome::Respond(FlowResponse::screen(
                &version,
                target,
                target.prefill(&record.collected),
            )))
        }

        Action::DataExchange => {
            if !record.initialized {
                // Fresh or TTL-recycled session: the client thinks it is
                // mid-flow but we have nothing. Restart rather than error.
                return Ok(StepOutcome::Respond(initialize(record, &version, request)));
            }
            if record.terminal {
                return Err(TransitionError::TerminalSession);
            }

            let name = request
                .screen
                .as_deref()
                .ok_or(TransitionError::MissingScreen)?;
            let screen = Screen::from_name(name)
                .ok_or_else(|| TransitionError::UnknownScreen(name.to_string()))?;
            if screen != record.current_screen {
                return Err(TransitionError::ScreenMismatch {
                    expected: record.current_screen.name(),
                    got: name.to_string(),
                });
            }

            match screen.validate(&request.data) {
                Err(invalid) => {
                    // Re-prompt on the same screen; nothing already
                    // collected moves or changes.
                    let mut data = screen.prefill(&record.collected);
                    data.insert("error_message".into(), Value::String(invalid.message));
                    Ok(StepOutcome::Respond(FlowResponse::screen(
                        &version, screen, data,
                    )))
                }
                Ok(validated) => {
                    for (key, value) in validated {
                        record.collected.insert(key, value);
                    }
                    match screen.next() {
                        Some(next) => {
                            record.current_screen = next;
                            Ok(StepOutcome::Respond(FlowResponse::screen(
                                &version,
                                next,
                                next.prefill(&record.collected),
                            )))
                        }
                        None => Ok(StepOutcome::Complete {
                            fields: record.collected.clone(),
                        }),
                    }
                }
            }
        }
    }
}

/// Puts the session on the first screen.
///
/// A terminal session is fully reset (the client reopened the form after
/// finishing); a mid-flow session keeps its collected fields so reopening
/// loses no answers. The member id embedded in the flow token, when it
/// parses, is collected and prefilled for the first screen.
fn initialize(record: &mut SessionRecord, version: &str, request: &FlowRequest) -> FlowResponse {
    if record.terminal {
        record.reset();
        record.touch();
    }
    record.initialized = true;
    record.current_screen = Screen::first();

    if let Some(member_id) = request.flow_token.as_deref().and_then(extract_member_id) {
        record
            .collected
            .insert("member_id".into(), Value::String(member_id.to_string()));
    }

    let mut data = Screen::first().prefill(&record.collected);
    if let Some(member_id) = record.collected.get("member_id") {
        data.insert("member_id".into(), member_id.clone());
    }
    FlowResponse::screen(version, Screen::first(), data)
}

/// Pulls the member id out of a flow token.
///
/// Tokens minted from a tag scan look like `EMERGENCY:LT-2025-A7X9K3`;
/// some callers pass the bare `LT-…` id. Anything else is an opaque token
/// with no member attached — not an error.
pub fn extract_member_id(token: &str) -> Option<&str> {
    if let Some(rest) = token.strip_prefix(EMERGENCY_TOKEN_PREFIX) {
        (!rest.is_empty()).then_some(rest)
    } else if token.starts_with(MEMBER_ID_PREFIX) {
        Some(token)
    } else {
        None
    }
}
