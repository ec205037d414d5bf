//! End-to-end integration tests for the LifeTap flow core.
//!
//! These tests exercise the full request lifecycle the way the server
//! binary drives it: wire envelope in, codec decode, crypto open, session
//! lookup under the per-key lock, state-machine step, crypto seal, codec
//! encode. They prove the layers compose — the unit tests in each module
//! already cover the layers alone.
//!
//! Each test owns its session store and (where needed) its RSA keypair.
//! No shared state, no test ordering dependencies.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use lifeline_flow::codec;
use lifeline_flow::config::{AES_KEY_LENGTH, IV_LENGTH};
use lifeline_flow::crypto::keys::wrap_key;
use lifeline_flow::crypto::{self, EndpointKey, SymmetricKey};
use lifeline_flow::machine::{self, FlowRequest, StepOutcome};
use lifeline_flow::screens::Screen;
use lifeline_flow::session::{Fingerprint, SessionStore, StoreConfig};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const TOKEN: &str = "EMERGENCY:LT-2025-A7X9K3";

fn payload(action: &str, screen: Option<&str>, data: Value) -> Vec<u8> {
    let mut body = json!({
        "version": "3.0",
        "action": action,
        "data": data,
        "flow_token": TOKEN,
    });
    if let Some(s) = screen {
        body["screen"] = json!(s);
    }
    serde_json::to_vec(&body).unwrap()
}

/// Drives one decrypted request through session + machine, mimicking the
/// orchestrator's locking and replay discipline.
async fn drive(store: &Arc<SessionStore>, plaintext: &[u8]) -> Value {
    let request = FlowRequest::parse(plaintext).unwrap();
    let token = request.flow_token.clone().expect("test requests carry a token");
    let slot = store.get_or_create(&token).unwrap();
    let mut record = slot.lock().await;

    if store.is_expired(&record) {
        record.reset();
    }

    let fingerprint = Fingerprint::of(plaintext);
    if let Some(cached) = record.replay(&fingerprint) {
        return serde_json::from_slice(&cached).unwrap();
    }

    let response = match machine::step(&mut record, &request).unwrap() {
        StepOutcome::Respond(response) => response,
        StepOutcome::Complete { .. } => {
            // Stand-in for the downstream sink: always succeeds.
            record.terminal = true;
            machine::FlowResponse::success(request.version_or_default(), &token, "INC-TEST-1")
        }
    };
    let bytes = response.to_bytes();
    record.remember(fingerprint, bytes.clone());
    serde_json::from_slice(&bytes).unwrap()
}

fn test_store() -> Arc<SessionStore> {
    Arc::new(SessionStore::new(StoreConfig::default()))
}

// ---------------------------------------------------------------------------
// Full Flow Walks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_walks_every_screen_to_success() {
    let store = test_store();

    let r = drive(&store, &payload("INIT", None, json!({}))).await;
    assert_eq!(r["screen"], "EMERGENCY_TYPE");
    assert_eq!(r["data"]["member_id"], "LT-2025-A7X9K3");

    let r = drive(
        &store,
        &payload(
            "data_exchange",
            Some("EMERGENCY_TYPE"),
            json!({"emergency_type": "road_accident", "victim_count": "2"}),
        ),
    )
    .await;
    assert_eq!(r["screen"], "PATIENT_STATUS");

    let r = drive(
        &store,
        &payload(
            "data_exchange",
            Some("PATIENT_STATUS"),
            json!({"conscious": "no", "breathing": "struggling"}),
        ),
    )
    .await;
    assert_eq!(r["screen"], "LOCATION");

    let r = drive(
        &store,
        &payload(
            "data_exchange",
            Some("LOCATION"),
            json!({"latitude": -17.82, "longitude": 31.05, "address": "Samora Machel Ave"}),
        ),
    )
    .await;
    assert_eq!(r["screen"], "CONFIRM");

    let r = drive(
        &store,
        &payload("data_exchange", Some("CONFIRM"), json!({"confirm": "yes"})),
    )
    .await;
    assert_eq!(r["screen"], "SUCCESS");
    assert_eq!(
        r["data"]["extension_message_response"]["params"]["flow_token"],
        TOKEN
    );
}

#[tokio::test]
async fn validation_failure_reprompts_then_recovers() {
    let store = test_store();
    drive(&store, &payload("INIT", None, json!({}))).await;

    // Missing victim_count: stay on the screen with an error_message.
    let r = drive(
        &store,
        &payload(
            "data_exchange",
            Some("EMERGENCY_TYPE"),
            json!({"emergency_type": "burn"}),
        ),
    )
    .await;
    assert_eq!(r["screen"], "EMERGENCY_TYPE");
    assert!(r["data"]["error_message"].as_str().unwrap().contains("victim_count"));

    // Corrected submission advances.
    let r = drive(
        &store,
        &payload(
            "data_exchange",
            Some("EMERGENCY_TYPE"),
            json!({"emergency_type": "burn", "victim_count": "1"}),
        ),
    )
    .await;
    assert_eq!(r["screen"], "PATIENT_STATUS");
}

#[tokio::test]
async fn back_reenters_a_screen_with_prior_answers() {
    let store = test_store();
    drive(&store, &payload("INIT", None, json!({}))).await;
    drive(
        &store,
        &payload(
            "data_exchange",
            Some("EMERGENCY_TYPE"),
            json!({"emergency_type": "collapse", "victim_count": "1"}),
        ),
    )
    .await;

    let r = drive(&store, &payload("BACK", Some("PATIENT_STATUS"), json!({}))).await;
    assert_eq!(r["screen"], "EMERGENCY_TYPE");
    assert_eq!(r["data"]["emergency_type"], "collapse");
    assert_eq!(r["data"]["victim_count"], "1");
}

#[tokio::test]
async fn duplicate_final_request_is_absorbed_by_the_replay_cache() {
    let store = test_store();
    drive(&store, &payload("INIT", None, json!({}))).await;
    drive(
        &store,
        &payload(
            "data_exchange",
            Some("EMERGENCY_TYPE"),
            json!({"emergency_type": "injury", "victim_count": "1"}),
        ),
    )
    .await;
    drive(
        &store,
        &payload(
            "data_exchange",
            Some("PATIENT_STATUS"),
            json!({"conscious": "yes", "breathing": "yes"}),
        ),
    )
    .await;
    drive(
        &store,
        &payload(
            "data_exchange",
            Some("LOCATION"),
            json!({"latitude": 0.5, "longitude": 0.5}),
        ),
    )
    .await;

    let last = payload("data_exchange", Some("CONFIRM"), json!({"confirm": "yes"}));
    let first = drive(&store, &last).await;
    let second = drive(&store, &last).await;
    assert_eq!(first, second);
    assert_eq!(second["screen"], "SUCCESS");
}

#[tokio::test]
async fn expired_session_restarts_instead_of_erroring() {
    let store = Arc::new(SessionStore::new(StoreConfig {
        ttl: std::time::Duration::from_millis(10),
        terminal_ttl: std::time::Duration::from_millis(5),
        capacity: 16,
    }));
    drive(&store, &payload("INIT", None, json!({}))).await;
    drive(
        &store,
        &payload(
            "data_exchange",
            Some("EMERGENCY_TYPE"),
            json!({"emergency_type": "other", "victim_count": "1"}),
        ),
    )
    .await;

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    // The client thinks it is on PATIENT_STATUS; the session is gone.
    // INIT semantics, not an error.
    let r = drive(
        &store,
        &payload(
            "data_exchange",
            Some("PATIENT_STATUS"),
            json!({"conscious": "yes", "breathing": "yes"}),
        ),
    )
    .await;
    assert_eq!(r["screen"], "EMERGENCY_TYPE");
}

// ---------------------------------------------------------------------------
// Crypto + Codec Composition
// ---------------------------------------------------------------------------

#[test]
fn wire_roundtrip_through_codec_and_transport() {
    let endpoint = EndpointKey::generate().unwrap();
    let key = SymmetricKey::new([0x3C; AES_KEY_LENGTH]);
    let iv: [u8; IV_LENGTH] = *b"sixteen-byte-iv!";
    let plaintext = payload("ping", None, json!({}));

    // Client side: encrypt under the request IV, wrap the key, frame it.
    let body = serde_json::to_vec(&json!({
        "encrypted_flow_data":
            codec::encode(&crypto::transport::encrypt_with_iv(&plaintext, &key, &iv).unwrap()),
        "encrypted_aes_key":
            codec::encode(&wrap_key(&endpoint.public_key(), &key).unwrap()),
        "initial_vector": codec::encode(&iv),
    }))
    .unwrap();

    // Server side: decode, open, answer, seal.
    let envelope = codec::decode(&body).unwrap();
    let (opened, symmetric) = crypto::open(&envelope, &endpoint).unwrap();
    assert_eq!(opened, plaintext);

    let response = machine::FlowResponse::ping("3.0").to_bytes();
    let sealed = crypto::seal(&response, &symmetric, &envelope.iv).unwrap();
    let wire = codec::encode(&sealed);

    // Client side again: base64-decode, decrypt under the flipped IV.
    let raw = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.decode(wire).unwrap()
    };
    let recovered =
        crypto::transport::decrypt_with_iv(&raw, &key, &crypto::flip_iv(&iv)).unwrap();
    let parsed: Value = serde_json::from_slice(&recovered).unwrap();
    assert_eq!(parsed["action"], "ping");
    assert_eq!(parsed["data"]["status"], "active");
}

#[test]
fn identical_plaintext_and_envelope_produce_identical_ciphertext() {
    // The replay path re-encrypts the cached plaintext under the replayed
    // request's key and IV; GCM determinism makes the wire bytes identical.
    let key = SymmetricKey::new([0x11; AES_KEY_LENGTH]);
    let iv = [0x24u8; IV_LENGTH];
    let response = machine::FlowResponse::success("3.0", TOKEN, "INC-X").to_bytes();

    let a = crypto::seal(&response, &key, &iv).unwrap();
    let b = crypto::seal(&response, &key, &iv).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn screen_enum_covers_every_wire_name_in_the_walk() {
    // Guards against a screen being added to the enum but forgotten in the
    // ordering (or vice versa): the walk must visit every screen exactly once.
    let store = test_store();
    let mut seen = vec![];

    let mut r = drive(&store, &payload("INIT", None, json!({}))).await;
    loop {
        let name = r["screen"].as_str().unwrap().to_string();
        if name == "SUCCESS" {
            break;
        }
        seen.push(name.clone());
        let screen = Screen::from_name(&name).expect("unknown screen on the wire");
        let data: Map<String, Value> = match screen {
            Screen::EmergencyType => {
                json!({"emergency_type": "other", "victim_count": "1"})
            }
            Screen::PatientStatus => json!({"conscious": "unsure", "breathing": "unsure"}),
            Screen::Location => json!({"latitude": 1.0, "longitude": 1.0}),
            Screen::Confirm => json!({"confirm": "yes"}),
        }
        .as_object()
        .cloned()
        .unwrap();

        r = drive(
            &store,
            &payload("data_exchange", Some(&name), Value::Object(data)),
        )
        .await;
    }
    assert_eq!(
        seen,
        vec!["EMERGENCY_TYPE", "PATIENT_STATUS", "LOCATION", "CONFIRM"]
    );
}
