//! # Protocol Configuration & Constants
//!
//! Every fixed parameter of the flow wire contract lives here. Most of these
//! are dictated by the messaging provider's endpoint specification — they are
//! not tuning knobs. Changing one means you are speaking a different protocol,
//! and the client on the other end will not be amused.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Wire Contract
// ---------------------------------------------------------------------------

/// Flow data-API version echoed in responses when the request carries none.
pub const FLOW_API_VERSION: &str = "3.0";

/// AES key length in bytes. The provider wraps a 128-bit key — always.
/// A recovered key of any other length means the unwrap went wrong.
pub const AES_KEY_LENGTH: usize = 16;

/// Initialization vector length in bytes. The provider sends 16 raw bytes,
/// not the 12-byte nonce GCM folklore would have you expect.
pub const IV_LENGTH: usize = 16;

/// GCM authentication tag length in bytes, appended to the ciphertext.
pub const TAG_LENGTH: usize = 16;

/// RSA modulus size for endpoint keypairs generated by `keygen`.
pub const RSA_KEY_BITS: usize = 2048;

// ---------------------------------------------------------------------------
// Flow Tokens
// ---------------------------------------------------------------------------

/// Prefix carried by flow tokens minted from an emergency tag scan,
/// e.g. `EMERGENCY:LT-2025-A7X9K3`.
pub const EMERGENCY_TOKEN_PREFIX: &str = "EMERGENCY:";

/// Prefix of bare member identifiers, e.g. `LT-2025-A7X9K3`.
pub const MEMBER_ID_PREFIX: &str = "LT-";

// ---------------------------------------------------------------------------
// Session Store
// ---------------------------------------------------------------------------

/// Default idle TTL for a live session. Chosen to exceed plausible human
/// think-time on an emergency intake form while still bounding memory.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// TTL for sessions that have reached a terminal state. Kept shorter than
/// [`SESSION_TTL`] — the record only has to outlive duplicate delivery of
/// the final request.
pub const TERMINAL_SESSION_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on concurrently live sessions. New sessions beyond this are
/// refused in-band rather than letting the map grow without limit.
pub const MAX_LIVE_SESSIONS: usize = 10_000;

/// How often the out-of-band sweep looks for expired sessions.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Downstream Dispatch
// ---------------------------------------------------------------------------

/// Default bound on the terminal incident-creation call. This is the only
/// network I/O in the request path; a hang here must not hold the form open.
pub const DOWNSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Validation Limits
// ---------------------------------------------------------------------------

/// Maximum accepted length of the free-text scene description.
pub const SCENE_DESCRIPTION_MAX_LEN: usize = 500;
