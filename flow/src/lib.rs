// Copyright (c) 2026 LifeTap Health. MIT License.
// See LICENSE for details.

//! # LifeTap Flow — Core Library
//!
//! The encrypted data-exchange core behind LifeTap's emergency intake form.
//! A bystander scans a member's tag, the messaging provider opens a
//! multi-screen form, and every screen submission arrives here as an
//! encrypted envelope. This crate decides what the next screen is and says
//! so — encrypted, bit-exact to the provider's wire contract.
//!
//! ## Architecture
//!
//! The modules mirror the actual layers of the endpoint, leaf-first:
//!
//! - **codec** — base64/JSON framing of the wire envelope. Runs before any
//!   crypto; garbage stops here.
//! - **crypto** — RSA-OAEP key unwrap and AES-128-GCM open/seal with the
//!   provider's flipped-IV response rule.
//! - **session** — keyed, TTL-bounded accumulation of partial form data,
//!   with per-key locking and idempotent replay detection.
//! - **screens** — the static form definition: ordered screens, required
//!   fields, validators.
//! - **machine** — (screen, submission) → (outcome, next screen). Pure;
//!   no I/O.
//! - **incident** — the trait boundary to the downstream dispatch pipeline.
//! - **config** — the wire contract's fixed parameters and our defaults.
//!
//! The HTTP orchestrator that sequences these lives in the server binary,
//! not here — this crate never touches a socket.
//!
//! ## Design Philosophy
//!
//! 1. The wire contract is the provider's, not ours. Match it exactly.
//! 2. A failed decrypt never reaches business logic.
//! 3. Duplicate delivery is normal, not exceptional. Absorb it.
//! 4. Seconds matter. Nothing in the request path blocks except the one
//!    terminal downstream call, and that one is on a timer.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod incident;
pub mod machine;
pub mod screens;
pub mod session;
