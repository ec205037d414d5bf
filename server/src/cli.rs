//! # CLI Interface
//!
//! Defines the command-line argument structure for `lifeline-server` using
//! `clap` derive. Three subcommands: `run`, `keygen`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// LifeTap encrypted flow endpoint.
///
/// Serves the messaging provider's encrypted data-exchange protocol for the
/// emergency intake form: decrypts screen submissions, walks the intake
/// state machine, and dispatches confirmed incidents downstream.
#[derive(Parser, Debug)]
#[command(
    name = "lifeline-server",
    about = "LifeTap encrypted flow endpoint",
    version,
    propagate_version = true
)]
pub struct LifelineCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the server binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the endpoint server.
    Run(RunArgs),
    /// Generate a fresh RSA endpoint keypair — writes `private.pem` and
    /// `public.pem`; the public half is uploaded to the provider.
    Keygen(KeygenArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the RSA private key (PEM, PKCS#8 or PKCS#1).
    ///
    /// The process refuses to start without a readable, parseable key —
    /// serving traffic it cannot decrypt helps no one.
    #[arg(long, short = 'k', env = "LIFELINE_PRIVATE_KEY", default_value = "keys/private.pem")]
    pub private_key: PathBuf,

    /// Port for the flow endpoint and health probe.
    #[arg(long, env = "LIFELINE_PORT", default_value_t = 9280)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "LIFELINE_METRICS_PORT", default_value_t = 9281)]
    pub metrics_port: u16,

    /// Idle TTL for live form sessions, in seconds.
    #[arg(long, env = "LIFELINE_SESSION_TTL_SECS", default_value_t = 1800)]
    pub session_ttl_secs: u64,

    /// Maximum number of concurrently live sessions.
    #[arg(long, env = "LIFELINE_SESSION_CAPACITY", default_value_t = 10_000)]
    pub session_capacity: usize,

    /// Bound on the terminal incident-dispatch call, in milliseconds.
    #[arg(long, env = "LIFELINE_DOWNSTREAM_TIMEOUT_MS", default_value_t = 5_000)]
    pub downstream_timeout_ms: u64,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "LIFELINE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `keygen` subcommand.
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Directory to write `private.pem` and `public.pem` into.
    #[arg(long, short = 'o', default_value = "keys")]
    pub out_dir: PathBuf,

    /// Overwrite an existing keypair. Off by default — regenerating the
    /// key invalidates the public half the provider already holds.
    #[arg(long)]
    pub force: bool,
}
