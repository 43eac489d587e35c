//! Error types for reconciliation passes.
//!
//! Library crates never exit the process. Every failure surfaces as a
//! `ReconcileError`; the binary decides what is fatal. Command errors
//! carry the tool's stderr so callers can absorb the "already exists"
//! and "not found" cases that keep create/delete idempotent.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Stderr fragments cloud CLIs and kubectl print for a missing resource.
const NOT_FOUND_MARKERS: &[&str] = &["was not found", "not found", "NotFound", "ResourceNotFound"];

/// Stderr fragment printed when creating a resource that already exists.
const ALREADY_EXISTS_MARKER: &str = "already exists";

/// Errors that can occur while reconciling full-node endpoints.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("no available node ports in [{min}, {max}]")]
    NodePortsExhausted { min: i32, max: i32 },

    #[error("service {service} has mismatched node ports: {ports:?}")]
    NodePortMismatch { service: String, ports: Vec<i32> },

    #[error("static IP {name} still attached after {attempts} attempts")]
    DetachTimeout { name: String, attempts: u32 },

    #[error("load balancer for {name} not provisioned after {}s", waited.as_secs())]
    LoadBalancerTimeout { name: String, waited: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid config file: {0}")]
    ConfigSyntax(#[from] toml::de::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// Create a command error from the rendered command line and its stderr.
    pub fn command(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a parse error with the given message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// True if this is a command error reporting an existing resource.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Command { stderr, .. } => stderr.contains(ALREADY_EXISTS_MARKER),
            _ => false,
        }
    }

    /// True if this is a command error reporting a missing resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Command { stderr, .. } => NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)),
            _ => false,
        }
    }
}
