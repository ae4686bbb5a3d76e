// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors surfaced to the code that owns a writer.
///
/// The writer's run loop never returns these; they come from construction,
/// argument validation and lifecycle calls only.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Message of {size} bytes exceeds the destination limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Failed to start writer thread: {0}")]
    ThreadStart(#[from] std::io::Error),

    #[error("Writer did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Writer is not available: {0}")]
    Unavailable(String),
}

/// Errors raised by a destination driver while preparing the destination.
///
/// Any of these moves the writer into its failed-initialization state.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Failed to create client: {0}")]
    ClientCreation(String),

    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid destination configuration: {0}")]
    InvalidConfig(String),

    #[error("Initialization timed out after {0:?}")]
    Timeout(Duration),
}

/// How a driver classifies a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum FailureKind {
    /// The service asked us to slow down.
    #[display("throttled")]
    Throttled,
    /// Network blips, timeouts, 5xx responses.
    #[display("transient")]
    Transient,
    /// Benign races with other writers on the same resource, e.g. a stale
    /// sequence token.
    #[display("race")]
    Race,
    /// The destination rejected the request itself.
    #[display("rejected")]
    Rejected,
    /// Anything the driver did not anticipate.
    #[display("unexpected")]
    Unexpected,
}

impl FailureKind {
    /// Whether this failure is an expected condition that resolves by itself.
    ///
    /// Non-retryable failures are still requeued; the distinction only
    /// controls how loudly the writer reports them.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Throttled | FailureKind::Transient | FailureKind::Race
        )
    }
}

/// A whole-batch send failure reported by a driver.
#[derive(Debug, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct SendError {
    pub kind: FailureKind,
    pub message: String,
}

impl SendError {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        SendError {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Throttled, message)
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unexpected, message)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
