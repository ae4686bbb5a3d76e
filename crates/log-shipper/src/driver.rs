// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The destination plug-in contract.
//!
//! A destination is described by two traits:
//! - [`SizePolicy`]: how the destination measures messages and which batches
//!   it accepts. Shared between application threads (oversize checks at
//!   append time) and the writer (batch building), so it must be `Sync`.
//! - [`Driver`]: the stateful half that owns the client, provisions the
//!   remote resource and sends batches. Only ever touched by one thread at a
//!   time.
//!
//! [`ServiceLimits`](crate::limits::ServiceLimits) implements `SizePolicy`
//! for the common case of fixed per-service limits.

use std::sync::Arc;

use crate::error::{DriverError, SendError};
use crate::message::LogMessage;

pub trait SizePolicy: Send + Sync {
    /// Size of `message` as the destination accounts for it.
    fn effective_size(&self, message: &LogMessage) -> usize;

    /// Whether a batch with the given accumulated effective size and message
    /// count can be sent in one request.
    fn within_service_limits(&self, batch_bytes: usize, batch_count: usize) -> bool;

    /// Largest effective size a single message may have.
    fn max_message_size(&self) -> usize;

    fn is_message_too_large(&self, message: &LogMessage) -> bool {
        self.effective_size(message) > self.max_message_size()
    }

    /// Returns `message` shortened so that its effective size fits
    /// [`max_message_size`](Self::max_message_size).
    fn truncate_to_fit(&self, message: &LogMessage) -> LogMessage {
        let overhead = self.effective_size(message).saturating_sub(message.size());
        message.truncate(self.max_message_size().saturating_sub(overhead))
    }
}

/// Destination-specific half of a writer.
///
/// Call order: [`create_client`](Driver::create_client) and
/// [`ensure_destination_available`](Driver::ensure_destination_available)
/// once, then any number of [`send_batch`](Driver::send_batch) calls, then
/// [`shutdown`](Driver::shutdown) exactly once. If initialization fails,
/// `send_batch` is never called but `shutdown` still is.
pub trait Driver: Send {
    /// Size accounting for this destination. Called once, when the writer is
    /// constructed.
    fn size_policy(&self) -> Arc<dyn SizePolicy>;

    /// Provisions the client or connection used by later calls.
    fn create_client(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Makes sure the remote resource exists, creating it if needed.
    fn ensure_destination_available(&mut self) -> Result<(), DriverError>;

    /// Sends a batch.
    ///
    /// Returns the messages that must be retried, in their original relative
    /// order: empty on full success, a subset on partial rejection. An `Err`
    /// means nothing was accepted and the whole batch is retried.
    fn send_batch(&mut self, batch: &[LogMessage]) -> Result<Vec<LogMessage>, SendError>;

    /// Releases the client or connection.
    fn shutdown(&mut self) {}
}
