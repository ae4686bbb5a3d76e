// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of work shipped by a writer.
//!
//! A [`LogMessage`] is created by the framework adapter at append time and is
//! immutable afterwards. Ownership moves from the adapter into the
//! [`MessageQueue`](crate::queue::MessageQueue), then transiently into a batch,
//! and is either released after a successful send or handed back to the queue
//! for retry.
//!
//! # Ordering
//!
//! Messages are ordered solely by their logical `timestamp`. Two messages with
//! the same timestamp keep their insertion order, so any sort performed on a
//! batch must be stable (see [`sort_by_timestamp`]).

use std::time::{SystemTime, UNIX_EPOCH};

/// An immutable log message with its encoded form used for size accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Logical ordering key, milliseconds since the Unix epoch.
    timestamp: u64,
    /// The rendered message text. Its UTF-8 bytes are the encoded form.
    text: String,
}

impl LogMessage {
    #[must_use]
    pub fn new(timestamp: u64, text: impl Into<String>) -> Self {
        LogMessage {
            timestamp,
            text: text.into(),
        }
    }

    /// Creates a message stamped with the current wall-clock time.
    #[must_use]
    pub fn now(text: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self::new(timestamp, text)
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The encoded form of the message, used by drivers for size accounting.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Length of the encoded form in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// Returns a copy of this message whose encoded form is at most
    /// `max_bytes` long.
    ///
    /// Truncation never splits a multi-byte UTF-8 character, so the result may
    /// be slightly shorter than `max_bytes`. The timestamp is preserved.
    #[must_use]
    pub fn truncate(&self, max_bytes: usize) -> LogMessage {
        if self.text.len() <= max_bytes {
            return self.clone();
        }

        let mut end = max_bytes;
        while end > 0 && !self.text.is_char_boundary(end) {
            end -= 1;
        }

        LogMessage {
            timestamp: self.timestamp,
            text: self.text[..end].to_string(),
        }
    }
}

/// Sorts messages by timestamp, keeping insertion order for equal timestamps.
///
/// A helper for [`Driver`](crate::driver::Driver) implementations only: the
/// writer always hands batches over in queue order and never calls this.
/// Destinations such as log-stream services reject batches whose records are
/// out of chronological order, so their drivers sort a copy of the batch
/// before building a request.
pub fn sort_by_timestamp(messages: &mut [LogMessage]) {
    messages.sort_by_key(LogMessage::timestamp);
}
