// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters and last-error reporting for a writer.
//!
//! Only the active writer thread (or the calling thread in synchronous mode)
//! updates a [`WriterStatistics`]; any thread may read it. Every field is
//! updated independently, so a reader may observe a counter from one batch
//! next to the last error of another. Observers that need a consistent-enough
//! view take a [`StatisticsSnapshot`].

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::writer::WriterState;

/// The most recent failure reported by the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub message: String,
    /// The error and its `source()` chain, outermost first.
    pub detail: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Point-in-time copy of all statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub messages_sent: u64,
    pub messages_sent_last_batch: u64,
    pub messages_requeued_last_batch: u64,
    pub messages_discarded: u64,
    pub oversize_messages: u64,
    pub last_error: Option<LastError>,
    /// `None` until a writer has been created.
    pub writer_state: Option<WriterState>,
}

#[derive(Debug, Default)]
pub struct WriterStatistics {
    messages_sent: AtomicU64,
    messages_sent_last_batch: AtomicU64,
    messages_requeued_last_batch: AtomicU64,
    messages_discarded: AtomicU64,
    oversize_messages: AtomicU64,
    last_error: Mutex<Option<LastError>>,
    writer_state: Mutex<Option<WriterState>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

fn as_u64(count: usize) -> u64 {
    u64::try_from(count).unwrap_or(u64::MAX)
}

impl WriterStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one send attempt.
    pub fn record_batch(&self, sent: usize, requeued: usize) {
        self.messages_sent.fetch_add(as_u64(sent), Ordering::Relaxed);
        self.messages_sent_last_batch
            .store(as_u64(sent), Ordering::Relaxed);
        self.messages_requeued_last_batch
            .store(as_u64(requeued), Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: usize) {
        if count > 0 {
            self.messages_discarded
                .fetch_add(as_u64(count), Ordering::Relaxed);
        }
    }

    /// Counts a message that exceeded the destination's size limit, whether
    /// it was truncated or dropped.
    pub fn record_oversize(&self) {
        self.oversize_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Replaces the last error with `message`, optionally keeping the
    /// causing error's chain.
    pub fn record_error(&self, message: impl Into<String>, error: Option<&(dyn Error + 'static)>) {
        let mut detail = Vec::new();
        let mut current = error;
        while let Some(e) = current {
            detail.push(e.to_string());
            current = e.source();
        }

        let last_error = LastError {
            message: message.into(),
            detail,
            timestamp: now_millis(),
        };
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(last_error);
    }

    pub fn record_state(&self, state: WriterState) {
        *self
            .writer_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    #[must_use]
    pub fn writer_state(&self) -> Option<WriterState> {
        *self
            .writer_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_sent_last_batch(&self) -> u64 {
        self.messages_sent_last_batch.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_requeued_last_batch(&self) -> u64 {
        self.messages_requeued_last_batch.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_discarded(&self) -> u64 {
        self.messages_discarded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn oversize_messages(&self) -> u64 {
        self.oversize_messages.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<LastError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn last_error_message(&self) -> Option<String> {
        self.last_error().map(|e| e.message)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            messages_sent: self.messages_sent(),
            messages_sent_last_batch: self.messages_sent_last_batch(),
            messages_requeued_last_batch: self.messages_requeued_last_batch(),
            messages_discarded: self.messages_discarded(),
            oversize_messages: self.oversize_messages(),
            last_error: self.last_error(),
            writer_state: self.writer_state(),
        }
    }
}
