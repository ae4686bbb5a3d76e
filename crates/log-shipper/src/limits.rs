// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service limits for the supported destination families.
//!
//! Each remote service enforces its own rules on how large a single record
//! may be and how many records (and bytes) a single request may carry.
//! [`ServiceLimits`] is the [`SizePolicy`] most drivers hand to their writer,
//! so the batch builder never produces a request the service would reject.
//!
//! # Presets
//!
//! | Destination      | Batch bytes | Batch count | Per-record overhead | Max record |
//! |------------------|-------------|-------------|---------------------|------------|
//! | Log stream       | 1 MiB       | 10,000      | 26 bytes            | 256 KiB    |
//! | Stream ingestion | 5 MiB       | 500         | partition key       | 1 MiB      |
//! | Notification     | 256 KiB     | 1           | none                | 256 KiB    |

use crate::driver::SizePolicy;
use crate::message::LogMessage;

/// Maximum request size accepted by the log-stream service.
pub const LOG_STREAM_MAX_BATCH_BYTES: usize = 1_024 * 1_024;

/// Maximum number of events per log-stream request.
pub const LOG_STREAM_MAX_BATCH_COUNT: usize = 10_000;

/// Bytes the log-stream service adds to every event when sizing a request.
pub const LOG_STREAM_MESSAGE_OVERHEAD: usize = 26;

/// Maximum size of a single log-stream event, overhead included.
pub const LOG_STREAM_MAX_MESSAGE_BYTES: usize = 256 * 1_024;

pub const STREAM_INGESTION_MAX_BATCH_BYTES: usize = 5 * 1_024 * 1_024;
pub const STREAM_INGESTION_MAX_BATCH_COUNT: usize = 500;

/// Maximum size of a single stream-ingestion record, partition key included.
pub const STREAM_INGESTION_MAX_RECORD_BYTES: usize = 1_024 * 1_024;

/// Notifications are published one at a time.
pub const NOTIFICATION_MAX_BATCH_COUNT: usize = 1;
pub const NOTIFICATION_MAX_MESSAGE_BYTES: usize = 256 * 1_024;

/// Size and count rules for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLimits {
    /// Maximum sum of effective sizes in one request.
    pub max_batch_bytes: usize,
    /// Maximum number of records in one request.
    pub max_batch_count: usize,
    /// Bytes added to each record's encoded size by the service.
    pub per_message_overhead: usize,
    /// Maximum effective size of a single record.
    pub max_message_bytes: usize,
}

impl ServiceLimits {
    /// Limits of the log-stream service.
    #[must_use]
    pub const fn log_stream() -> Self {
        ServiceLimits {
            max_batch_bytes: LOG_STREAM_MAX_BATCH_BYTES,
            max_batch_count: LOG_STREAM_MAX_BATCH_COUNT,
            per_message_overhead: LOG_STREAM_MESSAGE_OVERHEAD,
            max_message_bytes: LOG_STREAM_MAX_MESSAGE_BYTES,
        }
    }

    /// Limits of the stream-ingestion service.
    ///
    /// The partition key travels with every record and counts against both
    /// the record and the request limits.
    #[must_use]
    pub const fn stream_ingestion(partition_key_len: usize) -> Self {
        ServiceLimits {
            max_batch_bytes: STREAM_INGESTION_MAX_BATCH_BYTES,
            max_batch_count: STREAM_INGESTION_MAX_BATCH_COUNT,
            per_message_overhead: partition_key_len,
            max_message_bytes: STREAM_INGESTION_MAX_RECORD_BYTES,
        }
    }

    /// Limits of the notification service.
    #[must_use]
    pub const fn notification() -> Self {
        ServiceLimits {
            max_batch_bytes: NOTIFICATION_MAX_MESSAGE_BYTES,
            max_batch_count: NOTIFICATION_MAX_BATCH_COUNT,
            per_message_overhead: 0,
            max_message_bytes: NOTIFICATION_MAX_MESSAGE_BYTES,
        }
    }

    /// Whether a request of `batch_bytes` effective bytes and `batch_count`
    /// records is acceptable.
    #[must_use]
    pub fn within_limits(&self, batch_bytes: usize, batch_count: usize) -> bool {
        batch_bytes <= self.max_batch_bytes && batch_count <= self.max_batch_count
    }

    /// Largest encoded size a message may have once the overhead is added.
    #[must_use]
    pub fn max_encoded_size(&self) -> usize {
        self.max_message_bytes.saturating_sub(self.per_message_overhead)
    }
}

impl SizePolicy for ServiceLimits {
    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size() + self.per_message_overhead
    }

    fn within_service_limits(&self, batch_bytes: usize, batch_count: usize) -> bool {
        self.within_limits(batch_bytes, batch_count)
    }

    fn max_message_size(&self) -> usize {
        self.max_message_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_stream_effective_size_adds_overhead() {
        let limits = ServiceLimits::log_stream();
        let message = LogMessage::new(0, "hello");

        assert_eq!(limits.effective_size(&message), 5 + 26);
    }

    #[test]
    fn test_log_stream_batch_limits() {
        let limits = ServiceLimits::log_stream();

        assert!(limits.within_limits(LOG_STREAM_MAX_BATCH_BYTES, 1));
        assert!(!limits.within_limits(LOG_STREAM_MAX_BATCH_BYTES + 1, 1));
        assert!(limits.within_limits(100, LOG_STREAM_MAX_BATCH_COUNT));
        assert!(!limits.within_limits(100, LOG_STREAM_MAX_BATCH_COUNT + 1));
    }

    #[test]
    fn test_stream_ingestion_counts_partition_key() {
        let limits = ServiceLimits::stream_ingestion(16);
        let message = LogMessage::new(0, "x".repeat(STREAM_INGESTION_MAX_RECORD_BYTES - 16));

        assert!(!limits.is_message_too_large(&message));
        let message = LogMessage::new(0, "x".repeat(STREAM_INGESTION_MAX_RECORD_BYTES - 15));
        assert!(limits.is_message_too_large(&message));
        assert_eq!(limits.max_encoded_size(), STREAM_INGESTION_MAX_RECORD_BYTES - 16);
    }

    #[test]
    fn test_notification_is_one_per_batch() {
        let limits = ServiceLimits::notification();

        assert!(limits.within_limits(10, 1));
        assert!(!limits.within_limits(20, 2));
    }

    #[test]
    fn test_max_encoded_size_never_underflows() {
        let limits = ServiceLimits {
            max_batch_bytes: 10,
            max_batch_count: 1,
            per_message_overhead: 50,
            max_message_bytes: 10,
        };
        assert_eq!(limits.max_encoded_size(), 0);
    }
}
