// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Assembly of outgoing batches from the message queue.
//!
//! # Batching Rules
//!
//! A batch is built in two phases:
//! 1. **First message**: wait until a message arrives, the caller's deadline
//!    passes, or the queue is interrupted. No message means an empty batch,
//!    which the writer never sends.
//! 2. **Accumulation**: keep pulling messages until `first + batch_delay`
//!    (a wall-clock deadline, so slow dequeues do not stretch the window) or
//!    until the next message would break the destination's service limits. That
//!    message goes back to the head of the queue and opens the next batch.
//!
//! The first message always joins its batch. Messages that can never fit
//! are rejected when they are appended, long before they reach this point.

use std::time::{Duration, Instant};

use crate::driver::SizePolicy;
use crate::message::LogMessage;
use crate::queue::MessageQueue;

/// Builds one batch from `queue`.
///
/// `wait_until` bounds the wait for the first message; `None` waits until a
/// message arrives or the queue is interrupted.
pub fn build_batch(
    queue: &MessageQueue,
    policy: &dyn SizePolicy,
    batch_delay: Duration,
    wait_until: Option<Instant>,
) -> Vec<LogMessage> {
    let Some(first) = queue.dequeue_until(wait_until) else {
        return Vec::new();
    };

    // An unrepresentable deadline degrades to "until interrupted"
    let batch_deadline = Instant::now().checked_add(batch_delay);

    let mut batch = Vec::new();
    let mut batch_bytes = 0;
    let mut next = Some(first);

    while let Some(message) = next {
        let size = policy.effective_size(&message);
        if !batch.is_empty()
            && !policy.within_service_limits(batch_bytes + size, batch.len() + 1)
        {
            queue.requeue(vec![message]);
            break;
        }

        batch_bytes += size;
        batch.push(message);
        next = queue.dequeue_until(batch_deadline);
    }

    batch
}
