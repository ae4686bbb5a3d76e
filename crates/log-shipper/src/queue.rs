// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, thread-safe, order-preserving buffer of pending log messages.
//!
//! The queue is the only structure shared between the application threads
//! that produce messages and the writer that consumes them:
//!
//! ```text
//!   app thread ─┐
//!   app thread ─┼─ enqueue ──> [ head ... tail ] ── dequeue ──> writer
//!   app thread ─┘                  ^
//!                                  └──────────── requeue (failed sends)
//! ```
//!
//! # Discard Policy
//!
//! When an enqueue pushes the depth past `discard_threshold` the configured
//! [`DiscardAction`] applies:
//! - **oldest**: messages are dropped from the head until the depth fits
//! - **newest**: the message being enqueued is refused
//! - **none**: nothing is dropped; the queue grows without bound
//!
//! Requeued messages were already admitted once and bypass the threshold, so
//! a retry can transiently leave the queue deeper than the threshold.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer};

use crate::message::LogMessage;

/// What to do when the queue exceeds its discard threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, derive_more::Display)]
pub enum DiscardAction {
    /// Never discard. The queue may grow until the process runs out of memory.
    #[display("none")]
    None,
    /// Drop the oldest queued messages.
    #[default]
    #[display("oldest")]
    Oldest,
    /// Refuse the message being enqueued.
    #[display("newest")]
    Newest,
}

/// Error returned when a discard action name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid discard action '{0}': expected one of none, oldest, newest")]
pub struct ParseDiscardActionError(String);

impl FromStr for DiscardAction {
    type Err = ParseDiscardActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(DiscardAction::None),
            "oldest" => Ok(DiscardAction::Oldest),
            "newest" => Ok(DiscardAction::Newest),
            _ => Err(ParseDiscardActionError(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for DiscardAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

struct QueueState {
    messages: VecDeque<LogMessage>,
    discard_threshold: usize,
    discard_action: DiscardAction,
    interrupted: bool,
}

/// Thread-safe FIFO of [`LogMessage`] with a configurable discard policy.
pub struct MessageQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl MessageQueue {
    #[must_use]
    pub fn new(discard_threshold: usize, discard_action: DiscardAction) -> Self {
        MessageQueue {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                discard_threshold,
                discard_action,
                interrupted: false,
            }),
            available: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave the deque half-updated, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a message to the tail and applies the discard policy.
    ///
    /// Returns the number of messages discarded by this call, which the
    /// caller reports through its statistics. With [`DiscardAction::Newest`]
    /// a return value of 1 means `message` itself was refused.
    pub fn enqueue(&self, message: LogMessage) -> usize {
        let mut state = self.lock();

        let discarded = match state.discard_action {
            DiscardAction::Newest if state.messages.len() >= state.discard_threshold => {
                return 1;
            }
            DiscardAction::Oldest => {
                state.messages.push_back(message);
                let mut dropped = 0;
                while state.messages.len() > state.discard_threshold {
                    state.messages.pop_front();
                    dropped += 1;
                }
                dropped
            }
            DiscardAction::Newest | DiscardAction::None => {
                state.messages.push_back(message);
                0
            }
        };

        let has_messages = !state.messages.is_empty();
        drop(state);
        if has_messages {
            self.available.notify_one();
        }
        discarded
    }

    /// Removes the head message, waiting up to `max_wait` for one to arrive.
    ///
    /// `None` waits until a message arrives or the queue is interrupted.
    /// Returns `None` on timeout or interrupt.
    pub fn dequeue(&self, max_wait: Option<Duration>) -> Option<LogMessage> {
        let deadline = max_wait.and_then(|wait| Instant::now().checked_add(wait));
        match (max_wait, deadline) {
            // wait too long to represent: treat as unbounded
            (Some(_), None) | (None, _) => self.dequeue_until(None),
            (Some(_), Some(deadline)) => self.dequeue_until(Some(deadline)),
        }
    }

    /// Removes the head message, waiting until `deadline` for one to arrive.
    ///
    /// A deadline in the past polls without blocking.
    pub fn dequeue_until(&self, deadline: Option<Instant>) -> Option<LogMessage> {
        let mut state = self.lock();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return Some(message);
            }
            if state.interrupted {
                state.interrupted = false;
                return None;
            }

            match deadline {
                None => {
                    state = self
                        .available
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }

    /// Reinserts messages at the head, preserving their relative order.
    ///
    /// The first element of `messages` becomes the new head. No discard
    /// accounting is performed.
    pub fn requeue(&self, messages: Vec<LogMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut state = self.lock();
        for message in messages.into_iter().rev() {
            state.messages.push_front(message);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Wakes a consumer blocked in [`dequeue`](Self::dequeue).
    ///
    /// If no consumer is waiting, the next dequeue that finds the queue empty
    /// returns `None` immediately instead of blocking.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.available.notify_all();
    }

    pub fn set_discard_threshold(&self, discard_threshold: usize) {
        self.lock().discard_threshold = discard_threshold;
    }

    pub fn set_discard_action(&self, discard_action: DiscardAction) {
        self.lock().discard_action = discard_action;
    }

    #[must_use]
    pub fn discard_threshold(&self) -> usize {
        self.lock().discard_threshold
    }

    #[must_use]
    pub fn discard_action(&self) -> DiscardAction {
        self.lock().discard_action
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    /// Copies the current contents, head first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<LogMessage> {
        self.lock().messages.iter().cloned().collect()
    }

    /// Removes and returns everything queued, head first.
    pub fn drain(&self) -> Vec<LogMessage> {
        self.lock().messages.drain(..).collect()
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MessageQueue")
            .field("len", &state.messages.len())
            .field("discard_threshold", &state.discard_threshold)
            .field("discard_action", &state.discard_action)
            .finish()
    }
}
