// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The writer engine: moves messages from the queue to a destination.
//!
//! # Lifecycle
//!
//! ```text
//!   Created ──► Initializing ──┬──► Running ──► Draining ──► Stopped
//!                              │
//!                              └──► FailedInit
//! ```
//!
//! - **Initializing**: the driver builds its client and makes sure the remote
//!   resource exists. Failure (or exceeding the initialization timeout) is
//!   terminal: the queue's discard threshold drops to zero so the application
//!   can keep logging without unbounded memory growth. A driver that hangs is
//!   given up on by the next [`LogWriter::add_message`] or
//!   [`LogWriter::enforce_initialization_timeout`] once the timeout passes.
//! - **Running**: the writer loops on [`build_batch`] and
//!   [`Driver::send_batch`]. Failed messages go back to the head of the
//!   queue, so retries preserve order.
//! - **Draining**: [`LogWriter::stop`] sets a shutdown deadline of
//!   `now + batch_delay`. The loop keeps going until the deadline has passed
//!   *and* the queue is empty, so one last batch always goes out.
//! - **Stopped**: the driver has been shut down. This happens exactly once,
//!   whether or not initialization succeeded.
//!
//! In synchronous mode there is no writer thread: the caller initializes the
//! writer, every [`LogWriter::add_message`] sends on the calling thread, and
//! [`LogWriter::stop`] drains on the calling thread. A driver panic never
//! reaches the caller there; the writer records it and retires itself (see
//! [`LogWriter::has_panicked`]).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::batch::build_batch;
use crate::config::WriterConfig;
use crate::driver::{Driver, SizePolicy};
use crate::error::{DriverError, WriterError};
use crate::lifecycle::panic_message;
use crate::message::LogMessage;
use crate::queue::{DiscardAction, MessageQueue};
use crate::stats::WriterStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriterState {
    #[display("created")]
    Created,
    #[display("initializing")]
    Initializing,
    #[display("running")]
    Running,
    #[display("draining")]
    Draining,
    #[display("stopped")]
    Stopped,
    #[display("failed-init")]
    FailedInit,
}

impl WriterState {
    /// Whether initialization has finished, successfully or not.
    #[must_use]
    pub fn is_initialized(self) -> bool {
        !matches!(self, WriterState::Created | WriterState::Initializing)
    }

    /// Whether the writer may still send messages.
    #[must_use]
    pub fn is_accepting_sends(self) -> bool {
        matches!(self, WriterState::Running | WriterState::Draining)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: WriterState,
    initialization_started: Option<Instant>,
    shutdown_deadline: Option<Instant>,
    driver_released: bool,
    panicked: bool,
    finished: bool,
}

pub struct LogWriter {
    name: String,
    config: WriterConfig,
    batch_delay: Mutex<Duration>,
    queue: MessageQueue,
    size_policy: Arc<dyn SizePolicy>,
    driver: Mutex<Box<dyn Driver>>,
    stats: Arc<WriterStatistics>,
    lifecycle: Mutex<Lifecycle>,
    lifecycle_changed: Condvar,
    consecutive_failures: Mutex<u32>,
}

impl LogWriter {
    /// Creates a writer in the [`WriterState::Created`] state.
    ///
    /// Nothing touches the destination until [`initialize`](Self::initialize)
    /// or [`run`](Self::run) is called.
    pub fn new(
        name: impl Into<String>,
        config: WriterConfig,
        driver: Box<dyn Driver>,
        stats: Arc<WriterStatistics>,
    ) -> Result<Self, WriterError> {
        config.validate()?;
        stats.record_state(WriterState::Created);

        Ok(LogWriter {
            name: name.into(),
            batch_delay: Mutex::new(config.effective_batch_delay()),
            queue: MessageQueue::new(config.discard_threshold, config.discard_action),
            size_policy: driver.size_policy(),
            driver: Mutex::new(driver),
            stats,
            lifecycle: Mutex::new(Lifecycle {
                state: WriterState::Created,
                initialization_started: None,
                shutdown_deadline: None,
                driver_released: false,
                panicked: false,
                finished: false,
            }),
            lifecycle_changed: Condvar::new(),
            consecutive_failures: Mutex::new(0),
            config,
        })
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, lifecycle: &mut Lifecycle, state: WriterState) {
        lifecycle.state = state;
        self.stats.record_state(state);
    }

    fn lock_driver(&self) -> MutexGuard<'_, Box<dyn Driver>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> WriterState {
        self.lock_lifecycle().state
    }

    #[must_use]
    pub fn statistics(&self) -> &Arc<WriterStatistics> {
        &self.stats
    }

    #[must_use]
    pub fn size_policy(&self) -> &Arc<dyn SizePolicy> {
        &self.size_policy
    }

    /// Messages currently waiting to be sent.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queues a message for delivery.
    ///
    /// Never blocks on the destination, except in synchronous mode where the
    /// message is sent before this returns. Messages the destination can never
    /// accept are refused with [`WriterError::MessageTooLarge`]; callers apply
    /// their truncate-or-drop policy before getting here.
    pub fn add_message(&self, message: LogMessage) -> Result<(), WriterError> {
        if self.size_policy.is_message_too_large(&message) {
            return Err(WriterError::MessageTooLarge {
                size: self.size_policy.effective_size(&message),
                limit: self.size_policy.max_message_size(),
            });
        }

        self.enforce_initialization_timeout();
        let discarded = self.queue.enqueue(message);
        self.stats.record_discarded(discarded);

        if self.config.synchronous_mode && self.state().is_accepting_sends() {
            self.process_batch(Some(Instant::now()));
        }
        Ok(())
    }

    /// Prepares the destination.
    ///
    /// Returns `true` if the writer is ready to send. Only the first call does
    /// any work; later calls report the outcome of the first.
    pub fn initialize(&self) -> bool {
        {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.state != WriterState::Created {
                return lifecycle.state.is_accepting_sends();
            }
            self.transition(&mut lifecycle, WriterState::Initializing);
            lifecycle.initialization_started = Some(Instant::now());
        }
        info!("{}: initializing writer", self.name);

        let timeout = self.config.initialization_timeout;
        let started = Instant::now();
        let result = {
            let mut driver = self.lock_driver();
            match driver.create_client() {
                Ok(()) => driver.ensure_destination_available(),
                Err(e) => Err(e),
            }
        };
        let result = result.and_then(|()| {
            if started.elapsed() > timeout {
                Err(DriverError::Timeout(timeout))
            } else {
                Ok(())
            }
        });

        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state != WriterState::Initializing {
            // already given up on by enforce_initialization_timeout
            return false;
        }
        let ready = match result {
            Ok(()) => {
                let state = if lifecycle.shutdown_deadline.is_some() {
                    WriterState::Draining
                } else {
                    WriterState::Running
                };
                self.transition(&mut lifecycle, state);
                debug!("{}: writer initialized in {:?}", self.name, started.elapsed());
                true
            }
            Err(e) => {
                self.fail_initialization(&mut lifecycle, &e);
                false
            }
        };
        drop(lifecycle);
        self.lifecycle_changed.notify_all();
        ready
    }

    fn fail_initialization(&self, lifecycle: &mut Lifecycle, e: &DriverError) {
        error!("{}: failed to initialize writer: {}", self.name, e);
        self.stats
            .record_error(format!("failed to initialize: {e}"), Some(e));
        self.queue.set_discard_threshold(0);
        self.queue.set_discard_action(DiscardAction::Oldest);
        self.transition(lifecycle, WriterState::FailedInit);
    }

    /// Fails a writer whose initialization has been running for longer than
    /// the initialization timeout.
    ///
    /// The driver call itself cannot be interrupted; when it eventually
    /// returns, its result is ignored and the writer shuts down.
    pub fn enforce_initialization_timeout(&self) {
        let timeout = self.config.initialization_timeout;
        let mut lifecycle = self.lock_lifecycle();
        let expired = lifecycle.state == WriterState::Initializing
            && lifecycle
                .initialization_started
                .is_some_and(|started| started.elapsed() > timeout);
        if !expired {
            return;
        }
        self.fail_initialization(&mut lifecycle, &DriverError::Timeout(timeout));
        drop(lifecycle);
        self.lifecycle_changed.notify_all();
    }

    /// Body of the writer thread.
    ///
    /// Initializes the destination, sends batches until stopped and drained,
    /// then shuts the driver down. Only returns by unwinding if a driver
    /// panics.
    pub fn run(&self) {
        if self.initialize() {
            loop {
                let wait_until = self.lock_lifecycle().shutdown_deadline;
                self.process_batch(wait_until);
                if !self.should_continue() {
                    break;
                }
            }
        }
        self.cleanup();
    }

    fn should_continue(&self) -> bool {
        match self.lock_lifecycle().shutdown_deadline {
            None => true,
            Some(deadline) => Instant::now() < deadline || !self.queue.is_empty(),
        }
    }

    /// Builds and sends one batch.
    ///
    /// `wait_until` bounds the wait for the first message of the batch.
    pub fn process_batch(&self, wait_until: Option<Instant>) {
        // Held across build and send so concurrent synchronous callers cannot
        // reorder batches.
        let mut driver = self.lock_driver();
        {
            let lifecycle = self.lock_lifecycle();
            if lifecycle.driver_released || lifecycle.panicked {
                return;
            }
        }

        let batch = build_batch(
            &self.queue,
            self.size_policy.as_ref(),
            self.batch_delay(),
            wait_until,
        );
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        debug!("{}: sending batch of {} messages", self.name, count);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| driver.send_batch(&batch)));
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                // Keep the batch for whoever picks up this queue.
                self.stats.record_batch(0, count);
                self.queue.requeue(batch);
                drop(driver);
                if !self.config.synchronous_mode {
                    panic::resume_unwind(payload);
                }
                self.contain_panic(payload.as_ref());
                return;
            }
        };

        let failed = match outcome {
            Ok(failed) => {
                if !failed.is_empty() {
                    warn!(
                        "{}: destination rejected {} of {} messages, requeueing",
                        self.name,
                        failed.len(),
                        count
                    );
                    self.stats.record_error(
                        format!("{} of {} messages rejected", failed.len(), count),
                        None,
                    );
                }
                failed
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("{}: failed to send batch, will retry: {}", self.name, e);
                } else {
                    error!("{}: failed to send batch: {}", self.name, e);
                }
                self.stats
                    .record_error(format!("failed to send batch: {e}"), Some(&e));
                batch
            }
        };
        drop(driver);

        let requeued = failed.len();
        self.stats
            .record_batch(count.saturating_sub(requeued), requeued);
        self.queue.requeue(failed);

        let pause = {
            let mut consecutive = self
                .consecutive_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if requeued == count {
                *consecutive = consecutive.saturating_add(1);
                self.config.retry_strategy.delay(*consecutive)
            } else {
                *consecutive = 0;
                Duration::ZERO
            }
        };
        if !pause.is_zero() && !self.config.synchronous_mode {
            self.pause(pause);
        }
    }

    /// Sleeps for up to `duration`, waking early on stop.
    fn pause(&self, duration: Duration) {
        let Some(until) = Instant::now().checked_add(duration) else {
            return;
        };
        let mut lifecycle = self.lock_lifecycle();
        loop {
            let now = Instant::now();
            if now >= until {
                return;
            }
            let limit = lifecycle.shutdown_deadline.map_or(until, |d| d.min(until));
            if lifecycle.shutdown_deadline.is_some() && now >= limit {
                return;
            }
            lifecycle = self
                .lifecycle_changed
                .wait_timeout(lifecycle, limit - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Requests shutdown.
    ///
    /// The writer keeps sending for one more batch delay and until the queue
    /// is empty. Calling this more than once has no further effect. In
    /// synchronous mode the drain happens before this returns, bounded by the
    /// shutdown timeout.
    pub fn stop(&self) {
        {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.shutdown_deadline.is_some() {
                return;
            }
            let now = Instant::now();
            lifecycle.shutdown_deadline = Some(now.checked_add(self.batch_delay()).unwrap_or(now));
            if lifecycle.state == WriterState::Running {
                self.transition(&mut lifecycle, WriterState::Draining);
            }
        }
        debug!("{}: stop requested", self.name);
        self.lifecycle_changed.notify_all();
        self.queue.interrupt();

        if self.config.synchronous_mode {
            self.drain_synchronously();
        }
    }

    fn drain_synchronously(&self) {
        if self.state().is_accepting_sends() {
            let started = Instant::now();
            loop {
                self.process_batch(Some(Instant::now()));
                if self.queue.is_empty()
                    || !self.state().is_accepting_sends()
                    || started.elapsed() >= self.config.shutdown_timeout
                {
                    break;
                }
            }
            if !self.queue.is_empty() {
                warn!(
                    "{}: {} messages left unsent at shutdown",
                    self.name,
                    self.queue.len()
                );
            }
        }
        self.cleanup();
    }

    /// Shuts the driver down (once, and never after it panicked) and marks the
    /// writer finished.
    fn cleanup(&self) {
        let release = {
            let mut lifecycle = self.lock_lifecycle();
            !lifecycle.panicked && !std::mem::replace(&mut lifecycle.driver_released, true)
        };
        if release {
            self.lock_driver().shutdown();
        }

        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state != WriterState::FailedInit {
            self.transition(&mut lifecycle, WriterState::Stopped);
        }
        lifecycle.finished = true;
        drop(lifecycle);
        self.lifecycle_changed.notify_all();
        info!("{}: writer stopped", self.name);
    }

    /// Records a panic that escaped the driver and retires the writer without
    /// shutting the driver down. Returns the panic text.
    pub(crate) fn contain_panic(&self, payload: &(dyn Any + Send)) -> String {
        let message = panic_message(payload);
        error!("{}: writer panicked: {}", self.name, message);
        self.stats
            .record_error(format!("writer panicked: {message}"), None);

        let mut lifecycle = self.lock_lifecycle();
        lifecycle.panicked = true;
        if lifecycle.state != WriterState::FailedInit {
            self.transition(&mut lifecycle, WriterState::Stopped);
        }
        lifecycle.finished = true;
        drop(lifecycle);
        self.lifecycle_changed.notify_all();
        message
    }

    /// Whether a driver panic retired this writer. Its owner should replace
    /// it, carrying over [`take_pending`](Self::take_pending).
    #[must_use]
    pub fn has_panicked(&self) -> bool {
        self.lock_lifecycle().panicked
    }

    /// When the writer stops sending, once [`stop`](Self::stop) was called.
    pub(crate) fn shutdown_deadline(&self) -> Option<Instant> {
        self.lock_lifecycle().shutdown_deadline
    }

    /// Removes every queued message.
    pub fn take_pending(&self) -> Vec<LogMessage> {
        self.queue.drain()
    }

    /// Puts messages back at the head of the queue, bypassing the discard
    /// policy.
    pub fn restore_pending(&self, messages: Vec<LogMessage>) {
        self.queue.requeue(messages);
    }

    fn wait_for(&self, timeout: Duration, done: impl Fn(&Lifecycle) -> bool) -> bool {
        let lifecycle = self.lock_lifecycle();
        let (lifecycle, _) = self
            .lifecycle_changed
            .wait_timeout_while(lifecycle, timeout, |lifecycle| !done(&*lifecycle))
            .unwrap_or_else(PoisonError::into_inner);
        done(&lifecycle)
    }

    /// Waits for initialization to finish. Returns `true` only if it finished
    /// successfully within `timeout`.
    pub fn wait_until_initialized(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |lifecycle| lifecycle.state.is_initialized());
        let state = self.state();
        state.is_initialized() && state != WriterState::FailedInit
    }

    /// Waits for the writer to finish. Returns `false` on timeout.
    pub fn wait_until_finished(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |lifecycle| lifecycle.finished)
    }

    #[must_use]
    pub fn batch_delay(&self) -> Duration {
        *self
            .batch_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the batch delay for batches started from now on. Ignored in
    /// synchronous mode.
    pub fn set_batch_delay(&self, batch_delay: Duration) {
        if self.config.synchronous_mode {
            return;
        }
        *self
            .batch_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = batch_delay;
    }

    pub fn set_discard_threshold(&self, discard_threshold: usize) {
        self.queue.set_discard_threshold(discard_threshold);
    }

    pub fn set_discard_action(&self, discard_action: DiscardAction) {
        self.queue.set_discard_action(discard_action);
    }

    #[must_use]
    pub fn discard_threshold(&self) -> usize {
        self.queue.discard_threshold()
    }

    #[must_use]
    pub fn discard_action(&self) -> DiscardAction {
        self.queue.discard_action()
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("shutdown_deadline", &self.shutdown_deadline())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
