// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The owner-facing handle: a named log destination.
//!
//! A [`LogShipper`] creates its [`LogWriter`] lazily on the first
//! [`append`](LogShipper::append), starts it on a background thread (or
//! initializes it on the caller's thread in synchronous mode), and applies
//! the oversize policy before messages reach the writer.
//!
//! If a writer panics (on its thread, or on the caller's thread in
//! synchronous mode), the next `append` replaces it with a fresh writer. Messages still queued in the dead writer are carried over, and the
//! statistics object is shared across replacements.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::WriterConfig;
use crate::driver::Driver;
use crate::error::WriterError;
use crate::lifecycle::{DefaultThreadFactory, ExitCallback, ThreadFactory, WriterExit};
use crate::message::LogMessage;
use crate::queue::DiscardAction;
use crate::registrar::{MetricsRegistrar, NoopRegistrar};
use crate::stats::WriterStatistics;
use crate::writer::{LogWriter, WriterState};

/// Creates the driver for each new writer.
pub trait DriverFactory: Send + Sync {
    fn create_driver(&self, config: &WriterConfig) -> Result<Box<dyn Driver>, WriterError>;
}

impl<F> DriverFactory for F
where
    F: Fn(&WriterConfig) -> Result<Box<dyn Driver>, WriterError> + Send + Sync,
{
    fn create_driver(&self, config: &WriterConfig) -> Result<Box<dyn Driver>, WriterError> {
        self(config)
    }
}

struct ActiveWriter {
    writer: Arc<LogWriter>,
    thread: Option<JoinHandle<()>>,
    generation: u64,
}

#[derive(Default)]
struct ShipperState {
    active: Option<ActiveWriter>,
    generation: u64,
    /// Messages recovered from a writer that died, sent by its replacement.
    carried_over: Vec<LogMessage>,
    registered: bool,
}

pub struct LogShipper {
    name: String,
    config: Mutex<WriterConfig>,
    driver_factory: Box<dyn DriverFactory>,
    thread_factory: Arc<dyn ThreadFactory>,
    registrar: Arc<dyn MetricsRegistrar>,
    stats: Arc<WriterStatistics>,
    state: Mutex<ShipperState>,
    exits_tx: Sender<(u64, WriterExit)>,
    exits_rx: Mutex<Receiver<(u64, WriterExit)>>,
    shut_down: AtomicBool,
}

impl LogShipper {
    pub fn new(
        name: impl Into<String>,
        config: WriterConfig,
        driver_factory: impl DriverFactory + 'static,
    ) -> Result<Self, WriterError> {
        config.validate()?;
        let (exits_tx, exits_rx) = mpsc::channel();

        Ok(LogShipper {
            name: name.into(),
            config: Mutex::new(config),
            driver_factory: Box::new(driver_factory),
            thread_factory: Arc::new(DefaultThreadFactory::new()),
            registrar: Arc::new(NoopRegistrar),
            stats: Arc::new(WriterStatistics::new()),
            state: Mutex::new(ShipperState::default()),
            exits_tx,
            exits_rx: Mutex::new(exits_rx),
            shut_down: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_thread_factory(mut self, thread_factory: Arc<dyn ThreadFactory>) -> Self {
        self.thread_factory = thread_factory;
        self
    }

    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn MetricsRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, ShipperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_config(&self) -> MutexGuard<'_, WriterConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn statistics(&self) -> &Arc<WriterStatistics> {
        &self.stats
    }

    /// State of the current writer, if one has been started.
    #[must_use]
    pub fn writer_state(&self) -> Option<WriterState> {
        self.lock_state()
            .active
            .as_ref()
            .map(|active| active.writer.state())
    }

    /// Hands a message to the writer, starting it if needed.
    ///
    /// Messages too large for the destination are truncated or dropped with a
    /// warning, depending on `truncate_oversize_messages`.
    pub fn append(&self, message: LogMessage) -> Result<(), WriterError> {
        let writer = self.current_writer()?;
        let policy = writer.size_policy();

        let message = if policy.is_message_too_large(&message) {
            self.stats.record_oversize();
            let size = policy.effective_size(&message);
            if writer.config().truncate_oversize_messages {
                warn!(
                    "{}: truncating message of {} bytes to the destination limit of {} bytes",
                    self.name,
                    size,
                    policy.max_message_size()
                );
                policy.truncate_to_fit(&message)
            } else {
                warn!(
                    "{}: discarding message of {} bytes, the destination limit is {} bytes",
                    self.name,
                    size,
                    policy.max_message_size()
                );
                self.stats.record_discarded(1);
                return Ok(());
            }
        } else {
            message
        };

        writer.add_message(message)
    }

    fn current_writer(&self) -> Result<Arc<LogWriter>, WriterError> {
        let mut state = self.lock_state();
        // checked under the state lock so no writer starts after shutdown
        if self.shut_down.load(Ordering::Acquire) {
            return Err(WriterError::Unavailable(format!(
                "{} has been shut down",
                self.name
            )));
        }
        self.reap_exited(&mut state);

        if let Some(active) = &state.active {
            return Ok(Arc::clone(&active.writer));
        }
        self.start_writer(&mut state)
    }

    /// Forgets writers that panicked.
    fn reap_exited(&self, state: &mut ShipperState) {
        let exits = self.exits_rx.lock().unwrap_or_else(PoisonError::into_inner);
        while let Ok((generation, exit)) = exits.try_recv() {
            let WriterExit::Panicked(reason) = exit else {
                continue;
            };
            let is_current = state
                .active
                .as_ref()
                .is_some_and(|active| active.generation == generation);
            if is_current {
                self.retire_active(state, &reason);
            }
        }
        drop(exits);

        // synchronous writers have no thread to report their exit
        let panicked_in_place = state
            .active
            .as_ref()
            .is_some_and(|active| active.thread.is_none() && active.writer.has_panicked());
        if panicked_in_place {
            self.retire_active(state, "driver panicked on the caller's thread");
        }
    }

    fn retire_active(&self, state: &mut ShipperState, reason: &str) {
        if let Some(dead) = state.active.take() {
            warn!("{}: replacing writer that panicked: {}", self.name, reason);
            let pending = dead.writer.take_pending();
            state.carried_over.extend(pending);
            if let Some(thread) = dead.thread {
                let _ = thread.join();
            }
        }
    }

    fn start_writer(&self, state: &mut ShipperState) -> Result<Arc<LogWriter>, WriterError> {
        let config = self.lock_config().clone();
        let driver = self.driver_factory.create_driver(&config)?;
        let writer = Arc::new(LogWriter::new(
            self.name.clone(),
            config.clone(),
            driver,
            Arc::clone(&self.stats),
        )?);
        writer.restore_pending(std::mem::take(&mut state.carried_over));

        state.generation += 1;
        let generation = state.generation;

        let thread = if config.synchronous_mode {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| writer.initialize())) {
                writer.contain_panic(payload.as_ref());
            }
            None
        } else {
            let exits = self.exits_tx.clone();
            let on_exit: ExitCallback = Box::new(move |exit: WriterExit| {
                // the receiver only goes away with the shipper
                let _ = exits.send((generation, exit));
            });
            match self
                .thread_factory
                .start_writer_thread(Arc::clone(&writer), on_exit)
            {
                Ok(thread) => Some(thread),
                Err(e) => {
                    state.carried_over = writer.take_pending();
                    return Err(e);
                }
            }
        };
        debug!("{}: started writer #{}", self.name, generation);

        if !state.registered {
            self.registrar.register(&self.name, self.stats.clone());
            state.registered = true;
        }

        state.active = Some(ActiveWriter {
            writer: Arc::clone(&writer),
            thread,
            generation,
        });
        Ok(writer)
    }

    /// Waits for the current writer to initialize.
    ///
    /// Returns `false` if there is no writer or initialization failed. A
    /// writer still initializing after the initialization timeout is failed,
    /// exactly as if its driver had reported an error.
    pub fn wait_for_initialization(&self) -> bool {
        let Some(writer) = self
            .lock_state()
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.writer))
        else {
            return false;
        };
        let timeout = self.lock_config().initialization_timeout;
        // the writer thread may have started initializing after we began waiting
        for _ in 0..2 {
            if writer.wait_until_initialized(timeout) {
                return true;
            }
            writer.enforce_initialization_timeout();
            if writer.state().is_initialized() {
                break;
            }
        }
        false
    }

    /// Stops the writer and waits for it to drain.
    ///
    /// Safe to call more than once; only the first call does anything.
    /// Returns [`WriterError::ShutdownTimeout`] if the writer thread is still
    /// running when the shutdown timeout expires.
    pub fn shutdown(&self) -> Result<(), WriterError> {
        let (active, registered) = {
            let mut state = self.lock_state();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let registered = std::mem::replace(&mut state.registered, false);
            (state.active.take(), registered)
        };
        let timeout = self.lock_config().shutdown_timeout;

        let result = match active {
            None => Ok(()),
            Some(active) => {
                active.writer.stop();
                if active.writer.wait_until_finished(timeout) {
                    if let Some(thread) = active.thread {
                        let _ = thread.join();
                    }
                    Ok(())
                } else {
                    warn!(
                        "{}: writer still running after {:?}, {} messages unsent",
                        self.name,
                        timeout,
                        active.writer.queue_len()
                    );
                    Err(WriterError::ShutdownTimeout(timeout))
                }
            }
        };

        if registered {
            self.registrar.unregister(&self.name);
        }
        result
    }

    /// Changes the batch delay of the current and future writers.
    pub fn set_batch_delay(&self, batch_delay: Duration) {
        self.lock_config().batch_delay = batch_delay;
        if let Some(active) = &self.lock_state().active {
            active.writer.set_batch_delay(batch_delay);
        }
    }

    pub fn set_discard_threshold(&self, discard_threshold: usize) {
        self.lock_config().discard_threshold = discard_threshold;
        if let Some(active) = &self.lock_state().active {
            active.writer.set_discard_threshold(discard_threshold);
        }
    }

    pub fn set_discard_action(&self, discard_action: DiscardAction) {
        self.lock_config().discard_action = discard_action;
        if let Some(active) = &self.lock_state().active {
            active.writer.set_discard_action(discard_action);
        }
    }
}

impl fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogShipper")
            .field("name", &self.name)
            .field("writer_state", &self.writer_state())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
