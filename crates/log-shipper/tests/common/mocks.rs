// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock destination drivers for integration tests

use log_shipper::{
    lifecycle::{DefaultThreadFactory, ExitCallback, ThreadFactory},
    message::sort_by_timestamp,
    Driver, DriverError, DriverFactory, LogMessage, LogWriter, SendError, ServiceLimits,
    SizePolicy, WriterConfig, WriterError,
};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// What the next `send_batch` call does.
#[allow(dead_code)]
pub enum Outcome {
    Accept,
    Fail(SendError),
    /// Accept all but the last `n` messages.
    RejectLast(usize),
    Panic,
    /// Accept after sleeping.
    Stall(Duration),
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Outcome>,
    init_error: Option<DriverError>,
    init_stall: Duration,
    init_panics: bool,
    attempts: Vec<Vec<LogMessage>>,
    accepted: Vec<LogMessage>,
    send_threads: Vec<ThreadId>,
    drivers_created: usize,
    shutdowns: usize,
}

/// Shared view of every driver created from one handle.
///
/// The script of outcomes is shared too, so a driver created after a panic
/// continues where the previous one stopped.
#[derive(Clone)]
pub struct MockDestination {
    limits: ServiceLimits,
    state: Arc<Mutex<MockState>>,
}

#[allow(dead_code)]
impl MockDestination {
    pub fn new(limits: ServiceLimits) -> Self {
        MockDestination {
            limits,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Generous limits that never split the batches used in tests.
    pub fn roomy() -> Self {
        Self::new(ServiceLimits {
            max_batch_bytes: 64 * 1_024,
            max_batch_count: 1_000,
            per_message_overhead: 0,
            max_message_bytes: 1_024,
        })
    }

    pub fn then(&self, outcome: Outcome) -> &Self {
        self.state.lock().unwrap().script.push_back(outcome);
        self
    }

    pub fn fail_initialization(&self, error: DriverError) {
        self.state.lock().unwrap().init_error = Some(error);
    }

    /// Makes `ensure_destination_available` block for `stall`.
    pub fn stall_initialization(&self, stall: Duration) {
        self.state.lock().unwrap().init_stall = stall;
    }

    /// Makes the next driver panic while initializing.
    pub fn panic_on_initialization(&self) {
        self.state.lock().unwrap().init_panics = true;
    }

    pub fn driver(&self) -> Box<dyn Driver> {
        self.state.lock().unwrap().drivers_created += 1;
        Box::new(MockDriver {
            destination: self.clone(),
        })
    }

    pub fn factory(&self) -> impl DriverFactory + 'static {
        let destination = self.clone();
        move |_: &WriterConfig| -> Result<Box<dyn Driver>, WriterError> {
            Ok(destination.driver())
        }
    }

    /// Texts of every attempted batch, including failed ones.
    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|batch| batch.iter().map(|m| m.text().to_string()).collect())
            .collect()
    }

    pub fn attempted_batches(&self) -> Vec<Vec<LogMessage>> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Texts the destination accepted, in acceptance order.
    pub fn accepted(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .accepted
            .iter()
            .map(|m| m.text().to_string())
            .collect()
    }

    pub fn send_threads(&self) -> Vec<ThreadId> {
        self.state.lock().unwrap().send_threads.clone()
    }

    pub fn drivers_created(&self) -> usize {
        self.state.lock().unwrap().drivers_created
    }

    pub fn shutdowns(&self) -> usize {
        self.state.lock().unwrap().shutdowns
    }

    pub fn limits(&self) -> ServiceLimits {
        self.limits
    }
}

pub struct MockDriver {
    destination: MockDestination,
}

impl Driver for MockDriver {
    fn size_policy(&self) -> Arc<dyn SizePolicy> {
        Arc::new(self.destination.limits)
    }

    fn ensure_destination_available(&mut self) -> Result<(), DriverError> {
        let (stall, panics, init_error) = {
            let mut state = self.destination.state.lock().unwrap();
            (
                state.init_stall,
                std::mem::take(&mut state.init_panics),
                state.init_error.take(),
            )
        };
        thread::sleep(stall);
        if panics {
            panic!("mock driver panicked during initialization");
        }
        match init_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn send_batch(&mut self, batch: &[LogMessage]) -> Result<Vec<LogMessage>, SendError> {
        let outcome = {
            let mut state = self.destination.state.lock().unwrap();
            state.attempts.push(batch.to_vec());
            state.send_threads.push(thread::current().id());
            state.script.pop_front().unwrap_or(Outcome::Accept)
        };

        let rejected = match outcome {
            Outcome::Accept => 0,
            Outcome::Fail(e) => return Err(e),
            Outcome::RejectLast(n) => n.min(batch.len()),
            Outcome::Panic => panic!("mock driver panicked"),
            Outcome::Stall(duration) => {
                thread::sleep(duration);
                0
            }
        };

        let (accepted, failed) = batch.split_at(batch.len() - rejected);
        // what a log-stream request body would carry
        let mut accepted = accepted.to_vec();
        sort_by_timestamp(&mut accepted);
        self.destination
            .state
            .lock()
            .unwrap()
            .accepted
            .extend(accepted);
        Ok(failed.to_vec())
    }

    fn shutdown(&mut self) {
        self.destination.state.lock().unwrap().shutdowns += 1;
    }
}

/// Thread factory that reports every writer thread exit on a channel, after
/// the shipper has been told.
#[derive(Debug)]
pub struct NotifyingThreadFactory {
    inner: DefaultThreadFactory,
    exited: Mutex<Sender<()>>,
}

#[allow(dead_code)]
impl NotifyingThreadFactory {
    pub fn new() -> (Arc<Self>, Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let factory = NotifyingThreadFactory {
            inner: DefaultThreadFactory::new(),
            exited: Mutex::new(tx),
        };
        (Arc::new(factory), rx)
    }
}

impl ThreadFactory for NotifyingThreadFactory {
    fn start_writer_thread(
        &self,
        writer: Arc<LogWriter>,
        on_exit: ExitCallback,
    ) -> Result<JoinHandle<()>, WriterError> {
        let exited = self.exited.lock().unwrap().clone();
        self.inner.start_writer_thread(
            writer,
            Box::new(move |exit| {
                on_exit(exit);
                let _ = exited.send(());
            }),
        )
    }
}
