// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Starting writer threads and reporting how they end.
//!
//! A [`ThreadFactory`] runs [`LogWriter::run`] on a dedicated thread and
//! invokes an exit callback when the thread finishes. A writer that panics
//! (almost always a driver bug) is marked finished so nobody waits on it
//! forever, the panic is recorded in its statistics, and the callback
//! receives [`WriterExit::Panicked`]. Recreating the writer is the owner's
//! decision.

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::WriterError;
use crate::writer::LogWriter;

/// How a writer thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterExit {
    Completed,
    Panicked(String),
}

pub type ExitCallback = Box<dyn FnOnce(WriterExit) + Send>;

pub trait ThreadFactory: Send + Sync + Debug {
    /// Runs `writer` on a new thread and calls `on_exit` from that thread
    /// when it ends.
    fn start_writer_thread(
        &self,
        writer: Arc<LogWriter>,
        on_exit: ExitCallback,
    ) -> Result<JoinHandle<()>, WriterError>;
}

pub(crate) const THREAD_NAME_PREFIX: &str = "log-shipper-";

/// Spawns named OS threads: `log-shipper-<writer name>-<n>`.
#[derive(Debug, Default)]
pub struct DefaultThreadFactory {
    started: AtomicUsize,
}

impl DefaultThreadFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThreadFactory for DefaultThreadFactory {
    fn start_writer_thread(
        &self,
        writer: Arc<LogWriter>,
        on_exit: ExitCallback,
    ) -> Result<JoinHandle<()>, WriterError> {
        let n = self.started.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("{THREAD_NAME_PREFIX}{}-{n}", writer.name()))
            .spawn(move || on_exit(supervise(&writer)))?;
        Ok(handle)
    }
}

/// Runs the writer to completion, containing any panic.
pub(crate) fn supervise(writer: &LogWriter) -> WriterExit {
    match panic::catch_unwind(AssertUnwindSafe(|| writer.run())) {
        Ok(()) => WriterExit::Completed,
        Err(payload) => WriterExit::Panicked(writer.contain_panic(payload.as_ref())),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use crate::driver::{Driver, SizePolicy};
    use crate::error::{DriverError, SendError};
    use crate::limits::ServiceLimits;
    use crate::message::LogMessage;
    use crate::stats::WriterStatistics;
    use crate::writer::WriterState;
    use std::sync::mpsc;
    use std::time::Duration;

    struct PanickingDriver;

    impl Driver for PanickingDriver {
        fn size_policy(&self) -> Arc<dyn SizePolicy> {
            Arc::new(ServiceLimits::log_stream())
        }

        fn ensure_destination_available(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        fn send_batch(&mut self, _batch: &[LogMessage]) -> Result<Vec<LogMessage>, SendError> {
            panic!("driver bug");
        }
    }

    struct IdleDriver;

    impl Driver for IdleDriver {
        fn size_policy(&self) -> Arc<dyn SizePolicy> {
            Arc::new(ServiceLimits::log_stream())
        }

        fn ensure_destination_available(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        fn send_batch(&mut self, _batch: &[LogMessage]) -> Result<Vec<LogMessage>, SendError> {
            Ok(Vec::new())
        }
    }

    fn writer(driver: Box<dyn Driver>) -> Arc<LogWriter> {
        let config = WriterConfig {
            batch_delay: Duration::ZERO,
            ..Default::default()
        };
        Arc::new(
            LogWriter::new("lifecycle", config, driver, Arc::new(WriterStatistics::new()))
                .unwrap(),
        )
    }

    #[test]
    fn test_completed_exit_is_reported() {
        let writer = writer(Box::new(IdleDriver));
        let (tx, rx) = mpsc::channel();

        let handle = DefaultThreadFactory::new()
            .start_writer_thread(
                Arc::clone(&writer),
                Box::new(move |exit| tx.send(exit).unwrap()),
            )
            .unwrap();
        assert_eq!(
            handle.thread().name(),
            Some("log-shipper-lifecycle-0")
        );
        assert!(writer.wait_until_initialized(Duration::from_secs(5)));

        writer.stop();
        handle.join().unwrap();

        assert_eq!(rx.recv().unwrap(), WriterExit::Completed);
        assert_eq!(writer.state(), WriterState::Stopped);
    }

    #[test]
    fn test_panic_is_contained_and_reported() {
        let writer = writer(Box::new(PanickingDriver));
        writer.add_message(LogMessage::new(0, "boom")).unwrap();
        let (tx, rx) = mpsc::channel();

        let handle = DefaultThreadFactory::new()
            .start_writer_thread(
                Arc::clone(&writer),
                Box::new(move |exit| tx.send(exit).unwrap()),
            )
            .unwrap();
        handle.join().unwrap();

        assert_eq!(
            rx.recv().unwrap(),
            WriterExit::Panicked("driver bug".to_string())
        );
        assert!(writer.wait_until_finished(Duration::ZERO));
        assert!(writer
            .statistics()
            .last_error_message()
            .unwrap()
            .contains("driver bug"));
        // the in-flight batch survives for a replacement writer
        assert_eq!(writer.take_pending(), vec![LogMessage::new(0, "boom")]);
    }

    #[test]
    fn test_panic_message_formats() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
