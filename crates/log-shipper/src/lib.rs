// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Shipper
//!
//! Asynchronous, batching delivery of log messages to remote log services.
//!
//! Application threads hand messages to a [`LogShipper`]; a dedicated writer
//! thread groups them into batches that respect the destination's size and
//! count limits and sends them, retrying failures without reordering.
//!
//! ```text
//!  app threads ──append──► MessageQueue ──build_batch──► Driver::send_batch
//!                              ▲                               │
//!                              └──────── requeue failures ◄────┘
//! ```
//!
//! ## Modules
//!
//! - [`message`] and [`queue`]: the message type and the bounded FIFO with
//!   its discard policy.
//! - [`driver`] and [`limits`]: the destination plug-in traits and the size
//!   limits of the supported service families.
//! - [`batch`] and [`writer`]: batch assembly and the writer state machine.
//! - [`lifecycle`] and [`shipper`]: thread management, panic recovery and the
//!   owner-facing handle.
//! - [`stats`] and [`registrar`]: counters, last error, and their publication.
//! - [`config`], [`error`] and [`logger`]: the ambient pieces.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

pub mod batch;
pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod limits;
pub mod logger;
pub mod message;
pub mod queue;
pub mod registrar;
pub mod shipper;
pub mod stats;
pub mod writer;

pub use config::{RetryStrategy, WriterConfig};
pub use driver::{Driver, SizePolicy};
pub use error::{DriverError, FailureKind, SendError, WriterError};
pub use limits::ServiceLimits;
pub use message::LogMessage;
pub use queue::DiscardAction;
pub use shipper::{DriverFactory, LogShipper};
pub use stats::{StatisticsSnapshot, WriterStatistics};
pub use writer::{LogWriter, WriterState};
