// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing output for processes that run a log shipper.
//!
//! A shipper usually lives inside an application that has its own logs, so
//! the shipper's diagnostics are prefixed to keep them apart:
//!
//! ```text
//! LOG_SHIPPER | LEVEL | [writer thread] [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! ```text
//! LOG_SHIPPER | WARN | [log-shipper-app-logs-0] app-logs: failed to send batch, will retry: throttled failure: Rate exceeded
//! LOG_SHIPPER | DEBUG | app-logs: sending batch of 42 messages
//! ```
//!
//! Events from a writer thread carry its name, so output from several
//! shippers in one process can be told apart.
//!
//! Applications that already install a subscriber can use [`Formatter`] with
//! their own builder; [`init_subscriber`] is a shortcut for everyone else.

use std::fmt;
use std::thread;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::error::WriterError;
use crate::lifecycle::THREAD_NAME_PREFIX;

const PREFIX: &str = "LOG_SHIPPER";

/// Formats events as `LOG_SHIPPER | LEVEL | [thread] spans: message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{PREFIX} | {} | ", event.metadata().level())?;

        let current = thread::current();
        if let Some(name) = current
            .name()
            .filter(|name| name.starts_with(THREAD_NAME_PREFIX))
        {
            write!(writer, "[{name}] ")?;
        }

        for span in ctx.event_scope().into_iter().flat_map(|scope| scope.from_root()) {
            let extensions = span.extensions();
            match extensions
                .get::<FormattedFields<N>>()
                .filter(|fields| !fields.is_empty())
            {
                Some(fields) => write!(writer, "{}{{{}}}: ", span.name(), fields)?,
                None => write!(writer, "{}: ", span.name())?,
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs a global subscriber using [`Formatter`].
///
/// `RUST_LOG` takes precedence over `level` when set. Fails if `level` is not
/// a valid filter directive or a global subscriber is already installed.
pub fn init_subscriber(level: &str) -> Result<(), WriterError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| WriterError::InvalidConfig(format!("invalid log level '{level}': {e}")))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(Formatter)
        .try_init()
        .map_err(|e| WriterError::InvalidConfig(format!("failed to install subscriber: {e}")))
}
