// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for driving a shipper in integration tests

use log_shipper::{LogMessage, LogShipper, WriterConfig};
use std::time::{Duration, Instant};

/// Asynchronous config with a short batch window.
#[allow(dead_code)]
pub fn async_config(batch_delay_ms: u64) -> WriterConfig {
    WriterConfig {
        batch_delay: Duration::from_millis(batch_delay_ms),
        shutdown_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn append_all(shipper: &LogShipper, texts: &[&str]) {
    for (i, text) in texts.iter().enumerate() {
        shipper
            .append(LogMessage::new(i as u64, *text))
            .expect("append failed");
    }
}

/// Polls `condition` until it holds or `timeout` passes.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
