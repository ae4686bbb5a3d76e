// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Publication of writer statistics to observability tooling.
//!
//! A [`LogShipper`](crate::shipper::LogShipper) is handed a registrar when it
//! is built and registers its statistics under its name when the first writer
//! starts, then unregisters them on shutdown. Nothing here is process-global:
//! whoever owns the registrar decides how long it lives and what it exports.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use hashbrown::HashMap;

use crate::stats::{StatisticsSnapshot, WriterStatistics};

/// Something that can produce a statistics snapshot on demand.
pub trait StatisticsProvider: Send + Sync {
    fn snapshot(&self) -> StatisticsSnapshot;
}

impl StatisticsProvider for WriterStatistics {
    fn snapshot(&self) -> StatisticsSnapshot {
        WriterStatistics::snapshot(self)
    }
}

pub trait MetricsRegistrar: Send + Sync + Debug {
    fn register(&self, name: &str, provider: Arc<dyn StatisticsProvider>);
    fn unregister(&self, name: &str);
}

/// Registrar that publishes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

impl MetricsRegistrar for NoopRegistrar {
    fn register(&self, _name: &str, _provider: Arc<dyn StatisticsProvider>) {}
    fn unregister(&self, _name: &str) {}
}

/// Registrar that keeps providers in memory so they can be polled.
#[derive(Default)]
pub struct InMemoryRegistrar {
    providers: Mutex<HashMap<String, Arc<dyn StatisticsProvider>>>,
}

impl InMemoryRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the provider registered under `name`.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Option<StatisticsSnapshot> {
        let providers = self
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        providers.get(name).map(|provider| provider.snapshot())
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let providers = self
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Debug for InMemoryRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRegistrar")
            .field("names", &self.names())
            .finish()
    }
}

impl MetricsRegistrar for InMemoryRegistrar {
    fn register(&self, name: &str, provider: Arc<dyn StatisticsProvider>) {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), provider);
    }

    fn unregister(&self, name: &str) {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}
