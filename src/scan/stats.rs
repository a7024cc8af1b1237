//! Run statistics
//!
//! Rolling window of run durations behind a mutex, plus the last failure so
//! `aderyn.showConfig` can explain why nothing was published.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

const MAX_SAMPLES: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_runs: u64,
    failed_runs: u64,
    skipped_runs: u64,
    coalesced_requests: u64,
    in_flight: bool,
    last_finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    duration_samples: VecDeque<u64>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_started(&self) {
        let mut inner = self.lock();
        inner.total_runs += 1;
        inner.in_flight = true;
    }

    pub fn run_completed(&self, duration: Duration) {
        let mut inner = self.lock();
        inner.in_flight = false;
        inner.last_finished_at = Some(Utc::now());
        inner.last_error = None;

        if inner.duration_samples.len() >= MAX_SAMPLES {
            inner.duration_samples.pop_front();
        }
        inner.duration_samples.push_back(duration.as_millis() as u64);
    }

    pub fn run_failed(&self, error: impl Into<String>) {
        let mut inner = self.lock();
        inner.in_flight = false;
        inner.failed_runs += 1;
        inner.last_finished_at = Some(Utc::now());
        inner.last_error = Some(error.into());
    }

    pub fn run_skipped(&self) {
        self.lock().skipped_runs += 1;
    }

    pub fn requests_coalesced(&self, count: u64) {
        self.lock().coalesced_requests += count;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        let average_duration_ms = if inner.duration_samples.is_empty() {
            0
        } else {
            inner.duration_samples.iter().sum::<u64>() / inner.duration_samples.len() as u64
        };

        StatsSnapshot {
            total_runs: inner.total_runs,
            failed_runs: inner.failed_runs,
            skipped_runs: inner.skipped_runs,
            coalesced_requests: inner.coalesced_requests,
            in_flight: inner.in_flight,
            average_duration_ms,
            last_finished_at: inner.last_finished_at.map(|t| t.to_rfc3339()),
            last_error: inner.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_runs: u64,
    pub failed_runs: u64,
    pub skipped_runs: u64,
    pub coalesced_requests: u64,
    pub in_flight: bool,
    pub average_duration_ms: u64,
    pub last_finished_at: Option<String>,
    pub last_error: Option<String>,
}
