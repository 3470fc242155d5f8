//! Process metrics for conversions, inference requests, batches and errors.
//!
//! One [`MetricsCollector`] is created at startup and shared (`Arc`) by the
//! pipeline, inference client and batch runner. Every stage reports into it;
//! callers read immutable [`MetricsSnapshot`] copies. Tests build a fresh
//! collector per test.
//!
//! Averages use the incremental mean `avg += (x - avg) / n`, so no sample
//! history is kept beyond the bounded snapshot ring.

use crate::error::{ErrorCode, ProcessingStep};
use crate::output::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default capacity of the snapshot history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionMetrics {
    pub total: u64,
    pub successful: u64,
    pub partial: u64,
    pub failed: u64,
    pub average_duration_ms: f64,
    /// Mean extracted text length over conversions that produced a document.
    pub average_text_length: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceMetrics {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub connection_failures: u64,
    /// Attempts made across all requests, retries included.
    pub total_attempts: u64,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetrics {
    pub total_batches: u64,
    pub total_files: u64,
    pub average_duration_ms: f64,
    pub average_success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMetrics {
    pub total: u64,
    pub by_code: BTreeMap<ErrorCode, u64>,
    pub by_step: BTreeMap<ProcessingStep, u64>,
}

/// Timing aggregate for one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub count: u64,
    pub total_ms: u64,
    pub average_ms: f64,
    pub max_ms: u64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub conversions: ConversionMetrics,
    pub inference: InferenceMetrics,
    pub batches: BatchMetrics,
    pub errors: ErrorMetrics,
    pub stages: BTreeMap<ProcessingStep, StageTiming>,
}

/// How an inference request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceOutcome {
    Success,
    Timeout,
    ConnectionFailure,
    /// Rejected before any network call (empty input).
    Rejected,
}

/// Counters over a recent time window, from diffing two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentStats {
    pub window_ms: u64,
    pub conversions: u64,
    pub successful: u64,
    pub failed: u64,
    /// `successful / conversions`, 0 when nothing converted.
    pub success_rate: f64,
    pub inference_requests: u64,
    pub inference_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    conversions: ConversionMetrics,
    documents_with_text: u64,
    inference: InferenceMetrics,
    batches: BatchMetrics,
    errors: ErrorMetrics,
    stages: BTreeMap<ProcessingStep, StageTiming>,
}

#[derive(Debug)]
struct State {
    counters: Counters,
    history: VecDeque<MetricsSnapshot>,
}

fn incremental_mean(average: f64, value: f64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    average + (value - average) / count as f64
}

/// Shared, mutex-guarded metrics store.
///
/// Every method takes the lock for a handful of arithmetic operations only.
#[derive(Debug)]
pub struct MetricsCollector {
    state: Mutex<State>,
    history_capacity: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                counters: Counters::default(),
                history: VecDeque::with_capacity(capacity),
            }),
            history_capacity: capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record how long one pipeline stage took.
    pub fn record_stage(&self, step: ProcessingStep, duration_ms: u64) {
        let mut state = self.lock();
        let timing = state.counters.stages.entry(step).or_default();
        timing.count += 1;
        timing.total_ms += duration_ms;
        timing.max_ms = timing.max_ms.max(duration_ms);
        timing.average_ms = incremental_mean(timing.average_ms, duration_ms as f64, timing.count);
    }

    /// Record the end of one document conversion.
    pub fn record_conversion(&self, outcome: Outcome, duration_ms: u64, text_length: usize) {
        let mut state = self.lock();
        let counters = &mut state.counters;
        let c = &mut counters.conversions;
        c.total += 1;
        match outcome {
            Outcome::Success => c.successful += 1,
            Outcome::Partial => c.partial += 1,
            Outcome::Failed => c.failed += 1,
        }
        c.average_duration_ms = incremental_mean(c.average_duration_ms, duration_ms as f64, c.total);
        if outcome != Outcome::Failed {
            counters.documents_with_text += 1;
            c.average_text_length = incremental_mean(
                c.average_text_length,
                text_length as f64,
                counters.documents_with_text,
            );
        }
    }

    /// Record the end of one inference request (all attempts included).
    pub fn record_inference(&self, outcome: InferenceOutcome, duration_ms: u64, attempts: u32) {
        let mut state = self.lock();
        let i = &mut state.counters.inference;
        i.total_requests += 1;
        i.total_attempts += u64::from(attempts);
        match outcome {
            InferenceOutcome::Success => i.successful += 1,
            InferenceOutcome::Timeout => {
                i.failed += 1;
                i.timeouts += 1;
            }
            InferenceOutcome::ConnectionFailure => {
                i.failed += 1;
                i.connection_failures += 1;
            }
            InferenceOutcome::Rejected => i.failed += 1,
        }
        i.average_duration_ms =
            incremental_mean(i.average_duration_ms, duration_ms as f64, i.total_requests);
    }

    /// Record a completed batch run.
    ///
    /// The success-rate average is `avg + (rate - avg) / batches`; an empty
    /// batch has nothing failed and counts as rate 1.0.
    pub fn record_batch(&self, files: usize, successes: usize, duration_ms: u64) {
        let mut state = self.lock();
        let b = &mut state.counters.batches;
        b.total_batches += 1;
        b.total_files += files as u64;
        let rate = if files == 0 {
            1.0
        } else {
            successes as f64 / files as f64
        };
        b.average_success_rate = incremental_mean(b.average_success_rate, rate, b.total_batches);
        b.average_duration_ms =
            incremental_mean(b.average_duration_ms, duration_ms as f64, b.total_batches);
    }

    pub fn record_error(&self, code: ErrorCode, step: ProcessingStep) {
        let mut state = self.lock();
        let e = &mut state.counters.errors;
        e.total += 1;
        *e.by_code.entry(code).or_insert(0) += 1;
        *e.by_step.entry(step).or_insert(0) += 1;
    }

    /// Current counters, without touching the history.
    pub fn metrics(&self) -> MetricsSnapshot {
        Self::capture(&self.lock().counters)
    }

    /// Capture the current counters into the history and return them.
    ///
    /// The oldest snapshot is evicted once the history is full.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut state = self.lock();
        let snapshot = Self::capture(&state.counters);
        if state.history.len() == self.history_capacity {
            state.history.pop_front();
        }
        state.history.push_back(snapshot.clone());
        snapshot
    }

    /// Captured snapshots, oldest first.
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.lock().history.iter().cloned().collect()
    }

    /// Statistics over snapshots captured within `window` of now.
    ///
    /// Diffs the oldest and newest snapshot in the window; `None` when fewer
    /// than two fall inside it.
    pub fn recent_stats(&self, window: Duration) -> Option<RecentStats> {
        let state = self.lock();
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut in_window = state.history.iter().filter(|s| s.timestamp >= cutoff);
        let oldest = in_window.next()?;
        let newest = in_window.last()?;

        let conversions = newest.conversions.total - oldest.conversions.total;
        let successful = (newest.conversions.successful + newest.conversions.partial)
            - (oldest.conversions.successful + oldest.conversions.partial);
        let failed = newest.conversions.failed - oldest.conversions.failed;
        let success_rate = if conversions == 0 {
            0.0
        } else {
            successful as f64 / conversions as f64
        };

        Some(RecentStats {
            window_ms: (newest.timestamp - oldest.timestamp).num_milliseconds().max(0) as u64,
            conversions,
            successful,
            failed,
            success_rate,
            inference_requests: newest.inference.total_requests - oldest.inference.total_requests,
            inference_failures: newest.inference.failed - oldest.inference.failed,
        })
    }

    /// Zero every counter and clear the history.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.counters = Counters::default();
        state.history.clear();
    }

    /// Capture a snapshot every `interval` until the collector is dropped.
    pub fn spawn_sampler(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(collector) = weak.upgrade() else {
                    debug!("Metrics collector dropped, sampler exiting");
                    break;
                };
                collector.snapshot();
            }
        })
    }

    /// Human-readable report of the current counters.
    pub fn summary(&self) -> String {
        let m = self.metrics();
        let c = &m.conversions;
        let i = &m.inference;
        let b = &m.batches;

        let mut lines = vec![
            "Conversion Metrics".to_string(),
            "==================".to_string(),
            format!(
                "Documents: {} ({} ok, {} partial, {} failed)",
                c.total, c.successful, c.partial, c.failed
            ),
            format!("Avg duration: {:.0}ms", c.average_duration_ms),
            format!("Avg text length: {:.0} chars", c.average_text_length),
            String::new(),
            format!(
                "Inference requests: {} ({} ok, {} failed, {} timeouts, {} connection)",
                i.total_requests, i.successful, i.failed, i.timeouts, i.connection_failures
            ),
            format!("Inference attempts: {}", i.total_attempts),
            format!("Avg inference duration: {:.0}ms", i.average_duration_ms),
            String::new(),
            format!("Batches: {} ({} files)", b.total_batches, b.total_files),
            format!("Avg batch success rate: {:.1}%", b.average_success_rate * 100.0),
        ];

        if !m.stages.is_empty() {
            lines.push(String::new());
            lines.push("Stage timings:".to_string());
            for (step, t) in &m.stages {
                lines.push(format!(
                    "  {}: {} runs, avg {:.0}ms, max {}ms",
                    step, t.count, t.average_ms, t.max_ms
                ));
            }
        }

        if m.errors.total > 0 {
            lines.push(String::new());
            lines.push(format!("Errors: {}", m.errors.total));
            for (code, count) in &m.errors.by_code {
                lines.push(format!("  {}: {}", code, count));
            }
        }

        lines.join("\n")
    }

    fn capture(counters: &Counters) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            conversions: counters.conversions.clone(),
            inference: counters.inference.clone(),
            batches: counters.batches.clone(),
            errors: counters.errors.clone(),
            stages: counters.stages.clone(),
        }
    }
}
