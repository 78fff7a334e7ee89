//! Process-wide metrics registry.
//!
//! Monotonic counters are atomics; timing distributions are bounded
//! in-memory rings with TTL eviction. One [`Metrics`] instance is built
//! at bootstrap and passed to every component; there are no globals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::log;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sample ring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded ring of timing samples with TTL eviction on write and read.
struct SampleRing {
    samples: std::collections::VecDeque<(Instant, f64)>,
    cap: usize,
    ttl: Duration,
}

impl SampleRing {
    fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            samples: std::collections::VecDeque::with_capacity(cap.min(64)),
            cap,
            ttl,
        }
    }

    fn record(&mut self, now: Instant, millis: f64) {
        self.evict(now);
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back((now, millis));
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) > self.ttl {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Nearest-rank percentile, `p` in (0, 100]. None when empty.
    fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = self.samples.iter().map(|&(_, v)| v).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((p / 100.0) * values.len() as f64).ceil() as usize;
        Some(values[rank.clamp(1, values.len()) - 1])
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-tool-method counters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome class of one tool call, for counter attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcomeClass {
    Success,
    Status4xx,
    Status5xx,
    Transport,
}

struct MethodMetrics {
    requests: u64,
    retries: u64,
    successes: u64,
    status_4xx: u64,
    status_5xx: u64,
    transport_failures: u64,
    times: SampleRing,
}

impl MethodMetrics {
    fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            requests: 0,
            retries: 0,
            successes: 0,
            status_4xx: 0,
            status_5xx: 0,
            transport_failures: 0,
            times: SampleRing::new(cap, ttl),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Metrics {
    // Monotonic per-process counters.
    total_turns: AtomicU64,
    successful_ops: AtomicU64,
    failed_ops: AtomicU64,
    aborted_ops: AtomicU64,
    retries: AtomicU64,
    tool_4xx: AtomicU64,
    tool_5xx: AtomicU64,
    llm_calls_ok: AtomicU64,
    llm_calls_err: AtomicU64,
    llm_prompt_tokens: AtomicU64,
    llm_completion_tokens: AtomicU64,
    llm_cost_micros: AtomicU64,

    turn_times: Mutex<SampleRing>,
    tool_methods: Mutex<HashMap<&'static str, MethodMetrics>>,
    sample_cap: usize,
    sample_ttl: Duration,
}

impl Metrics {
    pub fn new(sample_cap: usize, sample_ttl: Duration) -> Self {
        Self {
            total_turns: AtomicU64::new(0),
            successful_ops: AtomicU64::new(0),
            failed_ops: AtomicU64::new(0),
            aborted_ops: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            tool_4xx: AtomicU64::new(0),
            tool_5xx: AtomicU64::new(0),
            llm_calls_ok: AtomicU64::new(0),
            llm_calls_err: AtomicU64::new(0),
            llm_prompt_tokens: AtomicU64::new(0),
            llm_completion_tokens: AtomicU64::new(0),
            llm_cost_micros: AtomicU64::new(0),
            turn_times: Mutex::new(SampleRing::new(sample_cap, sample_ttl)),
            tool_methods: Mutex::new(HashMap::new()),
            sample_cap,
            sample_ttl,
        }
    }

    // ── Turn accounting ──────────────────────────────────────────────

    pub fn record_turn(&self, wall: Duration) {
        self.total_turns.fetch_add(1, Ordering::Relaxed);
        self.turn_times
            .lock()
            .record(Instant::now(), wall.as_secs_f64() * 1000.0);
    }

    pub fn incr_successful_ops(&self) {
        self.successful_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed_ops(&self) {
        self.failed_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_aborted_ops(&self) {
        self.aborted_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Merge a batch of per-turn deltas (kept in session state during the
    /// turn, folded in at finalize).
    pub fn merge_ops(&self, successful: u64, failed: u64, aborted: u64) {
        self.successful_ops.fetch_add(successful, Ordering::Relaxed);
        self.failed_ops.fetch_add(failed, Ordering::Relaxed);
        self.aborted_ops.fetch_add(aborted, Ordering::Relaxed);
    }

    // ── Tool accounting ──────────────────────────────────────────────

    pub fn record_tool_call(
        &self,
        method: &'static str,
        class: ToolOutcomeClass,
        retries: u64,
        wall: Duration,
    ) {
        self.retries.fetch_add(retries, Ordering::Relaxed);
        match class {
            ToolOutcomeClass::Status4xx => {
                self.tool_4xx.fetch_add(1, Ordering::Relaxed);
            }
            ToolOutcomeClass::Status5xx => {
                self.tool_5xx.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let mut methods = self.tool_methods.lock();
        let entry = methods
            .entry(method)
            .or_insert_with(|| MethodMetrics::new(self.sample_cap, self.sample_ttl));
        entry.requests += 1;
        entry.retries += retries;
        match class {
            ToolOutcomeClass::Success => entry.successes += 1,
            ToolOutcomeClass::Status4xx => entry.status_4xx += 1,
            ToolOutcomeClass::Status5xx => entry.status_5xx += 1,
            ToolOutcomeClass::Transport => entry.transport_failures += 1,
        }
        entry
            .times
            .record(Instant::now(), wall.as_secs_f64() * 1000.0);
    }

    // ── LLM accounting ───────────────────────────────────────────────

    pub fn record_llm_call(
        &self,
        ok: bool,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost_micros: u64,
    ) {
        if ok {
            self.llm_calls_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.llm_calls_err.fetch_add(1, Ordering::Relaxed);
        }
        self.llm_prompt_tokens
            .fetch_add(prompt_tokens, Ordering::Relaxed);
        self.llm_completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
        self.llm_cost_micros.fetch_add(cost_micros, Ordering::Relaxed);
    }

    // ── Snapshot ─────────────────────────────────────────────────────

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_turns = self.total_turns.load(Ordering::Relaxed);
        let aborted_ops = self.aborted_ops.load(Ordering::Relaxed);
        let retries = self.retries.load(Ordering::Relaxed);

        let (turn_p50, turn_p95, turn_samples) = {
            let mut ring = self.turn_times.lock();
            ring.evict(Instant::now());
            (ring.percentile(50.0), ring.percentile(95.0), ring.len())
        };

        let tools = {
            let mut methods = self.tool_methods.lock();
            let mut out: Vec<ToolMethodSnapshot> = methods
                .iter_mut()
                .map(|(name, m)| {
                    m.times.evict(Instant::now());
                    ToolMethodSnapshot {
                        method: name,
                        requests: m.requests,
                        retries: m.retries,
                        successes: m.successes,
                        status_4xx: m.status_4xx,
                        status_5xx: m.status_5xx,
                        transport_failures: m.transport_failures,
                        p50_ms: m.times.percentile(50.0),
                        p95_ms: m.times.percentile(95.0),
                    }
                })
                .collect();
            out.sort_by_key(|s| s.method);
            out
        };

        let abort_ratio = if total_turns > 0 {
            aborted_ops as f64 / total_turns as f64
        } else {
            0.0
        };
        let retries_per_100_turns = if total_turns > 0 {
            retries as f64 * 100.0 / total_turns as f64
        } else {
            0.0
        };

        let alerts = Alerts {
            abort_ratio_high: abort_ratio > 0.20,
            retry_rate_high: retries_per_100_turns > 5.0,
            turn_p95_slow: turn_p95.map(|p| p > 2000.0).unwrap_or(false),
        };

        MetricsSnapshot {
            total_turns,
            successful_ops: self.successful_ops.load(Ordering::Relaxed),
            failed_ops: self.failed_ops.load(Ordering::Relaxed),
            aborted_ops,
            retries,
            tool_4xx: self.tool_4xx.load(Ordering::Relaxed),
            tool_5xx: self.tool_5xx.load(Ordering::Relaxed),
            llm_calls_ok: self.llm_calls_ok.load(Ordering::Relaxed),
            llm_calls_err: self.llm_calls_err.load(Ordering::Relaxed),
            llm_prompt_tokens: self.llm_prompt_tokens.load(Ordering::Relaxed),
            llm_completion_tokens: self.llm_completion_tokens.load(Ordering::Relaxed),
            llm_cost_micros: self.llm_cost_micros.load(Ordering::Relaxed),
            dropped_log_records: log::dropped_records(),
            turn_p50_ms: turn_p50,
            turn_p95_ms: turn_p95,
            turn_samples,
            abort_ratio,
            retries_per_100_turns,
            alerts,
            tools,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct Alerts {
    pub abort_ratio_high: bool,
    pub retry_rate_high: bool,
    pub turn_p95_slow: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolMethodSnapshot {
    pub method: &'static str,
    pub requests: u64,
    pub retries: u64,
    pub successes: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub transport_failures: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_turns: u64,
    pub successful_ops: u64,
    pub failed_ops: u64,
    pub aborted_ops: u64,
    pub retries: u64,
    pub tool_4xx: u64,
    pub tool_5xx: u64,
    pub llm_calls_ok: u64,
    pub llm_calls_err: u64,
    pub llm_prompt_tokens: u64,
    pub llm_completion_tokens: u64,
    pub llm_cost_micros: u64,
    pub dropped_log_records: u64,
    pub turn_p50_ms: Option<f64>,
    pub turn_p95_ms: Option<f64>,
    pub turn_samples: usize,
    pub abort_ratio: f64,
    pub retries_per_100_turns: f64,
    pub alerts: Alerts,
    pub tools: Vec<ToolMethodSnapshot>,
}
