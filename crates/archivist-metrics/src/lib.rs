//! In-process metrics: per-stage counters, running histograms of
//! processing time and audio duration, and a bounded log of recent job
//! events. Read-only snapshots are the only way out; there is no push
//! integration with an external metrics endpoint here.

use std::collections::{HashMap, VecDeque};

use archivist_ratelimit::{EndpointSnapshot, RateLimiter};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

const EVENT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Transcribe,
    Persist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Submitted,
    Succeeded,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub recording_id: String,
    pub stage: Stage,
    pub outcome: Outcome,
    pub processing_seconds: Option<f64>,
    pub audio_duration_seconds: Option<f64>,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StageCounters {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timeout: u64,
}

impl StageCounters {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Submitted => self.submitted += 1,
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Timeout => self.timeout += 1,
        }
    }
}

#[derive(Debug, Default)]
struct Histogram {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Histogram {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count,
            mean: if self.count == 0 { 0.0 } else { self.sum / self.count as f64 },
            min: if self.count == 0 { 0.0 } else { self.min },
            max: if self.count == 0 { 0.0 } else { self.max },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub stages: HashMap<&'static str, StageCounters>,
    pub processing_seconds: HistogramSnapshot,
    pub audio_duration_seconds: HistogramSnapshot,
    pub recent_events: Vec<JobEvent>,
    pub rate_limits: Vec<EndpointSnapshot>,
}

/// Thread-safe sink for job events; every public method can be called from
/// any worker without external locking.
#[derive(Default)]
pub struct MetricsCollector {
    stages: Mutex<HashMap<Stage, StageCounters>>,
    processing_seconds: Mutex<Histogram>,
    audio_duration_seconds: Mutex<Histogram>,
    events: Mutex<VecDeque<JobEvent>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: JobEvent) {
        self.stages
            .lock()
            .entry(event.stage)
            .or_default()
            .record(event.outcome);

        if let Some(seconds) = event.processing_seconds {
            self.processing_seconds.lock().record(seconds);
        }
        if let Some(seconds) = event.audio_duration_seconds {
            self.audio_duration_seconds.lock().record(seconds);
        }

        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > EVENT_HISTORY_CAPACITY {
            events.pop_front();
        }
    }

    /// `rate_limiter` is folded in here rather than held by the collector
    /// itself, since it's shared with the Fetch/Transcribe/Persist workers
    /// and this is the only place its utilization needs reading back out.
    pub fn snapshot(&self, rate_limiter: &RateLimiter) -> MetricsSnapshot {
        let stages = self
            .stages
            .lock()
            .iter()
            .map(|(stage, counters)| (stage_label(*stage), *counters))
            .collect();

        MetricsSnapshot {
            stages,
            processing_seconds: self.processing_seconds.lock().snapshot(),
            audio_duration_seconds: self.audio_duration_seconds.lock().snapshot(),
            recent_events: self.events.lock().iter().cloned().collect(),
            rate_limits: rate_limiter.snapshot(),
        }
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Fetch => "fetch",
        Stage::Transcribe => "transcribe",
        Stage::Persist => "persist",
    }
}
