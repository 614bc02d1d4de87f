use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use crate::types::jobs::{JobName, StatusClass};

pub static CONTROLLER_METRICS: Lazy<ControllerMetrics> = Lazy::new(ControllerMetrics::register);

/// Metric instruments of one controller process.
/// Without an installed meter provider every call is a no-op.
pub struct ControllerMetrics {
    pub jobs_processed: Counter<u64>,
    pub queue_depth: Gauge<u64>,
    pub job_duration: Histogram<f64>,
    pub spot_reclaims: Counter<u64>,
    pub transition_failures: Counter<u64>,
}

impl ControllerMetrics {
    pub fn register() -> Self {
        let meter: Meter = global::meter("crates.prover_controller.opentelemetry");

        let jobs_processed = meter
            .u64_counter("jobs_processed")
            .with_description("Count of processed jobs by job type and outcome")
            .with_unit("jobs")
            .build();

        let queue_depth = meter
            .u64_gauge("queue_depth")
            .with_description("Number of lockable jobs seen during the last scan, per job type")
            .with_unit("jobs")
            .build();

        let job_duration = meter
            .f64_histogram("job_duration_seconds")
            .with_description("Wall time of worker commands, local large retry included")
            .with_unit("s")
            .build();

        let spot_reclaims = meter
            .u64_counter("spot_reclaims")
            .with_description("Count of spot reclaim notices handled")
            .with_unit("signals")
            .build();

        let transition_failures = meter
            .u64_counter("transition_failures")
            .with_description("Count of terminal transitions left for manual intervention")
            .with_unit("jobs")
            .build();

        Self { jobs_processed, queue_depth, job_duration, spot_reclaims, transition_failures }
    }

    pub fn record_outcome(&self, job: JobName, outcome: StatusClass, duration_secs: f64) {
        let job: &'static str = job.into();
        let outcome: &'static str = outcome.into();
        let attributes = [KeyValue::new("job", job), KeyValue::new("outcome", outcome)];
        self.jobs_processed.add(1, &attributes);
        self.job_duration.record(duration_secs, &attributes);
    }

    pub fn record_queue_depth(&self, job: JobName, depth: usize) {
        let job: &'static str = job.into();
        self.queue_depth.record(depth as u64, &[KeyValue::new("job", job)]);
    }
}
