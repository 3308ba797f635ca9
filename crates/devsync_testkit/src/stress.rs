//! Stress tests for the sync engine.
//!
//! These run retrieval and publish loops on several threads against one
//! engine, optionally while the network and backend misbehave, and report
//! what the engine returned and what the mock backend observed.

use crate::fixtures::TestDevice;
use devsync_engine::SyncOutcome;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcomes returned by one entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    /// `Succeeded`.
    pub succeeded: usize,
    /// `NotReady`.
    pub not_ready: usize,
    /// `AnotherOperationInProgress`.
    pub in_progress: usize,
    /// `Failed`.
    pub failed: usize,
}

impl OutcomeCounts {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Succeeded => self.succeeded += 1,
            SyncOutcome::NotReady => self.not_ready += 1,
            SyncOutcome::AnotherOperationInProgress => self.in_progress += 1,
            SyncOutcome::Failed => self.failed += 1,
        }
    }

    /// Adds another set of counts.
    pub fn merge(&mut self, other: OutcomeCounts) {
        self.succeeded += other.succeeded;
        self.not_ready += other.not_ready;
        self.in_progress += other.in_progress;
        self.failed += other.failed;
    }

    /// Total calls counted.
    pub fn total(&self) -> usize {
        self.succeeded + self.not_ready + self.in_progress + self.failed
    }
}

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressReport {
    /// Outcomes of `retrieve_command`.
    pub retrieve: OutcomeCounts,
    /// Outcomes of `publish_logs`.
    pub publish: OutcomeCounts,
    /// Commands handed to the retrieval threads, in the order each thread
    /// received them, concatenated.
    pub delivered: Vec<String>,
    /// Log messages recorded by the publish threads.
    pub recorded: Vec<String>,
    /// Highest number of backend calls observed executing at once.
    pub max_concurrent_calls: usize,
    /// Total duration.
    pub duration: Duration,
    /// Engine calls per second.
    pub ops_per_second: f64,
}

impl StressReport {
    /// Total engine calls made.
    pub fn total_calls(&self) -> usize {
        self.retrieve.total() + self.publish.total()
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Retrieve outcomes: {:?}", self.retrieve);
        println!("Publish outcomes: {:?}", self.publish);
        println!("Commands delivered: {}", self.delivered.len());
        println!("Records recorded: {}", self.recorded.len());
        println!("Max concurrent backend calls: {}", self.max_concurrent_calls);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} calls/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Threads calling `retrieve_command`.
    pub retrievers: usize,
    /// Threads recording a log line and calling `publish_logs`.
    pub publishers: usize,
    /// Calls per thread.
    pub iterations: usize,
    /// Single-command payloads queued on the backend before the run.
    pub payloads: usize,
    /// Latency added to every backend call.
    pub call_delay: Duration,
    /// Pause between disturbances, if a disturbance thread should run.
    pub churn_interval: Option<Duration>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            retrievers: 2,
            publishers: 2,
            iterations: 200,
            payloads: 50,
            call_delay: Duration::from_micros(200),
            churn_interval: None,
        }
    }
}

/// Runs concurrent retrieval and publish loops against `device`.
///
/// With `churn_interval` set, another thread cycles through read failures,
/// write failures, link loss and network changes until the loops finish,
/// then restores a healthy backend and network.
pub fn stress_concurrent_sync(device: &TestDevice, config: &StressConfig) -> StressReport {
    for i in 0..config.payloads {
        device
            .backend
            .push_payload(format!(r#"{{"cmd{i:04}":{i}}}"#));
    }
    device.backend.set_call_delay(config.call_delay);

    let done = Arc::new(AtomicBool::new(false));
    let line_counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let churn = config.churn_interval.map(|interval| {
        let backend = Arc::clone(&device.backend);
        let network = Arc::clone(&device.network);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut step = 0usize;
            while !done.load(Ordering::Acquire) {
                match step % 6 {
                    0 => backend.fail_reads(Some("stress: read dropped")),
                    1 => backend.fail_reads(None),
                    2 => backend.fail_next_writes(2),
                    3 => network.set_link(false),
                    4 => network.set_link(true),
                    _ => {
                        network.reassociate();
                    }
                }
                step += 1;
                thread::sleep(interval);
            }
            backend.fail_reads(None);
            backend.fail_next_writes(0);
            network.set_link(true);
            network.set_internet(true);
        })
    });

    let retrievers: Vec<_> = (0..config.retrievers)
        .map(|_| {
            let engine = Arc::clone(&device.engine);
            let iterations = config.iterations;
            thread::spawn(move || {
                let mut counts = OutcomeCounts::default();
                let mut delivered = Vec::new();
                for _ in 0..iterations {
                    let retrieval = engine.retrieve_command();
                    counts.record(retrieval.outcome);
                    delivered.extend(retrieval.command.map(|c| c.line()));
                }
                (counts, delivered)
            })
        })
        .collect();

    let publishers: Vec<_> = (0..config.publishers)
        .map(|t| {
            let engine = Arc::clone(&device.engine);
            let line_counter = Arc::clone(&line_counter);
            let iterations = config.iterations;
            thread::spawn(move || {
                let mut counts = OutcomeCounts::default();
                let mut recorded = Vec::with_capacity(iterations);
                for _ in 0..iterations {
                    let n = line_counter.fetch_add(1, Ordering::Relaxed);
                    let message = format!("publisher {t} line {n}");
                    engine.record_log(message.clone());
                    recorded.push(message);
                    counts.record(engine.publish_logs());
                }
                (counts, recorded)
            })
        })
        .collect();

    let mut report = StressReport {
        retrieve: OutcomeCounts::default(),
        publish: OutcomeCounts::default(),
        delivered: Vec::new(),
        recorded: Vec::new(),
        max_concurrent_calls: 0,
        duration: Duration::ZERO,
        ops_per_second: 0.0,
    };
    for handle in retrievers {
        let (counts, delivered) = handle.join().expect("Thread panicked");
        report.retrieve.merge(counts);
        report.delivered.extend(delivered);
    }
    for handle in publishers {
        let (counts, recorded) = handle.join().expect("Thread panicked");
        report.publish.merge(counts);
        report.recorded.extend(recorded);
    }
    done.store(true, Ordering::Release);
    if let Some(handle) = churn {
        handle.join().expect("Thread panicked");
    }

    report.duration = start.elapsed();
    report.max_concurrent_calls = device.backend.max_concurrent_calls();
    report.ops_per_second = if report.duration.as_secs_f64() > 0.0 {
        report.total_calls() as f64 / report.duration.as_secs_f64()
    } else {
        0.0
    };
    device.backend.set_call_delay(Duration::ZERO);
    report
}
