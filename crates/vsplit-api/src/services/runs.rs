//! Background pipeline runs started by the intake endpoint.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{error, info, warn};
use vsplit_pipeline::{Pipeline, PipelineResult, RunReport, SkipReason, SkippedKey};

use crate::metrics;

/// Runs the pipeline for one source key.
#[async_trait]
pub trait SourceRunner: Send + Sync {
    async fn run(&self, source_key: &str) -> PipelineResult<RunReport>;
}

#[async_trait]
impl SourceRunner for Pipeline {
    async fn run(&self, source_key: &str) -> PipelineResult<RunReport> {
        Pipeline::run(self, source_key).await
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock(set: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases a single-flight claim when the run task ends, including by panic.
struct Claim {
    set: InFlight,
    key: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.key);
    }
}

/// Spawns one detached run per accepted source.
#[derive(Clone)]
pub struct RunLauncher {
    runner: Arc<dyn SourceRunner>,
    single_flight: bool,
    in_flight: InFlight,
}

impl RunLauncher {
    pub fn new(runner: Arc<dyn SourceRunner>, single_flight: bool) -> Self {
        Self {
            runner,
            single_flight,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start runs for `sources`. Returns the sources started and those
    /// skipped because a run is already in flight (single-flight only).
    pub async fn launch(&self, sources: Vec<String>) -> (Vec<String>, Vec<SkippedKey>) {
        let mut started = Vec::with_capacity(sources.len());
        let mut skipped = Vec::new();

        for source in sources {
            if self.single_flight && !lock(&self.in_flight).insert(source.clone()) {
                warn!(source_key = %source, "Run already in flight, skipping delivery");
                skipped.push(SkippedKey {
                    key: source,
                    reason: SkipReason::InFlight,
                });
                continue;
            }

            let runner = Arc::clone(&self.runner);
            let claim = self.single_flight.then(|| Claim {
                set: Arc::clone(&self.in_flight),
                key: source.clone(),
            });
            let key = source.clone();

            tokio::spawn(async move {
                let _claim = claim;
                match runner.run(&key).await {
                    Ok(report) => info!(
                        source_key = %key,
                        output_key = %report.output_key,
                        chunks = report.chunk_count,
                        "Background run finished"
                    ),
                    Err(e) => error!(source_key = %key, "Background run failed: {}", e),
                }
            });

            metrics::record_run_launched();
            started.push(source);
        }

        (started, skipped)
    }

    /// Sources with a run in flight (tracked only in single-flight mode).
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}
