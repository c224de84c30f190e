use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use replay_common::record::InputRecord;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

use crate::comparison::Comparer;
use crate::error::{ComparisonError, ReplayError, ReportError};
use crate::report::ReportSink;

/// Counts of how a run went.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Comparisons whose row was written to the report.
    pub succeeded: usize,
    /// Comparisons that failed; no row was written for them.
    pub failed: usize,
    /// Failed comparisons by the stage that failed.
    pub failed_by_stage: BTreeMap<&'static str, usize>,
    /// Most comparisons that were in flight at the same time.
    pub peak_in_flight: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    fn record(
        &mut self,
        joined: Result<Result<Outcome, ReportError>, JoinError>,
    ) -> Result<(), ReplayError> {
        match joined {
            Ok(Ok(Outcome::Done)) => self.succeeded += 1,
            Ok(Ok(Outcome::Failed(stage))) => {
                self.failed += 1;
                *self.failed_by_stage.entry(stage).or_default() += 1;
            }
            Ok(Err(report_error)) => return Err(report_error.into()),
            Err(join_error) => {
                error!("comparison task did not complete: {}", join_error);
                self.failed += 1;
                *self.failed_by_stage.entry("task").or_default() += 1;
            }
        }

        Ok(())
    }
}

/// How a comparison task ended, when it did not abort the run.
enum Outcome {
    Done,
    Failed(&'static str),
}

/// Tracks comparisons currently holding an admission permit.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        InFlightGuard(self.clone())
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fans records out to comparison tasks, admitting at most `max_concurrent_comparisons` at once.
pub struct Dispatcher {
    comparer: Arc<Comparer>,
    report: Arc<dyn ReportSink>,
    max_concurrent_comparisons: usize,
}

impl Dispatcher {
    pub fn new(
        comparer: Comparer,
        report: Arc<dyn ReportSink>,
        max_concurrent_comparisons: usize,
    ) -> Self {
        Self {
            comparer: Arc::new(comparer),
            report,
            max_concurrent_comparisons: max_concurrent_comparisons.max(1),
        }
    }

    /// Compare every record and wait for all of them to finish.
    ///
    /// A failed comparison is counted and the run carries on. A failure to write the report ends
    /// the run: outstanding comparisons are aborted and the error is returned.
    pub async fn run(&self, records: Vec<InputRecord>) -> Result<RunSummary, ReplayError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_comparisons));
        let report_semaphore_utilization = || {
            metrics::gauge!("replay_saturation_percent").set(
                1f64 - semaphore.available_permits() as f64
                    / self.max_concurrent_comparisons as f64,
            );
        };

        let in_flight = Arc::new(InFlight::default());
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();

        info!(records = records.len(), "starting comparisons");

        for record in records {
            report_semaphore_utilization();
            let permit = semaphore.clone().acquire_owned().await?;

            while let Some(joined) = tasks.try_join_next() {
                summary.record(joined)?;
            }

            tasks.spawn(process_record(
                self.comparer.clone(),
                self.report.clone(),
                in_flight.clone(),
                record,
                permit,
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            summary.record(joined)?;
        }
        report_semaphore_utilization();

        summary.peak_in_flight = in_flight.peak();

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            peak_in_flight = summary.peak_in_flight,
            "finished comparisons"
        );

        Ok(summary)
    }
}

/// Compare one record and append its row, holding `permit` throughout.
async fn process_record(
    comparer: Arc<Comparer>,
    report: Arc<dyn ReportSink>,
    in_flight: Arc<InFlight>,
    record: InputRecord,
    permit: OwnedSemaphorePermit,
) -> Result<Outcome, ReportError> {
    let in_flight_guard = in_flight.enter();

    metrics::counter!("replay_comparisons_total").increment(1);
    let now = tokio::time::Instant::now();

    let outcome = match comparer.compare(&record).await {
        Ok(row) => {
            report.append_row(&row).await?;

            metrics::counter!("replay_comparisons_completed").increment(1);
            metrics::histogram!("replay_comparison_duration_seconds")
                .record(now.elapsed().as_secs_f64());

            Outcome::Done
        }
        Err(error) => {
            let stage = error.stage();
            log_failure(&record, &error);
            metrics::counter!("replay_comparisons_failed", &[("stage", stage)]).increment(1);

            Outcome::Failed(stage)
        }
    };

    drop(in_flight_guard);
    drop(permit);

    Ok(outcome)
}

fn log_failure(record: &InputRecord, error: &ComparisonError) {
    error!(
        invoice = %record.prefix.invoice,
        company = %record.prefix.company,
        stage = error.stage(),
        "failed to compare invoice: {}",
        error
    );
}
