// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driving a whole run: shard the targets, submit one matrix per shard,
//! poll them concurrently, and merge whatever reports come back.
//!
//! Shards are isolated from each other. A shard that fails to submit, dies
//! to infrastructure, or produces an unreadable report is recorded in the
//! outcome and never aborts its siblings.
//!
//! A run in flight is cancelled through a [`CancelSignal`]: every shard
//! still polling issues a remote cancel for its matrix, then keeps polling
//! until the service reports the terminal state. Reports already collected
//! survive cancellation.

use crate::{
    config::MatrixArgs,
    errors::{NoTestsFound, ShardError},
    lab::{DeviceLab, MatrixClient, MatrixCreateRequest, MatrixState},
    shard::{TimingIndex, effective_shard_count, prepend_always_run, shards_by_count},
    time,
};
use chrono::{DateTime, Local};
use drover_junit::{Report, merge, parse_report};
use futures::{StreamExt, stream::FuturesUnordered};
use std::{pin::pin, time::Duration};
use tokio::sync::watch;
use uuid::Uuid;

/// What a run produced: the merged report plus an account of every shard
/// that contributed nothing to it.
#[derive(Debug)]
pub struct RunOutcome {
    /// All completed shards' reports, merged in shard order.
    pub report: Report,

    /// How many shards produced a report.
    pub completed: usize,

    /// How many shards the run submitted.
    pub total: usize,

    /// The shards that failed, in shard order.
    pub failures: Vec<ShardFailure>,

    /// When the run started.
    pub started_at: DateTime<Local>,

    /// How long the run took, submission through the last poll.
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Returns true when every shard contributed a report.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.completed == self.total
    }
}

/// One shard that produced no report, and why.
#[derive(Debug)]
pub struct ShardFailure {
    /// The index of the failed shard.
    pub shard_index: usize,

    /// The targets that went unexecuted (or unreported).
    pub targets: Vec<String>,

    /// What went wrong.
    pub error: ShardError,
}

/// Runs `targets` against the device lab and merges the results.
///
/// The targets are balanced into shards using `timing`, one matrix is
/// submitted per shard, and all matrices are polled concurrently. Reports
/// from finished matrices are merged in ascending shard order; failed
/// shards are reported in [`RunOutcome::failures`] instead.
///
/// Firing `cancel` while the run is in flight issues a remote cancel for
/// every matrix still polling; each of those shards then fails with
/// [`ShardError::Cancelled`] once the service confirms, while reports from
/// matrices that already finished are kept. Pass
/// [`CancelSignal::never`] when no cancellation path is wired up.
///
/// The only error is an empty target list, surfaced before anything is
/// submitted.
pub async fn execute_run<L: DeviceLab>(
    client: &MatrixClient<L>,
    args: &impl MatrixArgs,
    targets: &[String],
    timing: &TimingIndex,
    cancel: CancelSignal,
) -> Result<RunOutcome, NoTestsFound> {
    let stopwatch = time::stopwatch();

    let shard_count = effective_shard_count(args, targets, timing);
    let shards = shards_by_count(targets, timing, shard_count)?;
    let shards = prepend_always_run(shards, args.test_targets_always_run(), timing);
    let total = shards.len();

    // Groups every matrix's results under one storage prefix.
    let run_path = Uuid::new_v4().to_string();
    tracing::info!(
        shards = total,
        targets = targets.len(),
        run_path,
        "submitting run"
    );

    let mut pending: FuturesUnordered<_> = shards
        .iter()
        .enumerate()
        .map(|(shard_index, shard)| {
            let request = MatrixCreateRequest::for_shard(shard, args, &run_path);
            run_shard(client, shard_index, &shard.targets, request, cancel.clone())
        })
        .collect();

    let mut reports: Vec<(usize, Report)> = Vec::new();
    let mut failures: Vec<ShardFailure> = Vec::new();
    while let Some(result) = pending.next().await {
        match result {
            Ok((shard_index, report)) => reports.push((shard_index, report)),
            Err(failure) => {
                tracing::warn!(
                    shard_index = failure.shard_index,
                    error = %failure.error,
                    "shard failed"
                );
                failures.push(failure);
            }
        }
    }
    drop(pending);

    // Completion order is arbitrary; merge in shard order so the output is
    // deterministic.
    reports.sort_by_key(|(shard_index, _)| *shard_index);
    failures.sort_by_key(|failure| failure.shard_index);

    let completed = reports.len();
    let mut merged: Option<Report> = None;
    for (_, report) in &reports {
        merged = Some(match &merged {
            None => report.clone(),
            Some(acc) => merge(acc, Some(report)),
        });
    }

    let snapshot = stopwatch.snapshot();
    tracing::info!(
        completed,
        total,
        elapsed = ?snapshot.duration,
        "run finished"
    );
    Ok(RunOutcome {
        report: merged.unwrap_or_default(),
        completed,
        total,
        failures,
        started_at: snapshot.start_time,
        elapsed: snapshot.duration,
    })
}

/// Creates a linked cancel handle and signal.
///
/// Hand the [`CancelSignal`] to [`execute_run`] and keep the
/// [`CancelHandle`]; firing the handle cancels the run.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
}

/// The firing half of a cancellation pair. See [`cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancels the run holding the paired [`CancelSignal`]. Idempotent.
    pub fn cancel(&self) {
        // Receivers may all be gone if the run already completed.
        let _ = self.tx.send(true);
    }
}

/// The observing half of a cancellation pair, consumed by [`execute_run`].
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires, for runs with no cancellation path.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Resolves once the paired handle fires. A handle dropped without
    /// firing, or a signal built with [`CancelSignal::never`], pends
    /// forever.
    async fn cancelled(&mut self) {
        if let Some(rx) = &mut self.rx
            && rx.wait_for(|cancelled| *cancelled).await.is_ok()
        {
            return;
        }
        std::future::pending::<()>().await
    }
}

async fn run_shard<L: DeviceLab>(
    client: &MatrixClient<L>,
    shard_index: usize,
    targets: &[String],
    request: MatrixCreateRequest,
    cancel: CancelSignal,
) -> Result<(usize, Report), ShardFailure> {
    match run_shard_inner(client, shard_index, &request, cancel).await {
        Ok(report) => Ok((shard_index, report)),
        Err(error) => Err(ShardFailure {
            shard_index,
            targets: targets.to_vec(),
            error,
        }),
    }
}

async fn run_shard_inner<L: DeviceLab>(
    client: &MatrixClient<L>,
    shard_index: usize,
    request: &MatrixCreateRequest,
    mut cancel: CancelSignal,
) -> Result<Report, ShardError> {
    let mut job = client.create(shard_index, request).await?;
    let matrix_id = job.id.clone();

    let status = {
        let mut poll = pin!(client.wait_for_terminal(&mut job));
        tokio::select! {
            status = &mut poll => status?,
            _ = cancel.cancelled() => {
                tracing::info!(matrix_id = %matrix_id, "cancelling matrix");
                client.cancel(&matrix_id).await;
                // The service settles into its terminal state on its own
                // schedule; keep polling until it is observed.
                poll.await?
            }
        }
    };

    match status.state {
        MatrixState::Finished => {
            let results = status
                .results
                .as_ref()
                .ok_or_else(|| ShardError::MissingResults {
                    matrix_id: job.id.clone(),
                })?;
            let xml = client
                .fetch_report_xml(results)
                .await
                .map_err(|source| ShardError::ReportFetch {
                    matrix_id: job.id.clone(),
                    source,
                })?;
            parse_report(&xml).map_err(|source| ShardError::ReportParse {
                matrix_id: job.id.clone(),
                source,
            })
        }
        MatrixState::Cancelled => Err(ShardError::Cancelled { matrix_id: job.id }),
        state => Err(ShardError::Infrastructure {
            matrix_id: job.id,
            state,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AndroidArgs, AndroidDevice},
        errors::LabServiceError,
        lab::{MatrixId, StoragePath, fake::FakeLab, fake::PlannedCreate},
    };
    use pretty_assertions::assert_eq;

    fn args(test_shards: i64) -> AndroidArgs {
        AndroidArgs {
            app: StoragePath::from("gs://artifacts/app.apk"),
            test: StoragePath::from("gs://artifacts/app-test.apk"),
            test_shards,
            shard_time_secs: None,
            test_timeout_secs: 900,
            results_bucket: "gs://results".to_owned(),
            results_history_name: None,
            record_video: false,
            performance_metrics: false,
            use_orchestrator: true,
            flaky_test_attempts: 0,
            test_targets_always_run: vec![],
            timing_report_path: None,
            devices: vec![AndroidDevice {
                model: "Pixel2".to_owned(),
                version: "28".to_owned(),
                locale: "en".to_owned(),
                orientation: "portrait".to_owned(),
            }],
        }
    }

    fn targets() -> Vec<String> {
        vec!["a/a".to_owned(), "b/b".to_owned(), "c/c".to_owned()]
    }

    fn report_xml(suite: &str, case: &str) -> String {
        format!(
            r#"<testsuites><testsuite name="{suite}" tests="1" failures="0" errors="0">
                 <testcase name="{case}" classname="{suite}" time="1.500"/>
               </testsuite></testsuites>"#
        )
    }

    fn finishing_plan(suite: &str, case: &str) -> PlannedCreate {
        PlannedCreate {
            error: None,
            polls: vec![Ok(MatrixState::Running), Ok(MatrixState::Finished)],
            report_xml: Some(report_xml(suite, case)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_full_run_merges_every_shard_report() {
        // Three targets, three shards: each target becomes its own shard
        // and the planned creations are keyed by that single target.
        let lab = FakeLab::new();
        lab.plan_create("a/a", finishing_plan("alpha", "one"));
        lab.plan_create("b/b", finishing_plan("beta", "two"));
        lab.plan_create("c/c", finishing_plan("gamma", "three"));
        let client = MatrixClient::new(lab);

        let outcome = execute_run(&client, &args(3), &targets(), &TimingIndex::new(), CancelSignal::never())
            .await
            .expect("targets are non-empty");

        assert!(outcome.is_complete());
        assert_eq!(outcome.completed, 3);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.report.tests, 3);
        assert_eq!(outcome.report.failures, 0);
        let suites: Vec<&str> = outcome
            .report
            .suites
            .iter()
            .map(|suite| suite.name.as_str())
            .collect();
        assert_eq!(suites, ["alpha", "beta", "gamma"]);

        // One matrix per shard went out, all under the same run prefix.
        let requests = client.lab().created_requests();
        assert_eq!(requests.len(), 3);
        let prefix_of = |path: &StoragePath| {
            let raw = path.as_str();
            raw[..raw.rfind('/').expect("path has segments")].to_owned()
        };
        let first = prefix_of(&requests[0].results_storage);
        assert!(
            requests
                .iter()
                .all(|request| prefix_of(&request.results_storage) == first)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn a_rejected_shard_does_not_abort_its_siblings() {
        let lab = FakeLab::new();
        lab.plan_create("a/a", finishing_plan("alpha", "one"));
        lab.plan_create(
            "b/b",
            PlannedCreate {
                error: Some(LabServiceError::Service {
                    status: 400,
                    message: "invalid APK".to_owned(),
                }),
                polls: vec![],
                report_xml: None,
            },
        );
        lab.plan_create("c/c", finishing_plan("gamma", "three"));
        let client = MatrixClient::new(lab);

        let outcome = execute_run(&client, &args(3), &targets(), &TimingIndex::new(), CancelSignal::never())
            .await
            .expect("targets are non-empty");

        assert!(!outcome.is_complete());
        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.report.tests, 2);

        assert_eq!(outcome.failures.len(), 1);
        let failure = &outcome.failures[0];
        assert_eq!(failure.shard_index, 1);
        assert_eq!(failure.targets, ["b/b"]);
        assert!(matches!(failure.error, ShardError::Creation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn an_infrastructure_failure_is_reported_as_such() {
        let lab = FakeLab::new();
        lab.plan_create(
            "a/a",
            PlannedCreate {
                error: None,
                polls: vec![Ok(MatrixState::Running), Ok(MatrixState::Error)],
                report_xml: None,
            },
        );
        let client = MatrixClient::new(lab);
        let targets = vec!["a/a".to_owned()];

        let outcome = execute_run(&client, &args(1), &targets, &TimingIndex::new(), CancelSignal::never())
            .await
            .expect("targets are non-empty");

        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            ShardError::Infrastructure {
                state: MatrixState::Error,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn a_finished_matrix_without_results_is_a_failure() {
        let lab = FakeLab::new();
        lab.plan_create(
            "a/a",
            PlannedCreate {
                error: None,
                polls: vec![Ok(MatrixState::Finished)],
                report_xml: None,
            },
        );
        let client = MatrixClient::new(lab);
        let targets = vec!["a/a".to_owned()];

        let outcome = execute_run(&client, &args(1), &targets, &TimingIndex::new(), CancelSignal::never())
            .await
            .expect("targets are non-empty");

        assert!(matches!(
            outcome.failures[0].error,
            ShardError::MissingResults { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn an_unparseable_report_is_a_failure() {
        let lab = FakeLab::new();
        lab.plan_create(
            "a/a",
            PlannedCreate {
                error: None,
                polls: vec![Ok(MatrixState::Finished)],
                report_xml: Some("this is not xml".to_owned()),
            },
        );
        let client = MatrixClient::new(lab);
        let targets = vec!["a/a".to_owned()];

        let outcome = execute_run(&client, &args(1), &targets, &TimingIndex::new(), CancelSignal::never())
            .await
            .expect("targets are non-empty");

        assert_eq!(outcome.completed, 0);
        assert!(matches!(
            outcome.failures[0].error,
            ShardError::ReportParse { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn no_targets_means_no_submissions() {
        let lab = FakeLab::new();
        let client = MatrixClient::new(lab);

        let error = execute_run(&client, &args(3), &[], &TimingIndex::new(), CancelSignal::never())
            .await
            .expect_err("empty target list");
        assert_eq!(error, NoTestsFound);
        assert!(client.lab().created_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_run_cancels_active_jobs_and_keeps_finished_reports() {
        // Shard 0 finishes well before the handle fires; shard 1 would
        // keep running forever without a cancel.
        let lab = FakeLab::new();
        lab.plan_create("a/a", finishing_plan("alpha", "one"));
        lab.plan_create(
            "b/b",
            PlannedCreate {
                error: None,
                polls: vec![Ok(MatrixState::Running); 500],
                report_xml: None,
            },
        );
        let client = MatrixClient::new(lab);
        let targets = vec!["a/a".to_owned(), "b/b".to_owned()];

        let (handle, signal) = cancellation();
        let args = args(2);
        let timings = TimingIndex::new();
        let run = execute_run(&client, &args, &targets, &timings, signal);
        let fire = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            handle.cancel();
        };
        let (outcome, ()) = tokio::join!(run, fire);
        let outcome = outcome.expect("targets are non-empty");

        assert!(!outcome.is_complete());
        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.report.tests, 1);
        assert_eq!(outcome.report.suites[0].name, "alpha");

        // The running matrix was cancelled remotely; the finished one was
        // left alone.
        assert_eq!(outcome.failures.len(), 1);
        let ShardError::Cancelled { matrix_id } = &outcome.failures[0].error else {
            panic!("expected a cancelled shard, got {:?}", outcome.failures[0]);
        };
        assert_eq!(client.lab().cancel_attempts(matrix_id), 1);
        assert!(client.lab().is_cancelled(matrix_id));
        let total_cancels: usize = ["matrix-0", "matrix-1"]
            .iter()
            .map(|id| client.lab().cancel_attempts(&MatrixId::new(*id)))
            .sum();
        assert_eq!(total_cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_never_signal_lets_a_run_finish_untouched() {
        let lab = FakeLab::new();
        lab.plan_create("a/a", finishing_plan("alpha", "one"));
        let client = MatrixClient::new(lab);
        let targets = vec!["a/a".to_owned()];

        let outcome = execute_run(
            &client,
            &args(1),
            &targets,
            &TimingIndex::new(),
            CancelSignal::never(),
        )
        .await
        .expect("targets are non-empty");

        assert!(outcome.is_complete());
        assert_eq!(client.lab().cancel_attempts(&MatrixId::new("matrix-0")), 0);
    }
}
