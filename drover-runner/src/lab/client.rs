// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle policy for one matrix: create, poll to a terminal state,
//! cancel.

use crate::{
    errors::{JobCreationError, RefreshTimeoutError},
    lab::{DeviceLab, MatrixCreateRequest, MatrixId, MatrixStatus, RemoteJob},
};
use std::time::Duration;
use tokio::time::sleep;

/// How long to wait between failed refresh attempts.
pub const REFRESH_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The ceiling on accumulated failed-attempt time before a refresh gives
/// up. The service intermittently returns internal errors unrelated to the
/// job's real state, so individual failures mean nothing; an hour of
/// nothing but failures means the job is unreachable.
pub const REFRESH_RETRY_BUDGET: Duration = Duration::from_secs(60 * 60);

/// How long to wait between successful polls while a matrix is running.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// A handle to the device lab plus drover's lifecycle policy.
///
/// Constructed once at process start and passed by reference wherever the
/// lab is needed; there is no ambient global session.
#[derive(Clone, Debug)]
pub struct MatrixClient<L> {
    lab: L,
    poll_interval: Duration,
}

impl<L: DeviceLab> MatrixClient<L> {
    /// Creates a client over the given lab with the default poll interval.
    pub fn new(lab: L) -> Self {
        Self {
            lab,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the interval between successful polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns the underlying lab.
    pub fn lab(&self) -> &L {
        &self.lab
    }

    /// Submits one shard's matrix.
    ///
    /// Creation is never retried: a rejected submission points at a
    /// configuration problem, not a transient blip, and should surface
    /// immediately.
    pub async fn create(
        &self,
        shard_index: usize,
        request: &MatrixCreateRequest,
    ) -> Result<RemoteJob, JobCreationError> {
        let status = self
            .lab
            .create_matrix(request)
            .await
            .map_err(|source| JobCreationError {
                shard_index,
                source,
            })?;
        tracing::info!(
            matrix_id = %status.id,
            shard_index,
            targets = request.test_targets.len(),
            "matrix created"
        );
        Ok(RemoteJob {
            id: status.id.clone(),
            shard_index,
            state: status.state,
            last_status: status,
        })
    }

    /// Polls a matrix once, riding out transient service errors.
    ///
    /// Any successful response short-circuits immediately, whatever state
    /// it reports. On an error the client sleeps [`REFRESH_RETRY_INTERVAL`]
    /// and tries again, accumulating failed-attempt time, until
    /// [`REFRESH_RETRY_BUDGET`] is exceeded.
    pub async fn refresh(&self, id: &MatrixId) -> Result<MatrixStatus, RefreshTimeoutError> {
        let mut waited = Duration::ZERO;
        loop {
            match self.lab.get_matrix(id).await {
                Ok(status) => return Ok(status),
                Err(error) => {
                    if waited >= REFRESH_RETRY_BUDGET {
                        return Err(RefreshTimeoutError {
                            matrix_id: id.clone(),
                            waited,
                        });
                    }
                    tracing::debug!(matrix_id = %id, %error, "matrix refresh failed, retrying");
                    sleep(REFRESH_RETRY_INTERVAL).await;
                    waited += REFRESH_RETRY_INTERVAL;
                }
            }
        }
    }

    /// Polls a job until the service reports a terminal state, updating the
    /// job's observed state along the way.
    pub async fn wait_for_terminal(
        &self,
        job: &mut RemoteJob,
    ) -> Result<MatrixStatus, RefreshTimeoutError> {
        loop {
            let status = self.refresh(&job.id).await?;
            job.state = status.state;
            job.last_status = status.clone();
            if status.state.is_terminal() {
                tracing::info!(matrix_id = %job.id, state = ?status.state, "matrix reached a terminal state");
                return Ok(status);
            }
            tracing::debug!(matrix_id = %job.id, state = ?status.state, "matrix not finished yet");
            sleep(self.poll_interval).await;
        }
    }

    /// Requests cancellation, best-effort.
    ///
    /// One attempt plus exactly one retry; a second failure is logged and
    /// swallowed. Cancellation is not guaranteed and the caller must not
    /// block on it.
    pub async fn cancel(&self, id: &MatrixId) {
        if let Err(first) = self.lab.cancel_matrix(id).await {
            tracing::debug!(matrix_id = %id, error = %first, "matrix cancellation failed, retrying once");
            if let Err(second) = self.lab.cancel_matrix(id).await {
                tracing::warn!(matrix_id = %id, error = %second, "matrix cancellation failed twice, giving up");
            }
        }
    }

    /// Downloads the JUnit XML a finished matrix produced.
    pub(crate) async fn fetch_report_xml(
        &self,
        results: &crate::lab::StoragePath,
    ) -> Result<String, crate::errors::LabServiceError> {
        self.lab.fetch_report_xml(results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::MatrixState;
    use crate::lab::fake::FakeLab;

    fn service_error() -> crate::errors::LabServiceError {
        crate::errors::LabServiceError::Service {
            status: 503,
            message: "The service is currently unavailable.".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_recovers_from_transient_errors() {
        let lab = FakeLab::new();
        let id = lab.register_matrix(
            "m-0",
            vec![
                Err(service_error()),
                Err(service_error()),
                Err(service_error()),
                Ok(MatrixState::Running),
            ],
            None,
        );
        let client = MatrixClient::new(lab);

        let status = client.refresh(&id).await.expect("refresh succeeds");
        assert_eq!(status.state, MatrixState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_gives_up_after_the_retry_budget() {
        // The script never yields a success; every poll past the scripted
        // entries keeps failing.
        let lab = FakeLab::new();
        let id = lab.register_failing_matrix("m-0");
        let client = MatrixClient::new(lab);

        let err = client.refresh(&id).await.expect_err("refresh times out");
        assert_eq!(err.matrix_id, id);
        assert!(err.waited >= REFRESH_RETRY_BUDGET);
    }

    #[tokio::test(start_paused = true)]
    async fn a_success_resets_nothing_but_short_circuits() {
        // 3599 seconds of failures stay under the one-hour ceiling; the
        // success that follows must be returned, not discarded.
        let mut script: Vec<Result<MatrixState, _>> = Vec::new();
        for _ in 0..3599 {
            script.push(Err(service_error()));
        }
        script.push(Ok(MatrixState::Finished));

        let lab = FakeLab::new();
        let id = lab.register_matrix("m-0", script, Some("<testsuites/>"));
        let client = MatrixClient::new(lab);

        let status = client.refresh(&id).await.expect("refresh succeeds");
        assert_eq!(status.state, MatrixState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_terminal_updates_the_job() {
        let lab = FakeLab::new();
        let id = lab.register_matrix(
            "m-7",
            vec![
                Ok(MatrixState::Validating),
                Ok(MatrixState::Running),
                Err(service_error()),
                Ok(MatrixState::Running),
                Ok(MatrixState::Finished),
            ],
            Some("<testsuites/>"),
        );
        let client = MatrixClient::new(lab);

        let mut job = RemoteJob {
            id: id.clone(),
            shard_index: 0,
            state: MatrixState::Created,
            last_status: MatrixStatus {
                id: id.clone(),
                state: MatrixState::Created,
                results: None,
                detail: None,
            },
        };

        let status = client
            .wait_for_terminal(&mut job)
            .await
            .expect("job finishes");
        assert_eq!(status.state, MatrixState::Finished);
        assert_eq!(job.state, MatrixState::Finished);
        assert!(status.results.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn a_cancelled_matrix_terminates_the_poll_loop() {
        // The script alone would keep the matrix running; the cancel makes
        // the next poll report the terminal state instead.
        let lab = FakeLab::new();
        let id = lab.register_matrix(
            "m-3",
            vec![Ok(MatrixState::Running), Ok(MatrixState::Running)],
            None,
        );
        let client = MatrixClient::new(lab);
        client.cancel(&id).await;

        let mut job = RemoteJob {
            id: id.clone(),
            shard_index: 0,
            state: MatrixState::Running,
            last_status: MatrixStatus {
                id: id.clone(),
                state: MatrixState::Running,
                results: None,
                detail: None,
            },
        };

        let status = client
            .wait_for_terminal(&mut job)
            .await
            .expect("poll reaches a terminal state");
        assert_eq!(status.state, MatrixState::Cancelled);
        assert_eq!(job.state, MatrixState::Cancelled);
        assert!(client.lab().is_cancelled(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_retries_exactly_once_and_swallows_the_second_failure() {
        let lab = FakeLab::new();
        let id = lab.register_matrix("m-1", vec![Ok(MatrixState::Running)], None);
        lab.fail_next_cancels(2);
        let client = MatrixClient::new(lab);

        // Does not return an error even though both attempts failed.
        client.cancel(&id).await;
        assert_eq!(client.lab().cancel_attempts(&id), 2);
        assert!(!client.lab().is_cancelled(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_succeeds_on_the_retry() {
        let lab = FakeLab::new();
        let id = lab.register_matrix("m-2", vec![Ok(MatrixState::Running)], None);
        lab.fail_next_cancels(1);
        let client = MatrixClient::new(lab);

        client.cancel(&id).await;
        assert_eq!(client.lab().cancel_attempts(&id), 2);
        assert!(client.lab().is_cancelled(&id));
    }
}
