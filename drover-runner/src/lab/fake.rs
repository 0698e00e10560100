// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A scripted in-memory device lab for tests.
//!
//! Matrices are either registered directly with a poll script
//! ([`FakeLab::register_matrix`]) or planned against an incoming creation
//! request, keyed by the request's first test target
//! ([`FakeLab::plan_create`]) so scripts stay deterministic whatever order
//! shards are submitted in.

use crate::{
    errors::LabServiceError,
    lab::{DeviceLab, MatrixCreateRequest, MatrixId, MatrixState, MatrixStatus, StoragePath},
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

#[derive(Default)]
pub(crate) struct FakeLab {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    matrices: HashMap<String, MatrixScript>,
    planned: HashMap<String, PlannedCreate>,
    reports: HashMap<String, String>,
    next_matrix: usize,
    cancel_failures_remaining: usize,
    cancel_attempts: HashMap<String, usize>,
    created: Vec<MatrixCreateRequest>,
}

struct MatrixScript {
    polls: VecDeque<Result<MatrixState, LabServiceError>>,
    fail_forever: bool,
    last: MatrixState,
    has_report: bool,
    cancelled: bool,
}

pub(crate) struct PlannedCreate {
    pub(crate) error: Option<LabServiceError>,
    pub(crate) polls: Vec<Result<MatrixState, LabServiceError>>,
    pub(crate) report_xml: Option<String>,
}

impl FakeLab {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a matrix with a poll script. Once the script is
    /// exhausted, the last successful state repeats forever.
    pub(crate) fn register_matrix(
        &self,
        id: &str,
        polls: Vec<Result<MatrixState, LabServiceError>>,
        report_xml: Option<&str>,
    ) -> MatrixId {
        let mut inner = self.inner.lock().expect("fake lab lock");
        if let Some(xml) = report_xml {
            inner
                .reports
                .insert(results_path_for(id).as_str().to_owned(), xml.to_owned());
        }
        inner.matrices.insert(
            id.to_owned(),
            MatrixScript {
                polls: polls.into(),
                fail_forever: false,
                last: MatrixState::Created,
                has_report: report_xml.is_some(),
                cancelled: false,
            },
        );
        MatrixId::new(id)
    }

    /// Registers a matrix whose every poll fails.
    pub(crate) fn register_failing_matrix(&self, id: &str) -> MatrixId {
        let mut inner = self.inner.lock().expect("fake lab lock");
        inner.matrices.insert(
            id.to_owned(),
            MatrixScript {
                polls: VecDeque::new(),
                fail_forever: true,
                last: MatrixState::Created,
                has_report: false,
                cancelled: false,
            },
        );
        MatrixId::new(id)
    }

    /// Plans the outcome of a future creation request, matched by the
    /// request's first test target.
    pub(crate) fn plan_create(&self, first_target: &str, plan: PlannedCreate) {
        let mut inner = self.inner.lock().expect("fake lab lock");
        inner.planned.insert(first_target.to_owned(), plan);
    }

    /// Makes the next `count` cancellation attempts fail.
    pub(crate) fn fail_next_cancels(&self, count: usize) {
        self.inner.lock().expect("fake lab lock").cancel_failures_remaining = count;
    }

    pub(crate) fn cancel_attempts(&self, id: &MatrixId) -> usize {
        self.inner
            .lock()
            .expect("fake lab lock")
            .cancel_attempts
            .get(id.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn is_cancelled(&self, id: &MatrixId) -> bool {
        self.inner
            .lock()
            .expect("fake lab lock")
            .matrices
            .get(id.as_str())
            .is_some_and(|script| script.cancelled)
    }

    pub(crate) fn created_requests(&self) -> Vec<MatrixCreateRequest> {
        self.inner.lock().expect("fake lab lock").created.clone()
    }
}

impl DeviceLab for FakeLab {
    async fn create_matrix(
        &self,
        request: &MatrixCreateRequest,
    ) -> Result<MatrixStatus, LabServiceError> {
        let mut inner = self.inner.lock().expect("fake lab lock");
        inner.created.push(request.clone());

        let key = request
            .test_targets
            .first()
            .cloned()
            .unwrap_or_default();
        let plan = inner.planned.remove(&key).unwrap_or(PlannedCreate {
            error: None,
            polls: vec![Ok(MatrixState::Running), Ok(MatrixState::Finished)],
            report_xml: Some("<testsuites/>".to_owned()),
        });

        if let Some(error) = plan.error {
            return Err(error);
        }

        let id = format!("matrix-{}", inner.next_matrix);
        inner.next_matrix += 1;
        if let Some(xml) = &plan.report_xml {
            inner
                .reports
                .insert(results_path_for(&id).as_str().to_owned(), xml.clone());
        }
        inner.matrices.insert(
            id.clone(),
            MatrixScript {
                has_report: plan.report_xml.is_some(),
                polls: plan.polls.into(),
                fail_forever: false,
                last: MatrixState::Created,
                cancelled: false,
            },
        );

        Ok(MatrixStatus {
            id: MatrixId::new(&id),
            state: MatrixState::Created,
            results: None,
            detail: None,
        })
    }

    async fn get_matrix(&self, id: &MatrixId) -> Result<MatrixStatus, LabServiceError> {
        let mut inner = self.inner.lock().expect("fake lab lock");
        let Some(script) = inner.matrices.get_mut(id.as_str()) else {
            return Err(LabServiceError::Service {
                status: 404,
                message: format!("no such matrix `{id}`"),
            });
        };

        if script.fail_forever {
            return Err(LabServiceError::Service {
                status: 500,
                message: "Internal error encountered.".to_owned(),
            });
        }

        let state = match script.polls.pop_front() {
            Some(Ok(state)) => {
                script.last = state;
                state
            }
            Some(Err(error)) => return Err(error),
            // Script exhausted: the last observed state is sticky.
            None => script.last,
        };

        let results = (state == MatrixState::Finished && script.has_report)
            .then(|| results_path_for(id.as_str()));
        Ok(MatrixStatus {
            id: id.clone(),
            state,
            results,
            detail: None,
        })
    }

    async fn cancel_matrix(&self, id: &MatrixId) -> Result<(), LabServiceError> {
        let mut inner = self.inner.lock().expect("fake lab lock");
        *inner.cancel_attempts.entry(id.as_str().to_owned()).or_insert(0) += 1;

        if inner.cancel_failures_remaining > 0 {
            inner.cancel_failures_remaining -= 1;
            return Err(LabServiceError::Service {
                status: 500,
                message: "Internal error encountered.".to_owned(),
            });
        }

        if let Some(script) = inner.matrices.get_mut(id.as_str()) {
            script.cancelled = true;
            script.polls.clear();
            script.last = MatrixState::Cancelled;
        }
        Ok(())
    }

    async fn fetch_report_xml(&self, results: &StoragePath) -> Result<String, LabServiceError> {
        let inner = self.inner.lock().expect("fake lab lock");
        inner
            .reports
            .get(results.as_str())
            .cloned()
            .ok_or_else(|| LabServiceError::Transport {
                message: format!("no report at `{results}`"),
            })
    }
}

fn results_path_for(id: &str) -> StoragePath {
    StoragePath::new(format!("fake://results/{id}"))
}
