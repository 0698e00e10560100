// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The remote device lab: job creation, polling, and cancellation.
//!
//! The transport to the real service is an external concern; drover talks
//! to it through the [`DeviceLab`] trait and owns only the lifecycle
//! policy ([`MatrixClient`]): no retry on creation, blind bounded retry on
//! refresh, best-effort cancellation.

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod request;

pub use client::*;
pub use request::*;

use crate::errors::LabServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque cloud-storage location, e.g. `gs://bucket/path`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoragePath(String);

impl StoragePath {
    /// Creates a storage path from its string form.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends a segment, inserting a `/` separator.
    pub fn join(&self, segment: &str) -> StoragePath {
        StoragePath(format!("{}/{}", self.0.trim_end_matches('/'), segment))
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoragePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// The identifier the remote service issues for one test matrix.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatrixId(String);

impl MatrixId {
    /// Wraps a service-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The state of a test matrix as reported by the service.
///
/// Transitions are observed only through polling, never inferred locally:
/// `Created → (Validating → Pending →) Running → {Finished, Cancelled,
/// Error, Invalid}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MatrixState {
    /// The matrix was accepted by the service.
    Created,
    /// The service is validating the request's artifacts.
    Validating,
    /// Devices are being provisioned.
    Pending,
    /// Tests are executing.
    Running,
    /// All tests ran; a report is available.
    Finished,
    /// The matrix was cancelled before finishing.
    Cancelled,
    /// Test infrastructure failed mid-run.
    Error,
    /// The service deemed the request invalid after accepting it.
    Invalid,
}

impl MatrixState {
    /// Returns true for states no further transition leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatrixState::Finished
                | MatrixState::Cancelled
                | MatrixState::Error
                | MatrixState::Invalid
        )
    }
}

/// One poll's view of a matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct MatrixStatus {
    /// The matrix this status describes.
    pub id: MatrixId,

    /// The reported state.
    pub state: MatrixState,

    /// Where the JUnit report was written, once `Finished`.
    pub results: Option<StoragePath>,

    /// A human-readable detail string, if the service attached one.
    pub detail: Option<String>,
}

/// One remote job: a submitted shard and the state observed for it so far.
///
/// A job never outlives the run that submitted it.
#[derive(Clone, Debug)]
pub struct RemoteJob {
    /// The service-issued matrix identifier.
    pub id: MatrixId,

    /// The index of the shard this job runs.
    pub shard_index: usize,

    /// The most recently observed state.
    pub state: MatrixState,

    /// The most recently observed full status payload.
    pub last_status: MatrixStatus,
}

/// The remote test-execution service, reduced to the four calls drover
/// makes. Implementations supply transport and authentication.
#[allow(async_fn_in_trait)] // consumed generically, never as dyn
pub trait DeviceLab {
    /// Submits a matrix for execution.
    async fn create_matrix(
        &self,
        request: &MatrixCreateRequest,
    ) -> Result<MatrixStatus, LabServiceError>;

    /// Polls a matrix's current status.
    async fn get_matrix(&self, id: &MatrixId) -> Result<MatrixStatus, LabServiceError>;

    /// Requests cancellation of a matrix.
    async fn cancel_matrix(&self, id: &MatrixId) -> Result<(), LabServiceError>;

    /// Downloads the JUnit XML a finished matrix produced.
    async fn fetch_report_xml(&self, results: &StoragePath) -> Result<String, LabServiceError>;
}
