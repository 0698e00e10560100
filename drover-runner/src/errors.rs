// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by drover.

use crate::lab::{MatrixId, MatrixState};
use std::time::Duration;
use thiserror::Error;

/// The caller supplied zero test targets to shard.
///
/// Surfaced immediately, before anything is submitted to the device lab.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("there are no tests to run")]
pub struct NoTestsFound;

/// An error returned by (or on the way to) the remote device lab.
///
/// How a lab implementation maps its transport onto these variants is its
/// own business; drover only distinguishes errors by *when* they happen,
/// not by their shape.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum LabServiceError {
    /// The service answered with an error response.
    #[error("device lab returned HTTP {status}: {message}")]
    Service {
        /// The HTTP status code of the response.
        status: u16,
        /// The error message carried by the response.
        message: String,
    },

    /// The service could not be reached at all.
    #[error("could not reach device lab: {message}")]
    Transport {
        /// A description of the transport failure.
        message: String,
    },
}

/// The device lab rejected or could not be reached for job submission.
///
/// Creation failures are not retried: they tend to indicate a configuration
/// problem worth surfacing immediately, not a transient blip. The run
/// proceeds with the remaining shards.
#[derive(Debug, Error)]
#[error("failed to create matrix for shard {shard_index}")]
pub struct JobCreationError {
    /// The index of the shard whose submission failed.
    pub shard_index: usize,
    /// The underlying service error.
    #[source]
    pub source: LabServiceError,
}

/// Polling a matrix kept failing for longer than the retry budget.
#[derive(Clone, Debug, Error)]
#[error("failed to refresh matrix `{matrix_id}` after {}s of retries", waited.as_secs())]
pub struct RefreshTimeoutError {
    /// The matrix that could not be refreshed.
    pub matrix_id: MatrixId,
    /// Accumulated failed-attempt time when drover gave up.
    pub waited: Duration,
}

/// Why one shard's lifecycle failed. Never aborts sibling shards.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShardError {
    /// Submission failed; the shard contributed no report.
    #[error(transparent)]
    Creation(#[from] JobCreationError),

    /// The transient-error retry budget was exhausted while polling.
    #[error(transparent)]
    RefreshTimeout(#[from] RefreshTimeoutError),

    /// The matrix reached a terminal state other than `Finished`.
    #[error("matrix `{matrix_id}` ended in state {state:?}")]
    Infrastructure {
        /// The matrix that failed.
        matrix_id: MatrixId,
        /// The terminal state it ended in.
        state: MatrixState,
    },

    /// The matrix was cancelled before it produced a report.
    #[error("matrix `{matrix_id}` was cancelled")]
    Cancelled {
        /// The cancelled matrix.
        matrix_id: MatrixId,
    },

    /// The matrix finished but reported no results location.
    #[error("matrix `{matrix_id}` finished without a results location")]
    MissingResults {
        /// The matrix in question.
        matrix_id: MatrixId,
    },

    /// The finished matrix's report could not be downloaded.
    #[error("failed to download the report for matrix `{matrix_id}`")]
    ReportFetch {
        /// The matrix whose report was unavailable.
        matrix_id: MatrixId,
        /// The underlying service error.
        #[source]
        source: LabServiceError,
    },

    /// The downloaded report was not valid JUnit XML.
    #[error("failed to parse the report for matrix `{matrix_id}`")]
    ReportParse {
        /// The matrix whose report was malformed.
        matrix_id: MatrixId,
        /// The underlying parse error.
        #[source]
        source: drover_junit::ReportParseError,
    },
}
