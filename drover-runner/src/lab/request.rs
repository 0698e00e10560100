// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{EnvironmentMatrix, MatrixArgs},
    lab::StoragePath,
    shard::Shard,
};
use std::time::Duration;
use uuid::Uuid;

/// The client name sent with every matrix creation request.
pub const CLIENT_NAME: &str = "drover";

/// Everything the service needs to run one shard as one matrix.
#[derive(Clone, Debug)]
pub struct MatrixCreateRequest {
    /// The name this client identifies itself as.
    pub client_name: &'static str,

    /// The application-under-test artifact.
    pub app: StoragePath,

    /// The test-binary artifact.
    pub test_binary: StoragePath,

    /// The targets this matrix is restricted to: the shard's assignment.
    pub test_targets: Vec<String>,

    /// The device/OS matrix to run against.
    pub environment: EnvironmentMatrix,

    /// Where the service should write results. Unique per submission.
    pub results_storage: StoragePath,

    /// The lab-side history stream to file results under, if any.
    pub results_history_name: Option<String>,

    /// How long the job may run before the service times it out.
    pub timeout: Duration,

    /// Record video of each device.
    pub record_video: bool,

    /// Collect performance metrics.
    pub performance_metrics: bool,

    /// Run under the platform's test orchestrator.
    pub use_orchestrator: bool,

    /// How many times the service may re-run a flaky test.
    pub flaky_test_attempts: u32,
}

impl MatrixCreateRequest {
    /// Builds the creation request for one shard.
    ///
    /// `run_path` groups all of a run's matrices under one storage prefix;
    /// a fresh object name under it keeps each submission's results
    /// destination unique.
    pub fn for_shard(shard: &Shard, args: &impl MatrixArgs, run_path: &str) -> Self {
        let results_storage = StoragePath::new(args.results_bucket())
            .join(run_path)
            .join(&unique_object_name());

        Self {
            client_name: CLIENT_NAME,
            app: args.app().clone(),
            test_binary: args.test_binary().clone(),
            test_targets: shard.targets.clone(),
            environment: args.environment(),
            results_storage,
            results_history_name: args.results_history_name().map(str::to_owned),
            timeout: args.test_timeout(),
            record_video: args.record_video(),
            performance_metrics: args.performance_metrics(),
            use_orchestrator: args.use_orchestrator(),
            flaky_test_attempts: args.flaky_test_attempts(),
        }
    }
}

fn unique_object_name() -> String {
    Uuid::new_v4().to_string()
}
