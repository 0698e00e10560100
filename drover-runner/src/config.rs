// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run configuration.
//!
//! The core depends only on the [`MatrixArgs`] trait; the platform-specific
//! argument sets are tagged structs satisfying it. Configuration files
//! deserialize into [`PlatformArgs`].

use crate::{lab::StoragePath, shard::ShardLimit};
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The configuration surface the sharding engine and orchestrator consume.
///
/// Implementations are per-platform; the core never depends on a concrete
/// variant.
pub trait MatrixArgs {
    /// The configured shard ceiling.
    fn test_shards(&self) -> ShardLimit;

    /// The per-shard time budget, if shard count should be derived from it.
    fn shard_time(&self) -> Option<Duration>;

    /// How long the lab may run one job before timing it out.
    fn test_timeout(&self) -> Duration;

    /// The storage bucket run results are written under.
    fn results_bucket(&self) -> &str;

    /// The lab-side history stream results are filed under, if any.
    fn results_history_name(&self) -> Option<&str>;

    /// Whether the lab should record video of each device.
    fn record_video(&self) -> bool;

    /// Whether the lab should collect performance metrics.
    fn performance_metrics(&self) -> bool;

    /// Whether to run tests under the platform's test orchestrator.
    fn use_orchestrator(&self) -> bool;

    /// How many times the lab may re-run a flaky test.
    fn flaky_test_attempts(&self) -> u32;

    /// Targets prepended to every shard regardless of balancing.
    fn test_targets_always_run(&self) -> &[String];

    /// Local path of the previous run's timing report, if one is kept.
    fn timing_report_path(&self) -> Option<&Utf8Path>;

    /// The application-under-test artifact.
    fn app(&self) -> &StoragePath;

    /// The test-binary artifact.
    fn test_binary(&self) -> &StoragePath;

    /// The device/OS matrix jobs run against.
    fn environment(&self) -> EnvironmentMatrix;
}

/// The device/OS-version matrix a job runs against.
#[derive(Clone, Debug, PartialEq)]
pub enum EnvironmentMatrix {
    /// Android devices.
    Android(Vec<AndroidDevice>),
    /// iOS devices.
    Ios(Vec<IosDevice>),
}

/// One Android device configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AndroidDevice {
    /// The device model identifier, e.g. `Pixel2`.
    pub model: String,
    /// The Android API level to run on.
    pub version: String,
    /// The device locale.
    #[serde(default = "default_locale")]
    pub locale: String,
    /// The screen orientation.
    #[serde(default = "default_orientation")]
    pub orientation: String,
}

/// One iOS device configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IosDevice {
    /// The device model identifier, e.g. `iphone8`.
    pub model: String,
    /// The iOS version to run on.
    pub version: String,
    /// The device locale.
    #[serde(default = "default_locale")]
    pub locale: String,
    /// The screen orientation.
    #[serde(default = "default_orientation")]
    pub orientation: String,
}

/// Arguments for an Android instrumentation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AndroidArgs {
    /// Storage location of the application APK.
    pub app: StoragePath,
    /// Storage location of the test APK.
    pub test: StoragePath,
    /// Shard ceiling; zero or negative means unlimited.
    #[serde(default = "default_test_shards")]
    pub test_shards: i64,
    /// Per-shard time budget in seconds; absent disables time-based counts.
    #[serde(default)]
    pub shard_time_secs: Option<u64>,
    /// Per-job timeout in seconds.
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    /// The storage bucket run results are written under.
    pub results_bucket: String,
    /// Lab-side results history stream.
    #[serde(default)]
    pub results_history_name: Option<String>,
    /// Record video of each device.
    #[serde(default)]
    pub record_video: bool,
    /// Collect performance metrics.
    #[serde(default)]
    pub performance_metrics: bool,
    /// Run under the Android test orchestrator.
    #[serde(default = "default_true")]
    pub use_orchestrator: bool,
    /// How many times the lab may re-run a flaky test.
    #[serde(default)]
    pub flaky_test_attempts: u32,
    /// Targets prepended to every shard.
    #[serde(default)]
    pub test_targets_always_run: Vec<String>,
    /// Local path of the previous run's timing report.
    #[serde(default)]
    pub timing_report_path: Option<Utf8PathBuf>,
    /// The devices to run on.
    pub devices: Vec<AndroidDevice>,
}

/// Arguments for an iOS XCUITest run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IosArgs {
    /// Storage location of the test bundle zip.
    pub app: StoragePath,
    /// Storage location of the xctestrun file.
    pub test: StoragePath,
    /// Shard ceiling; zero or negative means unlimited.
    #[serde(default = "default_test_shards")]
    pub test_shards: i64,
    /// Per-shard time budget in seconds; absent disables time-based counts.
    #[serde(default)]
    pub shard_time_secs: Option<u64>,
    /// Per-job timeout in seconds.
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    /// The storage bucket run results are written under.
    pub results_bucket: String,
    /// Lab-side results history stream.
    #[serde(default)]
    pub results_history_name: Option<String>,
    /// Record video of each device.
    #[serde(default)]
    pub record_video: bool,
    /// Collect performance metrics.
    #[serde(default)]
    pub performance_metrics: bool,
    /// How many times the lab may re-run a flaky test.
    #[serde(default)]
    pub flaky_test_attempts: u32,
    /// Targets prepended to every shard.
    #[serde(default)]
    pub test_targets_always_run: Vec<String>,
    /// Local path of the previous run's timing report.
    #[serde(default)]
    pub timing_report_path: Option<Utf8PathBuf>,
    /// The devices to run on.
    pub devices: Vec<IosDevice>,
}

impl MatrixArgs for AndroidArgs {
    fn test_shards(&self) -> ShardLimit {
        ShardLimit::from_count(self.test_shards)
    }

    fn shard_time(&self) -> Option<Duration> {
        self.shard_time_secs.map(Duration::from_secs)
    }

    fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    fn results_bucket(&self) -> &str {
        &self.results_bucket
    }

    fn results_history_name(&self) -> Option<&str> {
        self.results_history_name.as_deref()
    }

    fn record_video(&self) -> bool {
        self.record_video
    }

    fn performance_metrics(&self) -> bool {
        self.performance_metrics
    }

    fn use_orchestrator(&self) -> bool {
        self.use_orchestrator
    }

    fn flaky_test_attempts(&self) -> u32 {
        self.flaky_test_attempts
    }

    fn test_targets_always_run(&self) -> &[String] {
        &self.test_targets_always_run
    }

    fn timing_report_path(&self) -> Option<&Utf8Path> {
        self.timing_report_path.as_deref()
    }

    fn app(&self) -> &StoragePath {
        &self.app
    }

    fn test_binary(&self) -> &StoragePath {
        &self.test
    }

    fn environment(&self) -> EnvironmentMatrix {
        EnvironmentMatrix::Android(self.devices.clone())
    }
}

impl MatrixArgs for IosArgs {
    fn test_shards(&self) -> ShardLimit {
        ShardLimit::from_count(self.test_shards)
    }

    fn shard_time(&self) -> Option<Duration> {
        self.shard_time_secs.map(Duration::from_secs)
    }

    fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    fn results_bucket(&self) -> &str {
        &self.results_bucket
    }

    fn results_history_name(&self) -> Option<&str> {
        self.results_history_name.as_deref()
    }

    fn record_video(&self) -> bool {
        self.record_video
    }

    fn performance_metrics(&self) -> bool {
        self.performance_metrics
    }

    // There is no orchestrator on iOS.
    fn use_orchestrator(&self) -> bool {
        false
    }

    fn flaky_test_attempts(&self) -> u32 {
        self.flaky_test_attempts
    }

    fn test_targets_always_run(&self) -> &[String] {
        &self.test_targets_always_run
    }

    fn timing_report_path(&self) -> Option<&Utf8Path> {
        self.timing_report_path.as_deref()
    }

    fn app(&self) -> &StoragePath {
        &self.app
    }

    fn test_binary(&self) -> &StoragePath {
        &self.test
    }

    fn environment(&self) -> EnvironmentMatrix {
        EnvironmentMatrix::Ios(self.devices.clone())
    }
}

/// A platform-tagged argument set, as loaded from a configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "kebab-case")]
pub enum PlatformArgs {
    /// An Android instrumentation run.
    Android(AndroidArgs),
    /// An iOS XCUITest run.
    Ios(IosArgs),
}

impl MatrixArgs for PlatformArgs {
    fn test_shards(&self) -> ShardLimit {
        self.as_args().test_shards()
    }

    fn shard_time(&self) -> Option<Duration> {
        self.as_args().shard_time()
    }

    fn test_timeout(&self) -> Duration {
        self.as_args().test_timeout()
    }

    fn results_bucket(&self) -> &str {
        self.as_args().results_bucket()
    }

    fn results_history_name(&self) -> Option<&str> {
        self.as_args().results_history_name()
    }

    fn record_video(&self) -> bool {
        self.as_args().record_video()
    }

    fn performance_metrics(&self) -> bool {
        self.as_args().performance_metrics()
    }

    fn use_orchestrator(&self) -> bool {
        self.as_args().use_orchestrator()
    }

    fn flaky_test_attempts(&self) -> u32 {
        self.as_args().flaky_test_attempts()
    }

    fn test_targets_always_run(&self) -> &[String] {
        self.as_args().test_targets_always_run()
    }

    fn timing_report_path(&self) -> Option<&Utf8Path> {
        self.as_args().timing_report_path()
    }

    fn app(&self) -> &StoragePath {
        self.as_args().app()
    }

    fn test_binary(&self) -> &StoragePath {
        self.as_args().test_binary()
    }

    fn environment(&self) -> EnvironmentMatrix {
        self.as_args().environment()
    }
}

impl PlatformArgs {
    fn as_args(&self) -> &dyn MatrixArgs {
        match self {
            PlatformArgs::Android(args) => args,
            PlatformArgs::Ios(args) => args,
        }
    }
}

fn default_locale() -> String {
    "en".to_owned()
}

fn default_orientation() -> String {
    "portrait".to_owned()
}

fn default_test_shards() -> i64 {
    1
}

fn default_test_timeout_secs() -> u64 {
    // 15 minutes, the lab's customary default.
    15 * 60
}

fn default_true() -> bool {
    true
}
