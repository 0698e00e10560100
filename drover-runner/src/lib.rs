// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [drover](https://crates.io/crates/drover-cli).
//!
//! Drover splits a mobile UI test suite into balanced shards, submits each
//! shard as an asynchronous job to a remote device lab, polls every job to a
//! terminal state, and folds the resulting JUnit reports into one report for
//! the run. Per-test timing from a previous run's report weights the next
//! run's shard balancing.

pub mod config;
pub mod errors;
pub mod lab;
pub mod orchestrate;
pub mod shard;
mod time;
