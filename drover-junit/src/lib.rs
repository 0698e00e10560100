// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! JUnit XML support for [drover](https://crates.io/crates/drover-runner).
//!
//! Remote device labs hand back one JUnit XML document per job. This crate
//! models those documents, reads and writes them, and merges a new report
//! with a previous run's report so per-test timing survives across runs.

mod errors;
mod merge;
mod read;
mod report;
mod write;

pub use errors::*;
pub use merge::*;
pub use read::*;
pub use report::*;
