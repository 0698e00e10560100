// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The drover command-line interface.
//!
//! This crate is the `drover` binary: argument parsing, configuration
//! loading, and the offline subcommands (sharding and report merging). The
//! actual sharding and merging logic lives in `drover-runner` and
//! `drover-junit`.

#![warn(missing_docs)]

mod dispatch;
mod output;

pub use dispatch::DroverApp;
