// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use drover_cli::DroverApp;
use miette::Result;

fn main() -> Result<()> {
    let app = DroverApp::parse();
    app.exec()
}
