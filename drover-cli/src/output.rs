// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use miette::{GraphicalTheme, MietteHandlerOpts};
use std::io::{self, IsTerminal};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "DROVER_VERBOSE")]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "DROVER_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    /// Installs the tracing subscriber and the miette hook. Called exactly
    /// once, before dispatch.
    pub(crate) fn init(self) {
        let OutputOpts { verbose, color } = self;
        let colorize = color.should_colorize();

        let default_level = if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .with_env_var("DROVER_LOG")
            .from_env_lossy();
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_ansi(colorize)
            .init();

        let _ = miette::set_hook(Box::new(move |_| {
            let theme = if colorize {
                GraphicalTheme::unicode()
            } else {
                GraphicalTheme::unicode_nocolor()
            };
            Box::new(MietteHandlerOpts::new().graphical_theme(theme).build())
        }));
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
#[must_use]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    fn should_colorize(self) -> bool {
        match self {
            Color::Auto => io::stderr().is_terminal(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}
