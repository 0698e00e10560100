// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while reading JUnit reports.

use quick_xml::events::attributes::AttrError;
use thiserror::Error;

/// An error that occurred while parsing a JUnit XML report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportParseError {
    /// The underlying XML was malformed.
    #[error("error reading XML")]
    Xml(#[from] quick_xml::Error),

    /// An attribute was malformed.
    #[error("malformed XML attribute")]
    Attr(#[from] AttrError),

    /// An attribute key was not valid UTF-8.
    #[error("attribute key is not valid UTF-8")]
    NonUtf8Key(#[from] std::str::Utf8Error),

    /// The document root was not `<testsuites>` or `<testsuite>`.
    #[error("unexpected root element `<{element}>`")]
    UnexpectedRoot {
        /// The name of the element that was encountered.
        element: String,
    },

    /// The document contained no root element at all.
    #[error("no root element found")]
    EmptyDocument,

    /// The document ended before the root element was closed.
    #[error("unexpected end of document")]
    UnexpectedEof,
}
