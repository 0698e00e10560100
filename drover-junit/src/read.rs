// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read JUnit XML into a `Report`.
//!
//! Device labs produce either a `<testsuites>` root or, for single-bundle
//! runs, a bare `<testsuite>` root; both are accepted. Attributes drover
//! doesn't interpret are kept verbatim in the `extra` maps so a
//! parse-merge-serialize cycle is lossless. Aggregate counts are recomputed
//! from the parsed cases rather than trusted from the document (some
//! services emit `-1` placeholders).

use crate::{Report, ReportParseError, TestCase, TestCaseStatus, TestSuite};
use chrono::DateTime;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
    name::QName,
};
use std::borrow::Cow;

/// Parses a JUnit XML document into a [`Report`].
pub fn parse_report(input: &str) -> Result<Report, ReportParseError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(root) => match root.name().as_ref() {
                b"testsuites" => return parse_testsuites(&mut reader, &root),
                b"testsuite" => {
                    let suite = parse_suite(&mut reader, &root)?;
                    let mut report = Report::new();
                    report.add_suite(suite);
                    return Ok(report);
                }
                other => {
                    return Err(ReportParseError::UnexpectedRoot {
                        element: String::from_utf8_lossy(other).into_owned(),
                    });
                }
            },
            Event::Empty(root) => match root.name().as_ref() {
                b"testsuites" => {
                    let mut report = Report::new();
                    apply_report_attrs(&mut report, &root)?;
                    return Ok(report);
                }
                b"testsuite" => {
                    let (suite, _) = suite_from_attrs(&root)?;
                    let mut report = Report::new();
                    report.add_suite(suite);
                    return Ok(report);
                }
                other => {
                    return Err(ReportParseError::UnexpectedRoot {
                        element: String::from_utf8_lossy(other).into_owned(),
                    });
                }
            },
            Event::Eof => return Err(ReportParseError::EmptyDocument),
            _ => {}
        }
    }
}

fn parse_testsuites(
    reader: &mut Reader<&[u8]>,
    root: &BytesStart<'_>,
) -> Result<Report, ReportParseError> {
    let mut report = Report::new();

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.name().as_ref() {
                b"testsuite" => {
                    let suite = parse_suite(reader, &element)?;
                    report.add_suite(suite);
                }
                _ => {
                    reader.read_to_end(element.name())?;
                }
            },
            Event::Empty(element) => {
                if element.name().as_ref() == b"testsuite" {
                    let (suite, _) = suite_from_attrs(&element)?;
                    report.add_suite(suite);
                }
            }
            Event::End(element) if element.name().as_ref() == b"testsuites" => break,
            Event::Eof => return Err(ReportParseError::UnexpectedEof),
            _ => {}
        }
    }

    apply_report_attrs(&mut report, root)?;
    Ok(report)
}

/// Applied after suites are parsed: the root element's own `time` wins over
/// the sum accumulated by `add_suite`.
fn apply_report_attrs(
    report: &mut Report,
    root: &BytesStart<'_>,
) -> Result<(), ReportParseError> {
    let mut time_attr = None;
    for_each_attr(root, |key, value| match key {
        "name" => report.name = Some(value.into_owned()),
        // An unparseable time is dropped; the computed sum takes its place.
        // Stashing it in `extra` would serialize a duplicate attribute.
        "time" => time_attr = parse_time(&value),
        "tests" | "failures" | "errors" | "skipped" | "disabled" => {}
        _ => {
            report.extra.insert(key.to_owned(), value.into_owned());
        }
    })?;
    if time_attr.is_some() {
        report.time = time_attr;
    }
    Ok(())
}

fn parse_suite(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<TestSuite, ReportParseError> {
    let (mut suite, time_attr) = suite_from_attrs(start)?;

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.name().as_ref() {
                b"testcase" => {
                    let test_case = parse_test_case(reader, &element)?;
                    suite.add_test_case(test_case);
                }
                _ => {
                    reader.read_to_end(element.name())?;
                }
            },
            Event::Empty(element) => {
                if element.name().as_ref() == b"testcase" {
                    suite.add_test_case(test_case_from_attrs(&element)?);
                }
            }
            Event::End(element) if element.name().as_ref() == b"testsuite" => break,
            Event::Eof => return Err(ReportParseError::UnexpectedEof),
            _ => {}
        }
    }

    if time_attr.is_some() {
        suite.time = time_attr;
    }
    Ok(suite)
}

fn suite_from_attrs(
    start: &BytesStart<'_>,
) -> Result<(TestSuite, Option<f64>), ReportParseError> {
    let mut suite = TestSuite::new("");
    let mut time_attr = None;
    for_each_attr(start, |key, value| match key {
        "name" => suite.name = value.into_owned(),
        "time" => time_attr = parse_time(&value),
        "timestamp" => match DateTime::parse_from_rfc3339(&value) {
            Ok(timestamp) => suite.timestamp = Some(timestamp),
            Err(_) => {
                suite.extra.insert(key.to_owned(), value.into_owned());
            }
        },
        "tests" | "failures" | "errors" | "skipped" | "disabled" => {}
        _ => {
            suite.extra.insert(key.to_owned(), value.into_owned());
        }
    })?;
    Ok((suite, time_attr))
}

fn parse_test_case(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<TestCase, ReportParseError> {
    let mut test_case = test_case_from_attrs(start)?;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                let kind = status_kind(element.name().as_ref());
                match kind {
                    Some(kind) if test_case.status.is_passed() => {
                        let (message, ty) = status_attrs(&element)?;
                        let description = read_text(reader, element.name())?;
                        test_case.status = build_status(kind, message, ty, description);
                    }
                    _ => {
                        reader.read_to_end(element.name())?;
                    }
                }
            }
            Event::Empty(element) => {
                if let Some(kind) = status_kind(element.name().as_ref())
                    && test_case.status.is_passed()
                {
                    let (message, ty) = status_attrs(&element)?;
                    test_case.status = build_status(kind, message, ty, None);
                }
            }
            Event::End(element) if element.name().as_ref() == b"testcase" => break,
            Event::Eof => return Err(ReportParseError::UnexpectedEof),
            _ => {}
        }
    }

    Ok(test_case)
}

fn test_case_from_attrs(start: &BytesStart<'_>) -> Result<TestCase, ReportParseError> {
    let mut test_case = TestCase::new("", "", TestCaseStatus::Passed);
    for_each_attr(start, |key, value| match key {
        "name" => test_case.name = value.into_owned(),
        "classname" => test_case.classname = value.into_owned(),
        "time" => test_case.time = parse_time(&value),
        _ => {
            test_case.extra.insert(key.to_owned(), value.into_owned());
        }
    })?;
    Ok(test_case)
}

#[derive(Clone, Copy)]
enum StatusKind {
    Failure,
    Error,
    Skipped,
}

fn status_kind(name: &[u8]) -> Option<StatusKind> {
    match name {
        b"failure" => Some(StatusKind::Failure),
        b"error" => Some(StatusKind::Error),
        b"skipped" => Some(StatusKind::Skipped),
        _ => None,
    }
}

fn status_attrs(
    element: &BytesStart<'_>,
) -> Result<(Option<String>, Option<String>), ReportParseError> {
    let mut message = None;
    let mut ty = None;
    for_each_attr(element, |key, value| match key {
        "message" => message = Some(value.into_owned()),
        "type" => ty = Some(value.into_owned()),
        _ => {}
    })?;
    Ok((message, ty))
}

fn build_status(
    kind: StatusKind,
    message: Option<String>,
    ty: Option<String>,
    description: Option<String>,
) -> TestCaseStatus {
    match kind {
        StatusKind::Failure => TestCaseStatus::Failed {
            message,
            ty,
            description,
        },
        StatusKind::Error => TestCaseStatus::Errored {
            message,
            ty,
            description,
        },
        StatusKind::Skipped => TestCaseStatus::Skipped {
            message,
            ty,
            description,
        },
    }
}

fn read_text(
    reader: &mut Reader<&[u8]>,
    end: QName<'_>,
) -> Result<Option<String>, ReportParseError> {
    let mut out = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(text) => out.push_str(&text.unescape()?),
            Event::CData(cdata) => out.push_str(&String::from_utf8_lossy(&cdata.into_inner())),
            Event::Start(element) => {
                reader.read_to_end(element.name())?;
            }
            Event::End(element) if element.name() == end => break,
            Event::Eof => return Err(ReportParseError::UnexpectedEof),
            _ => {}
        }
    }
    Ok((!out.is_empty()).then_some(out))
}

fn for_each_attr(
    element: &BytesStart<'_>,
    mut f: impl FnMut(&str, Cow<'_, str>),
) -> Result<(), ReportParseError> {
    for attr in element.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?;
        f(key, value);
    }
    Ok(())
}

/// Some producers emit thousands separators in time attributes.
fn parse_time(value: &str) -> Option<f64> {
    let cleaned = value.replace(',', "");
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|time| time.is_finite() && *time >= 0.0)
}
