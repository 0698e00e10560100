// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialize a `Report` as JUnit XML.

use crate::{Report, TestCase, TestCaseStatus, TestSuite};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::io;

static TESTSUITES_TAG: &str = "testsuites";
static TESTSUITE_TAG: &str = "testsuite";
static TESTCASE_TAG: &str = "testcase";
static FAILURE_TAG: &str = "failure";
static ERROR_TAG: &str = "error";
static SKIPPED_TAG: &str = "skipped";

pub(crate) fn serialize_report(report: &Report, writer: impl io::Write) -> io::Result<()> {
    let mut writer = Writer::new_with_indent(writer, b' ', 4);

    let decl = BytesDecl::new("1.0", Some("UTF-8"), None);
    writer.write_event(Event::Decl(decl))?;

    serialize_report_impl(report, &mut writer)?;

    // Trailing newline.
    writer.into_inner().write_all(b"\n")
}

fn serialize_report_impl(report: &Report, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    // Destructure so new fields can't be forgotten here.
    let Report {
        name,
        time,
        tests,
        failures,
        errors,
        skipped,
        suites,
        extra,
    } = report;

    let mut testsuites_tag = BytesStart::new(TESTSUITES_TAG);
    if let Some(name) = name {
        testsuites_tag.push_attribute(("name", name.as_str()));
    }
    testsuites_tag.extend_attributes([
        ("tests", tests.to_string().as_str()),
        ("failures", failures.to_string().as_str()),
        ("errors", errors.to_string().as_str()),
        ("skipped", skipped.to_string().as_str()),
    ]);
    if let Some(time) = time {
        testsuites_tag.push_attribute(("time", serialize_time(*time).as_str()));
    }
    for (k, v) in extra {
        testsuites_tag.push_attribute((k.as_str(), v.as_str()));
    }
    writer.write_event(Event::Start(testsuites_tag))?;

    for suite in suites {
        serialize_suite(suite, writer)?;
    }

    serialize_end_tag(TESTSUITES_TAG, writer)
}

fn serialize_suite(suite: &TestSuite, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    let TestSuite {
        name,
        tests,
        failures,
        errors,
        skipped,
        time,
        timestamp,
        test_cases,
        extra,
    } = suite;

    let mut suite_tag = BytesStart::new(TESTSUITE_TAG);
    suite_tag.extend_attributes([
        ("name", name.as_str()),
        ("tests", tests.to_string().as_str()),
        ("failures", failures.to_string().as_str()),
        ("errors", errors.to_string().as_str()),
        ("skipped", skipped.to_string().as_str()),
    ]);
    if let Some(time) = time {
        suite_tag.push_attribute(("time", serialize_time(*time).as_str()));
    }
    if let Some(timestamp) = timestamp {
        suite_tag.push_attribute(("timestamp", format!("{}", timestamp.format("%+")).as_str()));
    }
    for (k, v) in extra {
        suite_tag.push_attribute((k.as_str(), v.as_str()));
    }
    writer.write_event(Event::Start(suite_tag))?;

    for test_case in test_cases {
        serialize_test_case(test_case, writer)?;
    }

    serialize_end_tag(TESTSUITE_TAG, writer)
}

fn serialize_test_case(
    test_case: &TestCase,
    writer: &mut Writer<impl io::Write>,
) -> io::Result<()> {
    let TestCase {
        name,
        classname,
        time,
        status,
        extra,
    } = test_case;

    let mut case_tag = BytesStart::new(TESTCASE_TAG);
    case_tag.extend_attributes([("name", name.as_str()), ("classname", classname.as_str())]);
    if let Some(time) = time {
        case_tag.push_attribute(("time", serialize_time(*time).as_str()));
    }
    for (k, v) in extra {
        case_tag.push_attribute((k.as_str(), v.as_str()));
    }

    if status.is_passed() {
        writer.write_event(Event::Empty(case_tag))?;
        return Ok(());
    }

    writer.write_event(Event::Start(case_tag))?;

    match status {
        TestCaseStatus::Passed => {}
        TestCaseStatus::Failed {
            message,
            ty,
            description,
        } => serialize_status(
            message.as_deref(),
            ty.as_deref(),
            description.as_deref(),
            FAILURE_TAG,
            writer,
        )?,
        TestCaseStatus::Errored {
            message,
            ty,
            description,
        } => serialize_status(
            message.as_deref(),
            ty.as_deref(),
            description.as_deref(),
            ERROR_TAG,
            writer,
        )?,
        TestCaseStatus::Skipped {
            message,
            ty,
            description,
        } => serialize_status(
            message.as_deref(),
            ty.as_deref(),
            description.as_deref(),
            SKIPPED_TAG,
            writer,
        )?,
    }

    serialize_end_tag(TESTCASE_TAG, writer)
}

fn serialize_status(
    message: Option<&str>,
    ty: Option<&str>,
    description: Option<&str>,
    tag_name: &'static str,
    writer: &mut Writer<impl io::Write>,
) -> io::Result<()> {
    let mut tag = BytesStart::new(tag_name);
    if let Some(message) = message {
        tag.push_attribute(("message", message));
    }
    if let Some(ty) = ty {
        tag.push_attribute(("type", ty));
    }

    match description {
        Some(description) => {
            writer.write_event(Event::Start(tag))?;
            writer.write_event(Event::Text(BytesText::new(description)))?;
            serialize_end_tag(tag_name, writer)
        }
        None => writer.write_event(Event::Empty(tag)),
    }
}

fn serialize_end_tag(tag_name: &str, writer: &mut Writer<impl io::Write>) -> io::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(tag_name)))
}

fn serialize_time(time: f64) -> String {
    format!("{time:.3}")
}
