// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::write::serialize_report;
use chrono::{DateTime, FixedOffset};
use indexmap::map::IndexMap;
use std::io;

/// The root element of a JUnit report: an ordered collection of test suites.
///
/// Suite names are expected to be unique within a report; merge operations
/// match suites by name.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    /// The name of this report, if the producing service set one.
    pub name: Option<String>,

    /// The overall time taken by the run, in seconds.
    pub time: Option<f64>,

    /// The total number of tests from all suites.
    pub tests: usize,

    /// The total number of failures from all suites.
    pub failures: usize,

    /// The total number of errors from all suites.
    pub errors: usize,

    /// The total number of skipped tests from all suites.
    pub skipped: usize,

    /// The test suites contained in this report.
    pub suites: Vec<TestSuite>,

    /// Attributes on the root element that drover doesn't interpret.
    ///
    /// Preserved verbatim so merge operations round-trip losslessly.
    pub extra: IndexMap<String, String>,
}

impl Report {
    /// Creates a new, empty `Report`.
    pub fn new() -> Self {
        Self {
            name: None,
            time: None,
            tests: 0,
            failures: 0,
            errors: 0,
            skipped: 0,
            suites: vec![],
            extra: IndexMap::new(),
        }
    }

    /// Adds a suite and updates the aggregate counts and time.
    ///
    /// When building a report, use this rather than pushing to `self.suites`
    /// directly.
    pub fn add_suite(&mut self, suite: TestSuite) -> &mut Self {
        self.tests += suite.tests;
        self.failures += suite.failures;
        self.errors += suite.errors;
        self.skipped += suite.skipped;
        if let Some(time) = suite.time {
            *self.time.get_or_insert(0.0) += time;
        }
        self.suites.push(suite);
        self
    }

    /// Adds several suites, updating the aggregate counts for each.
    pub fn add_suites(&mut self, suites: impl IntoIterator<Item = TestSuite>) -> &mut Self {
        for suite in suites {
            self.add_suite(suite);
        }
        self
    }

    /// Returns the suite with the given name, if present.
    pub fn suite(&self, name: &str) -> Option<&TestSuite> {
        self.suites.iter().find(|suite| suite.name == name)
    }

    /// Serializes this report as JUnit XML to the given writer.
    pub fn serialize(&self, writer: impl io::Write) -> io::Result<()> {
        serialize_report(self, writer)
    }

    /// Serializes this report as a JUnit XML string.
    pub fn to_xml_string(&self) -> io::Result<String> {
        let mut buf: Vec<u8> = vec![];
        self.serialize(&mut buf)?;
        String::from_utf8(buf).map_err(io::Error::other)
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

/// A single test suite: a named, ordered collection of test cases.
#[derive(Clone, Debug, PartialEq)]
pub struct TestSuite {
    /// The name of this suite, unique within a report.
    pub name: String,

    /// The total number of tests in this suite.
    pub tests: usize,

    /// The total number of failures in this suite.
    pub failures: usize,

    /// The total number of errors in this suite.
    pub errors: usize,

    /// The total number of skipped tests in this suite.
    pub skipped: usize,

    /// The overall time taken by the suite, in seconds.
    pub time: Option<f64>,

    /// The time at which the suite began execution.
    pub timestamp: Option<DateTime<FixedOffset>>,

    /// The test cases that form this suite.
    pub test_cases: Vec<TestCase>,

    /// Attributes on the suite element that drover doesn't interpret, such
    /// as "hostname" or "package". Preserved verbatim.
    pub extra: IndexMap<String, String>,
}

impl TestSuite {
    /// Creates a new, empty `TestSuite` with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: 0,
            failures: 0,
            errors: 0,
            skipped: 0,
            time: None,
            timestamp: None,
            test_cases: vec![],
            extra: IndexMap::new(),
        }
    }

    /// Sets the start timestamp for the suite.
    pub fn set_timestamp(&mut self, timestamp: impl Into<DateTime<FixedOffset>>) -> &mut Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Adds a test case and updates the counts and the suite time.
    ///
    /// When building a suite, use this rather than pushing to
    /// `self.test_cases` directly.
    pub fn add_test_case(&mut self, test_case: TestCase) -> &mut Self {
        self.tests += 1;
        match &test_case.status {
            TestCaseStatus::Passed => {}
            TestCaseStatus::Failed { .. } => self.failures += 1,
            TestCaseStatus::Errored { .. } => self.errors += 1,
            TestCaseStatus::Skipped { .. } => self.skipped += 1,
        }
        if let Some(time) = test_case.time {
            *self.time.get_or_insert(0.0) += time;
        }
        self.test_cases.push(test_case);
        self
    }

    /// Adds several test cases, updating the counts for each.
    pub fn add_test_cases(&mut self, test_cases: impl IntoIterator<Item = TestCase>) -> &mut Self {
        for test_case in test_cases {
            self.add_test_case(test_case);
        }
        self
    }

    /// Returns the test case with the given identifier, if present.
    pub fn test_case(&self, id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|case| case.id() == id)
    }
}

/// A single test case, immutable once parsed from a report.
#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    /// The method name of the test.
    pub name: String,

    /// The class name of the test. `classname` and `name` together identify
    /// a test within a report.
    pub classname: String,

    /// The time it took to execute this test, in seconds. Non-negative.
    pub time: Option<f64>,

    /// The outcome of this test.
    pub status: TestCaseStatus,

    /// Attributes on the case element that drover doesn't interpret.
    /// Preserved verbatim.
    pub extra: IndexMap<String, String>,
}

impl TestCase {
    /// Creates a new test case.
    pub fn new(
        classname: impl Into<String>,
        name: impl Into<String>,
        status: TestCaseStatus,
    ) -> Self {
        Self {
            name: name.into(),
            classname: classname.into(),
            time: None,
            status,
            extra: IndexMap::new(),
        }
    }

    /// Sets the time taken by this test case, in seconds.
    pub fn set_time(&mut self, time: f64) -> &mut Self {
        self.time = Some(time);
        self
    }

    /// The identifier of this test: `classname + "/" + name`.
    ///
    /// This is the key used by timing lookups and by merge operations.
    pub fn id(&self) -> String {
        format!("{}/{}", self.classname, self.name)
    }
}

/// The outcome of a test case.
#[derive(Clone, Debug, PartialEq)]
pub enum TestCaseStatus {
    /// The test passed.
    Passed,

    /// The test failed in an expected way (an assertion).
    Failed {
        /// The failure message.
        message: Option<String>,
        /// The "type" of the failure.
        ty: Option<String>,
        /// The failure description (the element's text node).
        description: Option<String>,
    },

    /// The test hit an unexpected error (a crash or infrastructure issue).
    Errored {
        /// The error message.
        message: Option<String>,
        /// The "type" of the error.
        ty: Option<String>,
        /// The error description (the element's text node).
        description: Option<String>,
    },

    /// The test was not run.
    Skipped {
        /// The skip message.
        message: Option<String>,
        /// The "type" of the skip.
        ty: Option<String>,
        /// The skip description (the element's text node).
        description: Option<String>,
    },
}

impl TestCaseStatus {
    /// Creates a `Failed` status with no message attached.
    pub fn failed() -> Self {
        TestCaseStatus::Failed {
            message: None,
            ty: None,
            description: None,
        }
    }

    /// Creates an `Errored` status with no message attached.
    pub fn errored() -> Self {
        TestCaseStatus::Errored {
            message: None,
            ty: None,
            description: None,
        }
    }

    /// Creates a `Skipped` status with no message attached.
    pub fn skipped() -> Self {
        TestCaseStatus::Skipped {
            message: None,
            ty: None,
            description: None,
        }
    }

    /// Returns true if this status represents a passed test.
    pub fn is_passed(&self) -> bool {
        matches!(self, TestCaseStatus::Passed)
    }
}
