// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merge a run's report with a previous run's report.
//!
//! Both operations are pure: they return a new [`Report`] and never mutate
//! their inputs. Aggregate counts and times on the result are recomputed
//! from the merged cases.
//!
//! Two modes exist because two different things get merged:
//!
//! - [`merge`] accumulates a combined report across retried sub-runs. Suites
//!   and cases present on only one side are retained; where both sides have
//!   a case, the current report's values win.
//! - [`merge_times_only`] feeds shard rebalancing. It copies the previous
//!   run's elapsed times onto matching cases of the current report, leaving
//!   the current statuses untouched, and never carries forward suites the
//!   current report doesn't have.

use crate::{Report, TestSuite};
use std::collections::{HashMap, HashSet};

/// Combines `current` with `previous`, retaining history from both sides.
///
/// Returns `current` unchanged if `previous` is `None`. Suites are matched
/// by name, cases by identifier; `current` wins where both sides have the
/// same case. Suites present only in `previous` are appended as-is, so the
/// first-seen history of suites dropped by a parameterized run survives.
pub fn merge(current: &Report, previous: Option<&Report>) -> Report {
    let Some(previous) = previous else {
        return current.clone();
    };

    let mut merged = Report::new();
    merged.name = current.name.clone();
    merged.extra = current.extra.clone();

    for suite in &current.suites {
        match previous.suite(&suite.name) {
            Some(previous_suite) => {
                merged.add_suite(merge_suite(suite, previous_suite));
            }
            None => {
                merged.add_suite(suite.clone());
            }
        }
    }

    for previous_suite in &previous.suites {
        if current.suite(&previous_suite.name).is_none() {
            merged.add_suite(previous_suite.clone());
        }
    }

    merged
}

/// Copies elapsed times from `previous` onto matching cases of `current`.
///
/// Returns `current` unchanged if `previous` is `None`. Only the
/// elapsed-time attribute of cases present in both reports is updated;
/// statuses come from `current`, and suites or cases unique to `previous`
/// are not carried forward.
pub fn merge_times_only(current: &Report, previous: Option<&Report>) -> Report {
    let Some(previous) = previous else {
        return current.clone();
    };

    let mut merged = Report::new();
    merged.name = current.name.clone();
    merged.extra = current.extra.clone();

    for suite in &current.suites {
        let previous_times: HashMap<String, f64> = previous
            .suite(&suite.name)
            .map(|previous_suite| {
                previous_suite
                    .test_cases
                    .iter()
                    .filter_map(|case| Some((case.id(), case.time?)))
                    .collect()
            })
            .unwrap_or_default();

        let mut out = TestSuite::new(&suite.name);
        out.timestamp = suite.timestamp;
        out.extra = suite.extra.clone();
        for case in &suite.test_cases {
            let mut case = case.clone();
            if let Some(time) = previous_times.get(&case.id()) {
                case.time = Some(*time);
            }
            out.add_test_case(case);
        }
        merged.add_suite(out);
    }

    merged
}

fn merge_suite(current: &TestSuite, previous: &TestSuite) -> TestSuite {
    let mut merged = TestSuite::new(&current.name);
    merged.timestamp = current.timestamp;
    merged.extra = current.extra.clone();

    let current_ids: HashSet<String> = current.test_cases.iter().map(|case| case.id()).collect();

    merged.add_test_cases(current.test_cases.iter().cloned());
    merged.add_test_cases(
        previous
            .test_cases
            .iter()
            .filter(|case| !current_ids.contains(&case.id()))
            .cloned(),
    );

    merged
}
