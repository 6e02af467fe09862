//! Test case model.
//!
//! A [`TestCase`] is one impairment profile plus the number of client
//! instances that run against it. Test cases are decoded from the test-case
//! file, normalized once, and then shared read-only as `Arc<TestCase>`.
//!
//! Both the snake_case field names and the PascalCase keys of legacy
//! `testCases.json` files are accepted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::TestCaseError;

/// Segment size used when none is configured (MSS for an MTU of 1500).
pub const DEFAULT_SEGMENT_SIZE: usize = 1460;

/// Largest datagram the UDP relay reads in one go.
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// One impairment profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Optional human-readable name.
    #[serde(default, alias = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Pause inserted after forwarding each segment (0 = none).
    #[serde(default, alias = "DelayTimeInMilliseconds")]
    pub delay_ms: u64,

    /// Maximum bytes read per TCP relay iteration.
    #[serde(default = "default_segment_size", alias = "SegmentSize")]
    pub segment_size: usize,

    /// Forcibly close the connection pair after `reset_after_segments`.
    #[serde(default, alias = "DoReset")]
    pub do_reset: bool,

    /// Forwarded-segment threshold for the reset.
    #[serde(default, alias = "ResetAfterNumOfSegments")]
    pub reset_after_segments: u64,

    /// Concurrent client instances for this test case (0 is treated as 1).
    #[serde(default = "default_num_clients", alias = "NumOfClients")]
    pub num_clients: usize,

    /// UDP only: swap each adjacent pair of datagrams per flow direction.
    #[serde(default, alias = "ReorderingEnabled")]
    pub reordering_enabled: bool,
}

fn default_segment_size() -> usize {
    DEFAULT_SEGMENT_SIZE
}

fn default_num_clients() -> usize {
    1
}

impl Default for TestCase {
    fn default() -> Self {
        Self::collect()
    }
}

impl TestCase {
    /// The unimpaired profile used by the capture run.
    pub fn collect() -> Self {
        Self {
            name: Some("collect".to_string()),
            delay_ms: 0,
            segment_size: DEFAULT_SEGMENT_SIZE,
            do_reset: false,
            reset_after_segments: 0,
            num_clients: 1,
            reordering_enabled: false,
        }
    }

    /// Validate and coerce a decoded test case.
    ///
    /// `num_clients == 0` becomes 1. A zero segment size is rejected since a
    /// zero-length read cannot be told apart from end-of-stream.
    pub fn normalized(mut self, index: usize) -> Result<Self, TestCaseError> {
        if self.segment_size == 0 {
            return Err(TestCaseError::ZeroSegmentSize {
                label: self.label(index),
            });
        }
        if self.num_clients == 0 {
            self.num_clients = 1;
        }
        Ok(self)
    }

    /// Per-segment delay, if any.
    pub fn delay(&self) -> Option<Duration> {
        (self.delay_ms > 0).then(|| Duration::from_millis(self.delay_ms))
    }

    /// Whether a direction that already forwarded `forwarded` segments must
    /// reset the connection before reading again.
    pub fn reset_due(&self, forwarded: u64) -> bool {
        self.do_reset && forwarded >= self.reset_after_segments
    }

    /// Display label: the configured name or `#<index>`.
    pub fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => format!("{name} (#{index})"),
            None => format!("#{index}"),
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delay={}ms segment={}B reset={} clients={} reorder={}",
            self.delay_ms,
            self.segment_size,
            if self.do_reset {
                format!("after {}", self.reset_after_segments)
            } else {
                "off".to_string()
            },
            self.num_clients,
            self.reordering_enabled
        )
    }
}

/// Normalize a decoded sequence of test cases.
pub fn normalize_all(cases: Vec<TestCase>) -> Result<Vec<TestCase>, TestCaseError> {
    cases
        .into_iter()
        .enumerate()
        .map(|(index, case)| case.normalized(index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_json_keys_decode() {
        let json = r#"[
            {
                "DelayTimeInMilliseconds": 50,
                "SegmentSize": 2,
                "DoReset": true,
                "ResetAfterNumOfSegments": 4,
                "NumOfClients": 3
            }
        ]"#;

        let cases: Vec<TestCase> = serde_json::from_str(json).unwrap();
        assert_eq!(cases.len(), 1);
        let case = &cases[0];
        assert_eq!(case.delay_ms, 50);
        assert_eq!(case.segment_size, 2);
        assert!(case.do_reset);
        assert_eq!(case.reset_after_segments, 4);
        assert_eq!(case.num_clients, 3);
        assert!(!case.reordering_enabled);
    }

    #[test]
    fn snake_case_keys_decode() {
        let json = r#"{"name": "slow", "delay_ms": 10, "reordering_enabled": true}"#;
        let case: TestCase = serde_json::from_str(json).unwrap();
        assert_eq!(case.name.as_deref(), Some("slow"));
        assert_eq!(case.delay_ms, 10);
        assert!(case.reordering_enabled);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let case: TestCase = serde_json::from_str("{}").unwrap();
        assert_eq!(case.segment_size, DEFAULT_SEGMENT_SIZE);
        assert_eq!(case.num_clients, 1);
        assert_eq!(case.delay_ms, 0);
        assert!(!case.do_reset);
    }

    #[test]
    fn zero_clients_coerced_to_one() {
        let case = TestCase {
            num_clients: 0,
            ..TestCase::collect()
        };
        assert_eq!(case.normalized(0).unwrap().num_clients, 1);
    }

    #[test]
    fn zero_segment_size_rejected() {
        let case = TestCase {
            name: None,
            segment_size: 0,
            ..TestCase::collect()
        };
        let err = case.normalized(2).unwrap_err();
        assert_eq!(
            err,
            TestCaseError::ZeroSegmentSize {
                label: "#2".to_string()
            }
        );
    }

    #[test]
    fn delay_none_when_zero() {
        assert_eq!(TestCase::collect().delay(), None);
        let case = TestCase {
            delay_ms: 50,
            ..TestCase::collect()
        };
        assert_eq!(case.delay(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn reset_due_respects_flag_and_threshold() {
        let mut case = TestCase {
            do_reset: false,
            reset_after_segments: 2,
            ..TestCase::collect()
        };
        assert!(!case.reset_due(10));

        case.do_reset = true;
        assert!(!case.reset_due(0));
        assert!(!case.reset_due(1));
        assert!(case.reset_due(2));
        assert!(case.reset_due(3));
    }

    #[test]
    fn reset_after_zero_resets_immediately() {
        let case = TestCase {
            do_reset: true,
            reset_after_segments: 0,
            ..TestCase::collect()
        };
        assert!(case.reset_due(0));
    }

    #[test]
    fn normalize_all_reports_first_bad_case() {
        let cases = vec![
            TestCase::collect(),
            TestCase {
                name: None,
                segment_size: 0,
                ..TestCase::collect()
            },
        ];
        assert!(matches!(
            normalize_all(cases),
            Err(TestCaseError::ZeroSegmentSize { .. })
        ));
    }

    #[test]
    fn label_prefers_name() {
        assert_eq!(TestCase::collect().label(0), "collect (#0)");
        let unnamed = TestCase {
            name: None,
            ..TestCase::collect()
        };
        assert_eq!(unnamed.label(4), "#4");
    }
}
