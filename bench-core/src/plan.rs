//! Test-case sequence selection.
//!
//! A [`TestPlan`] is the normalized, possibly restricted, list of test cases
//! the orchestrator walks through. Each entry keeps the index it had in the
//! loaded file so log lines and reports refer to the same numbering as the
//! configuration.

use netbench_types::{normalize_all, TestCase, TestCaseError};

/// A test case together with its position in the loaded sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCase {
    /// Index in the loaded test-case file.
    pub index: usize,
    /// The normalized test case.
    pub case: TestCase,
}

impl PlannedCase {
    /// Display label for logs.
    pub fn label(&self) -> String {
        self.case.label(self.index)
    }
}

/// Ordered list of test cases to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestPlan {
    entries: Vec<PlannedCase>,
}

impl TestPlan {
    /// Build a plan from decoded test cases.
    ///
    /// Every case is normalized. When `only` is set, the plan contains just
    /// that index.
    pub fn new(cases: Vec<TestCase>, only: Option<usize>) -> Result<Self, TestCaseError> {
        if cases.is_empty() {
            return Err(TestCaseError::Empty);
        }

        let entries = match only {
            Some(index) => {
                let len = cases.len();
                let case = cases
                    .into_iter()
                    .nth(index)
                    .ok_or(TestCaseError::IndexOutOfRange { index, len })?;
                vec![PlannedCase {
                    index,
                    case: case.normalized(index)?,
                }]
            }
            None => normalize_all(cases)?
                .into_iter()
                .enumerate()
                .map(|(index, case)| PlannedCase { index, case })
                .collect(),
        };

        Ok(Self { entries })
    }

    /// A plan with a single, already valid test case (capture runs).
    pub fn single(case: TestCase) -> Result<Self, TestCaseError> {
        Self::new(vec![case], None)
    }

    /// Entry at plan position `position`.
    pub fn get(&self, position: usize) -> Option<&PlannedCase> {
        self.entries.get(position)
    }

    /// Client count of the entry at `position` (0 when out of range).
    pub fn clients_at(&self, position: usize) -> usize {
        self.get(position).map_or(0, |entry| entry.case.num_clients)
    }

    /// Iterate over the planned cases in order.
    pub fn iter(&self) -> impl Iterator<Item = &PlannedCase> {
        self.entries.iter()
    }

    /// Number of planned test cases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of client runs across the plan.
    pub fn total_client_runs(&self) -> usize {
        self.entries.iter().map(|entry| entry.case.num_clients).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(clients: usize) -> TestCase {
        TestCase {
            name: None,
            num_clients: clients,
            ..TestCase::collect()
        }
    }

    #[test]
    fn plan_keeps_order_and_indices() {
        let plan = TestPlan::new(vec![case(1), case(2), case(3)], None).unwrap();
        assert_eq!(plan.len(), 3);
        let indices: Vec<usize> = plan.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(plan.total_client_runs(), 6);
    }

    #[test]
    fn plan_normalizes_zero_clients() {
        let plan = TestPlan::new(vec![case(0)], None).unwrap();
        assert_eq!(plan.clients_at(0), 1);
    }

    #[test]
    fn only_restricts_to_one_index() {
        let plan = TestPlan::new(vec![case(1), case(4), case(2)], Some(1)).unwrap();
        assert_eq!(plan.len(), 1);
        let entry = plan.get(0).unwrap();
        assert_eq!(entry.index, 1);
        assert_eq!(entry.case.num_clients, 4);
        assert_eq!(entry.label(), "#1");
    }

    #[test]
    fn only_out_of_range_fails() {
        let err = TestPlan::new(vec![case(1)], Some(5)).unwrap_err();
        assert_eq!(err, TestCaseError::IndexOutOfRange { index: 5, len: 1 });
    }

    #[test]
    fn empty_sequence_fails() {
        assert_eq!(TestPlan::new(Vec::new(), None), Err(TestCaseError::Empty));
    }

    #[test]
    fn clients_at_out_of_range_is_zero() {
        let plan = TestPlan::single(TestCase::collect()).unwrap();
        assert_eq!(plan.clients_at(0), 1);
        assert_eq!(plan.clients_at(1), 0);
    }
}
