//! Write-once aggregation of per-cell outcomes into the verdict grid.

use std::collections::BTreeMap;
use tracing::warn;

use crate::engine::{ExecutionOutcome, Verdict};

/// The complete grid for one harness run: rows are test ids in
/// lexicographic order, columns are adapters in declaration order.
/// Immutable after aggregation; the sole input to the reporter.
#[derive(Debug)]
pub struct Matrix {
    tests: Vec<String>,
    adapters: Vec<String>,
    cells: Vec<Vec<ExecutionOutcome>>,
}

impl Matrix {
    /// Build the grid from a flat outcome stream. Each (test, adapter)
    /// coordinate is written exactly once; a duplicate or unknown
    /// coordinate is a harness bug and is dropped with a warning. Any
    /// coordinate left unwritten is filled with an `error` outcome so the
    /// grid always holds |tests| x |adapters| verdicts.
    pub fn aggregate(
        mut tests: Vec<String>,
        adapters: Vec<String>,
        outcomes: Vec<(String, String, ExecutionOutcome)>,
    ) -> Self {
        tests.sort();
        let test_index: BTreeMap<&str, usize> = tests
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let adapter_index: BTreeMap<&str, usize> = adapters
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut cells: Vec<Vec<Option<ExecutionOutcome>>> =
            vec![vec![None; adapters.len()]; tests.len()];
        for (test_id, adapter_id, outcome) in outcomes {
            let (Some(&row), Some(&col)) = (
                test_index.get(test_id.as_str()),
                adapter_index.get(adapter_id.as_str()),
            ) else {
                warn!(test = %test_id, adapter = %adapter_id, "outcome for unknown cell dropped");
                continue;
            };
            if cells[row][col].is_some() {
                warn!(test = %test_id, adapter = %adapter_id, "duplicate cell write dropped");
                debug_assert!(false, "cell ({test_id}, {adapter_id}) written twice");
                continue;
            }
            cells[row][col] = Some(outcome);
        }

        let cells = cells
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| {
                        cell.unwrap_or_else(|| {
                            ExecutionOutcome::infrastructure("cell outcome never recorded")
                        })
                    })
                    .collect()
            })
            .collect();

        Matrix {
            tests,
            adapters,
            cells,
        }
    }

    pub fn tests(&self) -> &[String] {
        &self.tests
    }

    pub fn adapters(&self) -> &[String] {
        &self.adapters
    }

    pub fn cell(&self, row: usize, col: usize) -> &ExecutionOutcome {
        &self.cells[row][col]
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &[ExecutionOutcome])> {
        self.tests
            .iter()
            .zip(self.cells.iter())
            .map(|(id, row)| (id.as_str(), row.as_slice()))
    }

    /// (pass, fail, error) totals across the grid.
    pub fn verdict_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for row in &self.cells {
            for cell in row {
                match cell.verdict {
                    Verdict::Pass => counts.0 += 1,
                    Verdict::Fail => counts.1 += 1,
                    Verdict::Error => counts.2 += 1,
                }
            }
        }
        counts
    }
}
