//! Per-strategy debugging session.

use crate::core::types::{ErrorRecord, SolutionRecord, Strategy};

/// History of one strategy's build-repair loop.
///
/// A session is created when a strategy starts building and dropped when the
/// strategy succeeds or is abandoned; nothing carries over to the next one.
#[derive(Debug, Clone)]
pub struct Session {
    strategy: Strategy,
    version: u32,
    iteration: u32,
    errors: Vec<ErrorRecord>,
    solutions: Vec<SolutionRecord>,
}

impl Session {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            version: 1,
            iteration: 0,
            errors: Vec::new(),
            solutions: Vec::new(),
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Version of the artifact set currently under test.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Move to the next version and return it.
    pub fn advance_version(&mut self) -> u32 {
        self.version += 1;
        self.version
    }

    /// Number of build attempts started so far.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Count a new build attempt and return its 1-based number.
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn previous_errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn previous_solutions(&self) -> &[SolutionRecord] {
        &self.solutions
    }

    /// Append an accepted (error, solution) pair to the history.
    pub fn record(&mut self, error: ErrorRecord, solution: SolutionRecord) {
        self.errors.push(error);
        self.solutions.push(solution);
    }
}
