use log::{debug, warn};
use std::fmt::{self, Display, Formatter};

use crate::{error::SafetyError, value::Number};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_iterations: u64,
    pub max_depth: usize,
    /// Largest `|end - start|` or `|step|` accepted without a warning.
    pub max_range_span: u64,
}

impl Default for LoopLimits {
    fn default() -> Self {
        LoopLimits {
            max_iterations: 1_000_000,
            max_depth: 100,
            max_range_span: 1_000_000,
        }
    }
}

/// Live iteration state of one active loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopContext {
    pub var_name: String,
    pub current: Number,
    pub start: Number,
    pub end: Number,
    pub step: Number,
    pub iteration_count: u64,
    pub max_iterations: u64,
    pub line: usize,
    /// Index of the enclosing loop on the manager's stack.
    pub parent: Option<usize>,
}

impl LoopContext {
    pub fn new(var_name: &str, start: Number, end: Number, step: Number, line: usize) -> Self {
        LoopContext {
            var_name: var_name.to_string(),
            current: start,
            start,
            end,
            step,
            iteration_count: 0,
            max_iterations: 0,
            line,
            parent: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStatistics {
    pub loops_entered: u64,
    pub iterations_executed: u64,
    pub max_depth_reached: usize,
    pub loops_with_errors: u64,
}

impl Display for LoopStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "loops entered:       {}", self.loops_entered)?;
        writeln!(f, "iterations executed: {}", self.iterations_executed)?;
        writeln!(f, "max depth reached:   {}", self.max_depth_reached)?;
        write!(f, "loops with errors:   {}", self.loops_with_errors)
    }
}

/// Stack of active loops plus the limits that keep user loops finite.
#[derive(Debug, Default)]
pub struct LoopManager {
    stack: Vec<LoopContext>,
    limits: LoopLimits,
    statistics: LoopStatistics,
}

impl LoopManager {
    pub fn new(limits: LoopLimits) -> Self {
        LoopManager {
            stack: Vec::new(),
            limits,
            statistics: LoopStatistics::default(),
        }
    }

    pub fn statistics(&self) -> LoopStatistics {
        self.statistics
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&self) -> Option<&LoopContext> {
        self.stack.last()
    }

    /// Checks a numeric range before the loop starts. A `false` result is only
    /// advisory: the caller logs it and runs the loop anyway.
    pub fn validate_range(&self, start: Number, end: Number, step: Number) -> bool {
        let max_span = self.limits.max_range_span.saturating_mul(Number::SCALE as u64);

        if step.is_zero() {
            warn!("loop step is zero; the loop will not run");
            return false;
        }
        if start.abs_diff(end) > max_span {
            warn!(
                "loop range {}..{} spans more than {}",
                start, end, self.limits.max_range_span
            );
            return false;
        }
        if step.unsigned_abs() > max_span {
            warn!(
                "loop step {} exceeds the maximum span of {}",
                step, self.limits.max_range_span
            );
            return false;
        }
        if (step > Number::ZERO && start > end) || (step < Number::ZERO && start < end) {
            warn!(
                "loop step {} moves away from the end of range {}..{}",
                step, start, end
            );
            return false;
        }

        true
    }

    /// Enters a loop and returns the new nesting depth.
    pub fn push(&mut self, mut context: LoopContext) -> Result<usize, SafetyError> {
        if self.stack.len() >= self.limits.max_depth {
            return Err(SafetyError::DepthExceeded {
                limit: self.limits.max_depth,
                line: context.line,
            });
        }

        context.parent = self.stack.len().checked_sub(1);
        context.max_iterations = self.limits.max_iterations;
        debug!(
            "enter loop '{}' at line {} (depth {})",
            context.var_name,
            context.line,
            self.stack.len() + 1
        );
        self.stack.push(context);

        self.statistics.loops_entered += 1;
        self.statistics.max_depth_reached = self.statistics.max_depth_reached.max(self.stack.len());
        Ok(self.stack.len())
    }

    pub fn pop(&mut self) -> Option<LoopContext> {
        let context = self.stack.pop()?;
        debug!(
            "exit loop '{}' after {} iterations",
            context.var_name, context.iteration_count
        );
        Some(context)
    }

    /// Counts one iteration of the innermost loop, failing once its budget is spent.
    pub fn tick(&mut self) -> Result<(), SafetyError> {
        let Some(context) = self.stack.last_mut() else {
            return Ok(());
        };

        if context.iteration_count >= context.max_iterations {
            return Err(SafetyError::IterationLimit {
                limit: context.max_iterations,
                line: context.line,
            });
        }

        context.iteration_count += 1;
        self.statistics.iterations_executed += 1;
        Ok(())
    }

    pub fn advance(&mut self, current: Number) {
        if let Some(context) = self.stack.last_mut() {
            context.current = current;
        }
    }

    pub fn record_error(&mut self) {
        self.statistics.loops_with_errors += 1;
    }

    /// Drops contexts above `depth`, used when an error unwinds through loops.
    pub fn unwind_to(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }
}
