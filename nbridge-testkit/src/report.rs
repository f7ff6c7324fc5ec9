//! Scenario outcomes and mismatches against the expectation.

use std::fmt;

use nbridge_core::Scalar;

/// What a successful step returned.
#[derive(Debug, Clone, PartialEq)]
pub enum StepReply {
    /// Writes and releases.
    Done,
    Value(Scalar),
    Size(usize),
    /// A function call returned null.
    Null,
    Pointer(usize),
    /// A resolve produced a receiver of this kind.
    Receiver(&'static str),
    /// Whether a release ended a lease.
    Released(bool),
}

impl fmt::Display for StepReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepReply::Done => write!(f, "done"),
            StepReply::Value(value) => write!(f, "{:?}", value),
            StepReply::Size(size) => write!(f, "size {}", size),
            StepReply::Null => write!(f, "null"),
            StepReply::Pointer(address) => write!(f, "pointer {:#x}", address),
            StepReply::Receiver(kind) => write!(f, "{} receiver", kind),
            StepReply::Released(ended) => write!(f, "released ({})", ended),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub success: bool,
    pub reply: Option<StepReply>,
    pub error_type: Option<String>,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn ok(name: &str, reply: StepReply) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            reply: Some(reply),
            error_type: None,
            error: None,
        }
    }

    pub fn failed(name: &str, error_type: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            reply: None,
            error_type: Some(error_type.to_string()),
            error: Some(error),
        }
    }
}

/// A difference between what a scenario expected and what happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    /// A step succeeded or failed against expectation.
    StepOutcome {
        step: String,
        expected: String,
        actual: String,
    },
    /// A step returned the wrong thing.
    StepReply {
        step: String,
        expected: String,
        actual: String,
    },
    Length {
        target: String,
        expected: usize,
        actual: usize,
    },
    Element {
        target: String,
        index: usize,
        expected: String,
        actual: String,
    },
    Completeness {
        target: String,
        expected: bool,
        actual: bool,
    },
    Promotion {
        target: String,
        expected: bool,
        actual: bool,
    },
    LeaseCount {
        target: String,
        expected: usize,
        actual: Option<usize>,
    },
    /// Pointer requests for one target returned different addresses.
    UnstablePointer {
        target: String,
        addresses: Vec<usize>,
    },
    /// Two targets were handed the same address.
    SharedPointer {
        first: String,
        second: String,
        address: usize,
    },
    /// Reading the final contents failed.
    Unreadable { target: String, error: String },
    /// An expectation names a receiver the scenario never created.
    MissingTarget { target: String },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::StepOutcome {
                step,
                expected,
                actual,
            } => write!(f, "step '{}': expected {}, got {}", step, expected, actual),
            Mismatch::StepReply {
                step,
                expected,
                actual,
            } => write!(f, "step '{}': expected reply {}, got {}", step, expected, actual),
            Mismatch::Length {
                target,
                expected,
                actual,
            } => write!(
                f,
                "{}: expected {} elements, got {}",
                target, expected, actual
            ),
            Mismatch::Element {
                target,
                index,
                expected,
                actual,
            } => write!(
                f,
                "{}[{}]: expected {}, got {}",
                target, index, expected, actual
            ),
            Mismatch::Completeness {
                target,
                expected,
                actual,
            } => write!(
                f,
                "{}: expected complete={}, got {}",
                target, expected, actual
            ),
            Mismatch::Promotion {
                target,
                expected,
                actual,
            } => write!(
                f,
                "{}: expected promoted={}, got {}",
                target, expected, actual
            ),
            Mismatch::LeaseCount {
                target,
                expected,
                actual,
            } => match actual {
                Some(actual) => write!(
                    f,
                    "{}: expected {} native leases, got {}",
                    target, expected, actual
                ),
                None => write!(
                    f,
                    "{}: expected {} native leases, but it is not a managed vector",
                    target, expected
                ),
            },
            Mismatch::UnstablePointer { target, addresses } => {
                write!(f, "{}: pointer changed between requests:", target)?;
                for address in addresses {
                    write!(f, " {:#x}", address)?;
                }
                Ok(())
            }
            Mismatch::SharedPointer {
                first,
                second,
                address,
            } => write!(f, "{} and {} share address {:#x}", first, second, address),
            Mismatch::Unreadable { target, error } => {
                write!(f, "{}: could not read contents: {}", target, error)
            }
            Mismatch::MissingTarget { target } => write!(f, "no receiver named {}", target),
        }
    }
}

/// Result of running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: String,
    pub steps: Vec<StepOutcome>,
    pub mismatches: Vec<Mismatch>,
}

impl ScenarioReport {
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            steps: Vec::new(),
            mismatches: Vec::new(),
        }
    }

    /// Whether every step and every expectation matched.
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Outcome of the step named `name`.
    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        if self.passed() {
            return format!(
                "{}: passed ({} steps)",
                self.scenario,
                self.steps.len()
            );
        }
        let mut lines = vec![format!(
            "{}: {} mismatches",
            self.scenario,
            self.mismatches.len()
        )];
        for mismatch in &self.mismatches {
            lines.push(format!("  {}", mismatch));
        }
        lines.join("\n")
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
