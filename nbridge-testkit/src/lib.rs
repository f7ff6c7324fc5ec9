//! nbridge Test Kit - scenario testing utilities.
//!
//! A scenario names the receivers foreign code will see (vectors, ALTREP
//! vectors, functions, the null object), the foreign operations to run
//! against them, and the state that should result. Scenarios can be built in
//! code or loaded from JSON.
//!
//! # Key Types
//!
//! - [`Scenario`]: setup, steps and expected outcomes
//! - [`ScenarioRunner`]: runs each step through the mediator with a private
//!   pointer registry
//! - [`ScenarioReport`]: per-step outcomes and [`Mismatch`]es
//!
//! # Example
//!
//! ```no_run
//! use nbridge_testkit::{Op, Scenario, ScenarioRunner, ValueSpec};
//!
//! let scenario = Scenario::builder("promote twice")
//!     .integers("x", &[1, 2, 3])
//!     .step("first", Op::pointer("x"))
//!     .step("second", Op::pointer("x"))
//!     .step_returning("read", Op::read("x", 2), ValueSpec::Number(3.0))
//!     .expect_stable_pointer("x")
//!     .build();
//!
//! let report = ScenarioRunner::run(&scenario).unwrap();
//! assert!(report.passed(), "{}", report);
//! ```

mod integration;
mod report;
mod runner;
mod scenario;

pub use report::{Mismatch, ScenarioReport, StepOutcome, StepReply};
pub use runner::{scalar_matches, ScenarioRunner, HARNESS_ERROR};
pub use scenario::{
    AltrepSpec, Expectation, FunctionBehavior, Op, Scenario, ScenarioBuilder, Setup, Step,
    ValueSpec, VectorExpectation, VectorSpec,
};

/// Re-export nbridge_core for convenience in tests.
pub use nbridge_core;
