//! Test scenario definitions.

use std::collections::BTreeMap;
use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use nbridge_core::{na_real, ExecutionMode, Logical, RComplex, Scalar, VectorKind, NA_INTEGER};

/// A scenario: receivers to set up, foreign operations to run in order, and
/// the expected state afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,

    /// Description of what this scenario tests.
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub setup: Setup,

    /// Steps: operations to run in order.
    pub steps: Vec<Step>,

    #[serde(default)]
    pub expect: Expectation,
}

/// Receivers created before the first step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Setup {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Vectors by name.
    #[serde(default)]
    pub vectors: BTreeMap<String, VectorSpec>,

    /// Foreign functions by name.
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionBehavior>,

    /// Names bound to the null object.
    #[serde(default)]
    pub nulls: Vec<String>,
}

/// One element as written in a scenario. `null` is NA.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Number(f64),
    Bool(bool),
    Complex([f64; 2]),
    Na,
}

impl ValueSpec {
    /// Interpret the value as an element of `kind`.
    pub fn to_scalar(&self, kind: VectorKind) -> Result<Scalar, String> {
        let scalar = match (kind, *self) {
            (VectorKind::Double, ValueSpec::Number(x)) => Scalar::Double(x),
            (VectorKind::Double, ValueSpec::Na) => Scalar::Double(na_real()),
            (VectorKind::Integer, ValueSpec::Number(x)) => Scalar::Integer(integral(x)?),
            (VectorKind::Integer, ValueSpec::Na) => Scalar::Integer(NA_INTEGER),
            (VectorKind::Logical, ValueSpec::Bool(b)) => Scalar::Logical(b.into()),
            (VectorKind::Logical, ValueSpec::Na) => Scalar::Logical(Logical::Na),
            (VectorKind::Raw, ValueSpec::Number(x)) => {
                let byte = integral(x)?;
                Scalar::Raw(u8::try_from(byte).map_err(|_| format!("{} is not a byte", x))?)
            }
            (VectorKind::Complex, ValueSpec::Complex([r, i])) => Scalar::Complex(RComplex::new(r, i)),
            (VectorKind::Complex, ValueSpec::Na) => {
                Scalar::Complex(RComplex::new(na_real(), na_real()))
            }
            (kind, value) => return Err(format!("{:?} is not a valid {} value", value, kind)),
        };
        Ok(scalar)
    }

    /// The scalar this value reads as with no target kind: numbers are
    /// doubles, booleans and bare NA are logicals.
    pub fn natural_scalar(&self) -> Scalar {
        match *self {
            ValueSpec::Number(x) => Scalar::Double(x),
            ValueSpec::Bool(b) => Scalar::Logical(b.into()),
            ValueSpec::Complex([r, i]) => Scalar::Complex(RComplex::new(r, i)),
            ValueSpec::Na => Scalar::Logical(Logical::Na),
        }
    }
}

fn integral(x: f64) -> Result<i32, String> {
    if x.fract() == 0.0 && x > f64::from(i32::MIN) && x <= f64::from(i32::MAX) {
        Ok(x as i32)
    } else {
        Err(format!("{} is not an integer", x))
    }
}

/// A vector to create during setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSpec {
    pub kind: VectorKind,

    /// Initial contents (for ALTREP vectors: the default storage).
    pub values: Vec<ValueSpec>,

    /// Make this an ALTREP vector (integer only).
    #[serde(default)]
    pub altrep: Option<AltrepSpec>,
}

impl VectorSpec {
    pub fn new(kind: VectorKind, values: Vec<ValueSpec>) -> Self {
        Self {
            kind,
            values,
            altrep: None,
        }
    }
}

/// Which ALTREP slots to fill. Unset slots use the default behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AltrepSpec {
    /// `length` callback returning this constant.
    pub length: Option<usize>,

    /// `elt` callback returning `sequence_start + i`.
    pub sequence_start: Option<i32>,

    /// `no_na` callback returning this constant.
    pub no_na: Option<bool>,
}

/// What a scenario function does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionBehavior {
    /// Return the first argument (or null).
    Identity,
    /// Return the number of arguments as an integer.
    CountArgs,
}

/// Operation applied to a named receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Read { target: String, index: usize },
    Write { target: String, index: usize, value: ValueSpec },
    Size { target: String },
    Pointer { target: String },
    Execute {
        target: String,
        #[serde(default)]
        args: Vec<ValueSpec>,
    },
    /// End the native lease, as the runtime does when a foreign call returns.
    Release { target: String },
    /// Store through the last pointer handed out for `target`, as foreign
    /// code would.
    NativeWrite { target: String, index: usize, value: ValueSpec },
    Sum {
        target: String,
        #[serde(default)]
        na_rm: bool,
    },
    /// Map the last pointer handed out for `target` back to a receiver.
    Resolve { target: String },
}

impl Op {
    pub fn target(&self) -> &str {
        match self {
            Op::Read { target, .. }
            | Op::Write { target, .. }
            | Op::Size { target }
            | Op::Pointer { target }
            | Op::Execute { target, .. }
            | Op::Release { target }
            | Op::NativeWrite { target, .. }
            | Op::Sum { target, .. }
            | Op::Resolve { target } => target,
        }
    }

    pub fn read(target: &str, index: usize) -> Self {
        Op::Read {
            target: target.to_string(),
            index,
        }
    }

    pub fn write(target: &str, index: usize, value: ValueSpec) -> Self {
        Op::Write {
            target: target.to_string(),
            index,
            value,
        }
    }

    pub fn size(target: &str) -> Self {
        Op::Size {
            target: target.to_string(),
        }
    }

    pub fn pointer(target: &str) -> Self {
        Op::Pointer {
            target: target.to_string(),
        }
    }

    pub fn execute(target: &str, args: Vec<ValueSpec>) -> Self {
        Op::Execute {
            target: target.to_string(),
            args,
        }
    }

    pub fn release(target: &str) -> Self {
        Op::Release {
            target: target.to_string(),
        }
    }

    pub fn native_write(target: &str, index: usize, value: ValueSpec) -> Self {
        Op::NativeWrite {
            target: target.to_string(),
            index,
            value,
        }
    }

    pub fn sum(target: &str, na_rm: bool) -> Self {
        Op::Sum {
            target: target.to_string(),
            na_rm,
        }
    }

    pub fn resolve(target: &str) -> Self {
        Op::Resolve {
            target: target.to_string(),
        }
    }
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name/description.
    pub name: String,

    /// Operation to run.
    pub op: Op,

    /// Whether this step should fail.
    #[serde(default)]
    pub expect_failure: bool,

    /// Expected error type (if expect_failure is true).
    #[serde(default)]
    pub expect_error_type: Option<String>,

    /// Expected value returned by a read, size, execute or sum.
    #[serde(default)]
    pub expect_value: Option<ValueSpec>,

    /// Expected receiver kind returned by a resolve.
    #[serde(default)]
    pub expect_receiver: Option<String>,
}

impl Step {
    /// Create a new step.
    pub fn new(name: &str, op: Op) -> Self {
        Self {
            name: name.to_string(),
            op,
            expect_failure: false,
            expect_error_type: None,
            expect_value: None,
            expect_receiver: None,
        }
    }

    /// Create a step that expects failure.
    pub fn expect_failure(name: &str, op: Op, error_type: Option<&str>) -> Self {
        Self {
            expect_failure: true,
            expect_error_type: error_type.map(String::from),
            ..Self::new(name, op)
        }
    }

    pub fn with_value(mut self, value: ValueSpec) -> Self {
        self.expect_value = Some(value);
        self
    }

    pub fn with_receiver(mut self, receiver: &str) -> Self {
        self.expect_receiver = Some(receiver.to_string());
        self
    }
}

/// Expected outcomes after running a scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub vectors: BTreeMap<String, VectorExpectation>,

    /// Targets whose pointer requests must all return one address.
    #[serde(default)]
    pub stable_pointers: Vec<String>,

    /// Targets whose pointers must all differ from each other.
    #[serde(default)]
    pub distinct_pointers: Vec<String>,
}

/// Expected final state of one vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorExpectation {
    pub values: Option<Vec<ValueSpec>>,
    pub complete: Option<bool>,
    pub promoted: Option<bool>,
    pub lease_count: Option<usize>,
}

impl Scenario {
    /// Create a new scenario builder.
    pub fn builder(name: &str) -> ScenarioBuilder {
        ScenarioBuilder::new(name)
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("invalid scenario: {}", e))
    }

    /// Load a scenario from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| e.to_string())?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| e.to_string())
    }
}

/// Builder for creating scenarios.
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    /// Create a new builder.
    pub fn new(name: &str) -> Self {
        Self {
            scenario: Scenario {
                name: name.to_string(),
                description: String::new(),
                setup: Setup::default(),
                steps: Vec::new(),
                expect: Expectation::default(),
            },
        }
    }

    /// Set the description.
    pub fn description(mut self, desc: &str) -> Self {
        self.scenario.description = desc.to_string();
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.scenario.setup.mode = mode;
        self
    }

    pub fn vector(mut self, name: &str, spec: VectorSpec) -> Self {
        self.scenario.setup.vectors.insert(name.to_string(), spec);
        self
    }

    pub fn integers(self, name: &str, values: &[i32]) -> Self {
        let values = values.iter().map(|&v| ValueSpec::Number(f64::from(v))).collect();
        self.vector(name, VectorSpec::new(VectorKind::Integer, values))
    }

    pub fn doubles(self, name: &str, values: &[f64]) -> Self {
        let values = values.iter().map(|&v| ValueSpec::Number(v)).collect();
        self.vector(name, VectorSpec::new(VectorKind::Double, values))
    }

    pub fn altrep_integers(self, name: &str, storage: &[i32], altrep: AltrepSpec) -> Self {
        let values = storage.iter().map(|&v| ValueSpec::Number(f64::from(v))).collect();
        self.vector(
            name,
            VectorSpec {
                kind: VectorKind::Integer,
                values,
                altrep: Some(altrep),
            },
        )
    }

    pub fn function(mut self, name: &str, behavior: FunctionBehavior) -> Self {
        self.scenario
            .setup
            .functions
            .insert(name.to_string(), behavior);
        self
    }

    pub fn null(mut self, name: &str) -> Self {
        self.scenario.setup.nulls.push(name.to_string());
        self
    }

    /// Add a step.
    pub fn step(mut self, name: &str, op: Op) -> Self {
        self.scenario.steps.push(Step::new(name, op));
        self
    }

    /// Add a step that must return `value`.
    pub fn step_returning(mut self, name: &str, op: Op, value: ValueSpec) -> Self {
        self.scenario.steps.push(Step::new(name, op).with_value(value));
        self
    }

    /// Add a step that expects failure.
    pub fn step_fails(mut self, name: &str, op: Op, error_type: &str) -> Self {
        self.scenario
            .steps
            .push(Step::expect_failure(name, op, Some(error_type)));
        self
    }

    pub fn push_step(mut self, step: Step) -> Self {
        self.scenario.steps.push(step);
        self
    }

    pub fn expect_vector(mut self, name: &str, expectation: VectorExpectation) -> Self {
        self.scenario
            .expect
            .vectors
            .insert(name.to_string(), expectation);
        self
    }

    pub fn expect_stable_pointer(mut self, target: &str) -> Self {
        self.scenario.expect.stable_pointers.push(target.to_string());
        self
    }

    pub fn expect_distinct_pointers(mut self, targets: &[&str]) -> Self {
        self.scenario
            .expect
            .distinct_pointers
            .extend(targets.iter().map(|t| t.to_string()));
        self
    }

    /// Build the scenario.
    pub fn build(self) -> Scenario {
        self.scenario
    }
}
