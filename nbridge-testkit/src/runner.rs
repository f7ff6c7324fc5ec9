//! Scenario runner.
//!
//! Every scenario gets its own pointer registry, so addresses handed out in
//! one run never leak into another.

use std::collections::BTreeMap;
use std::sync::Arc;

use nbridge_core::{
    AltrepClass, AltrepPayload, AnyVector, AtomicVector, BridgeConfig, BridgeError,
    ForeignFunction, ForeignValue, Mediator, MirrorRef, MirrorRegistry, NativeElement, RComplex,
    Receiver, Scalar, VectorKind,
};

use crate::report::{Mismatch, ScenarioReport, StepOutcome, StepReply};
use crate::scenario::{
    AltrepSpec, Expectation, FunctionBehavior, Op, Scenario, Step, ValueSpec, VectorSpec,
};

/// Error type reported for failures of the harness itself rather than the
/// bridge.
pub const HARNESS_ERROR: &str = "harness";

struct StepFailure {
    error_type: String,
    message: String,
}

impl StepFailure {
    fn harness(message: impl Into<String>) -> Self {
        Self {
            error_type: HARNESS_ERROR.to_string(),
            message: message.into(),
        }
    }
}

impl From<BridgeError> for StepFailure {
    fn from(err: BridgeError) -> Self {
        Self {
            error_type: err.error_type().to_string(),
            message: err.to_string(),
        }
    }
}

/// Runs a scenario's steps against a fresh set of receivers.
pub struct ScenarioRunner {
    mediator: Mediator,
    receivers: BTreeMap<String, Receiver>,
    /// Every pointer handed out, per target, in order.
    pointers: BTreeMap<String, Vec<usize>>,
}

impl ScenarioRunner {
    /// Create the scenario's receivers.
    pub fn new(scenario: &Scenario) -> Result<Self, String> {
        let config = BridgeConfig {
            mode: scenario.setup.mode,
            ..BridgeConfig::default()
        };
        let registry = Arc::new(MirrorRegistry::new(config.registry_initial_capacity));
        let mediator = Mediator::with_registry(config, registry);

        let mut receivers = BTreeMap::new();
        let mut add = |name: &str, receiver: Receiver| {
            if receivers.insert(name.to_string(), receiver).is_some() {
                Err(format!("receiver {} defined twice", name))
            } else {
                Ok(())
            }
        };
        for (name, spec) in &scenario.setup.vectors {
            let vector = build_vector(spec).map_err(|e| format!("vector {}: {}", name, e))?;
            add(name, Receiver::Vector(vector))?;
        }
        for (name, behavior) in &scenario.setup.functions {
            add(name, Receiver::Function(build_function(name, *behavior)))?;
        }
        for name in &scenario.setup.nulls {
            add(name, Receiver::Pointer(MirrorRef::Null))?;
        }

        Ok(Self {
            mediator,
            receivers,
            pointers: BTreeMap::new(),
        })
    }

    /// Run every step, then check the final state against the expectation.
    pub fn run(scenario: &Scenario) -> Result<ScenarioReport, String> {
        let mut runner = Self::new(scenario)?;
        let mut report = ScenarioReport::new(&scenario.name);

        for step in &scenario.steps {
            let outcome = runner.run_step(step);
            check_step(step, &outcome, &mut report.mismatches);
            report.steps.push(outcome);
        }
        runner.check_expectation(&scenario.expect, &mut report.mismatches);

        log::debug!(
            "scenario {}: {} steps, {} mismatches",
            scenario.name,
            report.steps.len(),
            report.mismatches.len()
        );
        Ok(report)
    }

    pub fn run_step(&mut self, step: &Step) -> StepOutcome {
        match self.apply(&step.op) {
            Ok(reply) => StepOutcome::ok(&step.name, reply),
            Err(failure) => {
                log::debug!("step {} failed: {}", step.name, failure.message);
                StepOutcome::failed(&step.name, &failure.error_type, failure.message)
            }
        }
    }

    pub fn receiver(&self, name: &str) -> Option<&Receiver> {
        self.receivers.get(name)
    }

    /// Pointers handed out for `name`, oldest first.
    pub fn pointers(&self, name: &str) -> &[usize] {
        self.pointers.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn apply(&mut self, op: &Op) -> Result<StepReply, StepFailure> {
        let Self {
            mediator,
            receivers,
            pointers,
        } = self;
        let target = op.target();
        let receiver = receivers
            .get_mut(target)
            .ok_or_else(|| StepFailure::harness(format!("no receiver named {}", target)))?;

        match op {
            Op::Read { index, .. } => Ok(StepReply::Value(
                mediator.read_element(receiver, *index)?,
            )),
            Op::Write { index, value, .. } => {
                let scalar = scalar_for(receiver, value);
                mediator.write_element(receiver, *index, scalar)?;
                Ok(StepReply::Done)
            }
            Op::Size { .. } => Ok(StepReply::Size(mediator.get_size(receiver)?)),
            Op::Pointer { .. } => {
                let address = mediator.convert_to_pointer(receiver)?;
                pointers.entry(target.to_string()).or_default().push(address);
                Ok(StepReply::Pointer(address))
            }
            Op::Execute { args, .. } => {
                let args = args
                    .iter()
                    .map(|arg| match arg {
                        ValueSpec::Na => ForeignValue::Null,
                        other => ForeignValue::Scalar(other.natural_scalar()),
                    })
                    .collect();
                Ok(match mediator.execute(receiver, args)? {
                    ForeignValue::Null => StepReply::Null,
                    ForeignValue::Scalar(value) => StepReply::Value(value),
                    ForeignValue::Address(address) => StepReply::Pointer(address),
                })
            }
            Op::Release { .. } => match receiver {
                Receiver::Vector(vector) => Ok(StepReply::Released(vector.release_native())),
                other => Err(StepFailure::harness(format!(
                    "a {} receiver holds no native lease",
                    other.name()
                ))),
            },
            Op::NativeWrite { index, value, .. } => {
                let address = last_pointer(pointers, target)?;
                let vector = receiver
                    .as_vector()
                    .ok_or_else(|| StepFailure::harness(format!("{} is not a vector", target)))?;
                let scalar = value
                    .to_scalar(vector.kind())
                    .map_err(StepFailure::harness)?;
                native_write(vector, address, *index, scalar)?;
                Ok(StepReply::Done)
            }
            Op::Sum { na_rm, .. } => match receiver.as_vector() {
                Some(vector) => Ok(StepReply::Value(vector.sum(*na_rm)?)),
                None => Err(BridgeError::capability_mismatch(receiver.name(), "sum").into()),
            },
            Op::Resolve { .. } => {
                let address = last_pointer(pointers, target)?;
                let resolved = mediator.resolve(address)?;
                if let (Receiver::Function(original), Receiver::Function(found)) =
                    (&*receiver, &resolved)
                {
                    if !Arc::ptr_eq(original, found) {
                        return Err(StepFailure::harness(format!(
                            "{:#x} resolved to a different function",
                            address
                        )));
                    }
                }
                Ok(StepReply::Receiver(resolved.name()))
            }
        }
    }

    fn check_expectation(&self, expect: &Expectation, mismatches: &mut Vec<Mismatch>) {
        for (name, expected) in &expect.vectors {
            let Some(vector) = self.receivers.get(name).and_then(Receiver::as_vector) else {
                mismatches.push(Mismatch::MissingTarget {
                    target: name.clone(),
                });
                continue;
            };

            if let Some(values) = &expected.values {
                match vector.values() {
                    Ok(actual) if actual.len() != values.len() => {
                        mismatches.push(Mismatch::Length {
                            target: name.clone(),
                            expected: values.len(),
                            actual: actual.len(),
                        })
                    }
                    Ok(actual) => {
                        for (index, (a, e)) in actual.iter().zip(values).enumerate() {
                            if !scalar_matches(a, e) {
                                mismatches.push(Mismatch::Element {
                                    target: name.clone(),
                                    index,
                                    expected: format!("{:?}", e),
                                    actual: format!("{:?}", a),
                                });
                            }
                        }
                    }
                    Err(err) => mismatches.push(Mismatch::Unreadable {
                        target: name.clone(),
                        error: err.to_string(),
                    }),
                }
            }

            if let Some(complete) = expected.complete {
                if vector.is_complete() != complete {
                    mismatches.push(Mismatch::Completeness {
                        target: name.clone(),
                        expected: complete,
                        actual: vector.is_complete(),
                    });
                }
            }

            if let Some(promoted) = expected.promoted {
                if vector.is_promoted() != promoted {
                    mismatches.push(Mismatch::Promotion {
                        target: name.clone(),
                        expected: promoted,
                        actual: vector.is_promoted(),
                    });
                }
            }

            if let Some(leases) = expected.lease_count {
                if vector.lease_count() != Some(leases) {
                    mismatches.push(Mismatch::LeaseCount {
                        target: name.clone(),
                        expected: leases,
                        actual: vector.lease_count(),
                    });
                }
            }
        }

        for target in &expect.stable_pointers {
            let addresses = self.pointers(target);
            if addresses.is_empty() || addresses.windows(2).any(|w| w[0] != w[1]) {
                mismatches.push(Mismatch::UnstablePointer {
                    target: target.clone(),
                    addresses: addresses.to_vec(),
                });
            }
        }

        let mut seen: Vec<(&str, usize)> = Vec::new();
        for target in &expect.distinct_pointers {
            let Some(&address) = self.pointers(target).last() else {
                mismatches.push(Mismatch::MissingTarget {
                    target: target.clone(),
                });
                continue;
            };
            if let Some((first, _)) = seen.iter().find(|(_, a)| *a == address) {
                mismatches.push(Mismatch::SharedPointer {
                    first: first.to_string(),
                    second: target.clone(),
                    address,
                });
            }
            seen.push((target, address));
        }
    }
}

/// Whether `actual` is the value `expected` describes. NA matches only NA.
pub fn scalar_matches(actual: &Scalar, expected: &ValueSpec) -> bool {
    match expected.to_scalar(actual.kind()) {
        Ok(expected) if expected.is_na() || actual.is_na() => expected.is_na() && actual.is_na(),
        Ok(expected) => expected == *actual,
        Err(_) => false,
    }
}

fn reply_matches(reply: &StepReply, expected: &ValueSpec) -> bool {
    match (reply, expected) {
        (StepReply::Value(actual), expected) => scalar_matches(actual, expected),
        (StepReply::Size(n), ValueSpec::Number(x)) => *x == *n as f64,
        (StepReply::Pointer(address), ValueSpec::Number(x)) => *x == *address as f64,
        (StepReply::Null, ValueSpec::Na) => true,
        (StepReply::Released(ended), ValueSpec::Bool(b)) => ended == b,
        _ => false,
    }
}

fn check_step(step: &Step, outcome: &StepOutcome, mismatches: &mut Vec<Mismatch>) {
    let mismatch = |expected: String, actual: String| Mismatch::StepOutcome {
        step: step.name.clone(),
        expected,
        actual,
    };

    if step.expect_failure {
        match (&outcome.reply, &step.expect_error_type) {
            (Some(reply), _) => {
                mismatches.push(mismatch("failure".into(), format!("success ({})", reply)))
            }
            (None, Some(expected)) if outcome.error_type.as_deref() != Some(expected.as_str()) => {
                mismatches.push(mismatch(
                    format!("{} error", expected),
                    format!(
                        "{} error",
                        outcome.error_type.as_deref().unwrap_or("unknown")
                    ),
                ))
            }
            _ => {}
        }
        return;
    }

    let Some(reply) = &outcome.reply else {
        mismatches.push(mismatch(
            "success".into(),
            outcome.error.clone().unwrap_or_default(),
        ));
        return;
    };

    if let Some(expected) = &step.expect_value {
        if !reply_matches(reply, expected) {
            mismatches.push(Mismatch::StepReply {
                step: step.name.clone(),
                expected: format!("{:?}", expected),
                actual: reply.to_string(),
            });
        }
    }

    if let Some(expected) = &step.expect_receiver {
        if *reply != StepReply::Receiver(receiver_name(expected)) {
            mismatches.push(Mismatch::StepReply {
                step: step.name.clone(),
                expected: format!("{} receiver", expected),
                actual: reply.to_string(),
            });
        }
    }
}

fn receiver_name(name: &str) -> &'static str {
    match name {
        "vector" => "vector",
        "function" => "function",
        "pointer" => "pointer",
        _ => "unknown",
    }
}

fn last_pointer(pointers: &BTreeMap<String, Vec<usize>>, target: &str) -> Result<usize, StepFailure> {
    pointers
        .get(target)
        .and_then(|p| p.last())
        .copied()
        .ok_or_else(|| StepFailure::harness(format!("no pointer handed out for {}", target)))
}

/// The scalar to send for `value`. A value that does not fit the vector's
/// kind is sent as-is so the mediator can reject it.
fn scalar_for(receiver: &Receiver, value: &ValueSpec) -> Scalar {
    receiver
        .as_vector()
        .and_then(|vector| value.to_scalar(vector.kind()).ok())
        .unwrap_or_else(|| value.natural_scalar())
}

/// Store `value` at `address[index]` the way foreign code would.
fn native_write(
    vector: &AnyVector,
    address: usize,
    index: usize,
    value: Scalar,
) -> Result<(), StepFailure> {
    if !vector.is_promoted() {
        return Err(StepFailure::harness(format!(
            "pointer {:#x} is no longer live",
            address
        )));
    }
    if index >= vector.len() {
        return Err(BridgeError::index_out_of_bounds(index, vector.len()).into());
    }
    // SAFETY: the vector is promoted at `address` and `index` is within its
    // length; the pointer was handed out for exactly this vector.
    unsafe {
        match value {
            Scalar::Double(x) => (address as *mut f64).add(index).write(x),
            Scalar::Integer(x) => (address as *mut i32).add(index).write(x),
            Scalar::Logical(x) => (address as *mut i32).add(index).write(x.to_native_int()),
            Scalar::Raw(x) => (address as *mut u8).add(index).write(x),
            Scalar::Complex(x) => (address as *mut RComplex).add(index).write(x),
        }
    }
    Ok(())
}

fn build_vector(spec: &VectorSpec) -> Result<AnyVector, String> {
    let scalars = spec
        .values
        .iter()
        .map(|v| v.to_scalar(spec.kind))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(altrep) = &spec.altrep {
        if spec.kind != VectorKind::Integer {
            return Err(format!("ALTREP scenarios need integer storage, not {}", spec.kind));
        }
        return Ok(AnyVector::Integer(build_altrep(altrep, collect(&scalars)?)));
    }

    Ok(match spec.kind {
        VectorKind::Double => AnyVector::from(collect::<f64>(&scalars)?),
        VectorKind::Integer => AnyVector::from(collect::<i32>(&scalars)?),
        VectorKind::Logical => AnyVector::from(collect::<nbridge_core::Logical>(&scalars)?),
        VectorKind::Raw => AnyVector::from(collect::<u8>(&scalars)?),
        VectorKind::Complex => AnyVector::from(collect::<RComplex>(&scalars)?),
    })
}

fn collect<T: NativeElement>(scalars: &[Scalar]) -> Result<Vec<T>, String> {
    scalars
        .iter()
        .map(|s| T::from_scalar(*s).map_err(|e| e.to_string()))
        .collect()
}

fn build_altrep(spec: &AltrepSpec, storage: Vec<i32>) -> AtomicVector<i32> {
    let mut payload = AltrepPayload::new();
    let mut builder = AltrepClass::<i32>::builder("scenario_sequence");
    if let Some(len) = spec.length {
        builder = builder.length(move |_| len);
    }
    if let Some(start) = spec.sequence_start {
        payload = payload.with_data1(start);
        builder = builder.elt(|payload, i| {
            let start = payload.data1::<i32>().copied().unwrap_or(0);
            start.wrapping_add(i as i32)
        });
    }
    if let Some(no_na) = spec.no_na {
        builder = builder.no_na(move |_| no_na);
    }
    AtomicVector::altrep(builder.build(), payload, storage)
}

fn build_function(name: &str, behavior: FunctionBehavior) -> Arc<ForeignFunction> {
    match behavior {
        FunctionBehavior::Identity => ForeignFunction::new(name, |args| {
            Ok(args.first().cloned().unwrap_or(ForeignValue::Null))
        }),
        FunctionBehavior::CountArgs => ForeignFunction::new(name, |args| {
            let n = i32::try_from(args.len())
                .map_err(|_| BridgeError::callback_failed("execute", "too many arguments"))?;
            Ok(ForeignValue::Scalar(Scalar::Integer(n)))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbridge_core::na_real;

    #[test]
    fn na_only_matches_na() {
        assert!(scalar_matches(&Scalar::Double(na_real()), &ValueSpec::Na));
        assert!(!scalar_matches(&Scalar::Double(f64::NAN), &ValueSpec::Na));
        assert!(!scalar_matches(&Scalar::Integer(1), &ValueSpec::Na));
        assert!(scalar_matches(&Scalar::Integer(1), &ValueSpec::Number(1.0)));
    }

    #[test]
    fn unknown_target_is_a_harness_error() {
        let scenario = Scenario::builder("missing")
            .step("read", Op::read("nope", 0))
            .build();
        let report = ScenarioRunner::run(&scenario).unwrap();
        assert_eq!(report.steps[0].error_type.as_deref(), Some(HARNESS_ERROR));
        assert!(!report.passed());
    }

    #[test]
    fn duplicate_receiver_names_are_rejected() {
        let scenario = Scenario::builder("dup")
            .integers("x", &[1])
            .function("x", FunctionBehavior::Identity)
            .build();
        assert!(ScenarioRunner::new(&scenario).is_err());
    }

    #[test]
    fn altrep_needs_integer_storage() {
        let scenario = Scenario::builder("bad")
            .vector(
                "x",
                VectorSpec {
                    kind: VectorKind::Double,
                    values: vec![ValueSpec::Number(1.0)],
                    altrep: Some(AltrepSpec::default()),
                },
            )
            .build();
        assert!(ScenarioRunner::new(&scenario).is_err());
    }

    #[test]
    fn native_write_needs_a_live_pointer() {
        let scenario = Scenario::builder("stale")
            .integers("x", &[1, 2])
            .step("write before pointer", Op::native_write("x", 0, ValueSpec::Number(5.0)))
            .step("pointer", Op::pointer("x"))
            .step("release", Op::release("x"))
            .step("write after release", Op::native_write("x", 0, ValueSpec::Number(5.0)))
            .build();
        let report = ScenarioRunner::run(&scenario).unwrap();
        assert!(!report.step("write before pointer").unwrap().success);
        assert!(report.step("pointer").unwrap().success);
        assert!(!report.step("write after release").unwrap().success);
    }
}
