//! End-to-end scenarios.
//!
//! Each test drives a full sequence of foreign operations through the
//! runner and checks the final state of every receiver.

#[cfg(test)]
mod tests {
    use crate::report::StepReply;
    use crate::runner::ScenarioRunner;
    use crate::scenario::{
        AltrepSpec, FunctionBehavior, Op, Scenario, Step, ValueSpec, VectorExpectation,
    };
    use nbridge_core::ExecutionMode;

    fn assert_passes(scenario: &Scenario) -> crate::report::ScenarioReport {
        let report = ScenarioRunner::run(scenario).unwrap();
        assert!(report.passed(), "{}", report);
        report
    }

    // ============================================================================
    // Managed vectors
    // ============================================================================

    #[test]
    fn test_promotion_is_idempotent() {
        let scenario = Scenario::builder("promotion")
            .integers("x", &[1, 2, 3])
            .step("first pointer", Op::pointer("x"))
            .step("second pointer", Op::pointer("x"))
            .step("third pointer", Op::pointer("x"))
            .expect_stable_pointer("x")
            .expect_vector(
                "x",
                VectorExpectation {
                    promoted: Some(true),
                    lease_count: Some(1),
                    complete: Some(true),
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    #[test]
    fn test_native_writes_survive_release() {
        let scenario = Scenario::builder("round trip")
            .doubles("x", &[1.0, 2.0, 3.0])
            .step("pointer", Op::pointer("x"))
            .step("foreign store", Op::native_write("x", 1, ValueSpec::Number(20.0)))
            .step_returning("read while native", Op::read("x", 1), ValueSpec::Number(20.0))
            .step_returning("release", Op::release("x"), ValueSpec::Bool(true))
            .step_returning("second release", Op::release("x"), ValueSpec::Bool(false))
            .step_returning("read after release", Op::read("x", 1), ValueSpec::Number(20.0))
            .expect_vector(
                "x",
                VectorExpectation {
                    values: Some(vec![
                        ValueSpec::Number(1.0),
                        ValueSpec::Number(20.0),
                        ValueSpec::Number(3.0),
                    ]),
                    promoted: Some(false),
                    complete: Some(true),
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    #[test]
    fn test_release_then_repromote_starts_new_lease() {
        let scenario = Scenario::builder("re-lease")
            .integers("x", &[4, 5])
            .step("pointer", Op::pointer("x"))
            .step("release", Op::release("x"))
            .step("pointer again", Op::pointer("x"))
            .step("foreign store", Op::native_write("x", 0, ValueSpec::Number(40.0)))
            .expect_vector(
                "x",
                VectorExpectation {
                    values: Some(vec![ValueSpec::Number(40.0), ValueSpec::Number(5.0)]),
                    promoted: Some(true),
                    lease_count: Some(2),
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    #[test]
    fn test_completeness_only_degrades() {
        let scenario = Scenario::builder("completeness")
            .integers("x", &[1, 2])
            .integers("y", &[1, 2])
            .step("write na", Op::write("x", 0, ValueSpec::Na))
            .step("overwrite na", Op::write("x", 0, ValueSpec::Number(7.0)))
            .step("pointer", Op::pointer("y"))
            .step("foreign na", Op::native_write("y", 1, ValueSpec::Na))
            .step("release", Op::release("y"))
            .step_returning("sum keeps na", Op::sum("y", false), ValueSpec::Na)
            .step_returning("sum drops na", Op::sum("y", true), ValueSpec::Number(1.0))
            .expect_vector(
                "x",
                VectorExpectation {
                    values: Some(vec![ValueSpec::Number(7.0), ValueSpec::Number(2.0)]),
                    complete: Some(false),
                    ..Default::default()
                },
            )
            .expect_vector(
                "y",
                VectorExpectation {
                    values: Some(vec![ValueSpec::Number(1.0), ValueSpec::Na]),
                    complete: Some(false),
                    promoted: Some(false),
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    #[test]
    fn test_element_access_is_checked() {
        let scenario = Scenario::builder("checks")
            .integers("x", &[1, 2])
            .step_fails("out of bounds", Op::read("x", 2), "index_out_of_bounds")
            .step_fails("wrong kind", Op::write("x", 0, ValueSpec::Bool(true)), "type_mismatch")
            .step_returning("size", Op::size("x"), ValueSpec::Number(2.0))
            .expect_vector(
                "x",
                VectorExpectation {
                    values: Some(vec![ValueSpec::Number(1.0), ValueSpec::Number(2.0)]),
                    promoted: Some(false),
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    // ============================================================================
    // Capabilities
    // ============================================================================

    #[test]
    fn test_capability_mismatches() {
        let scenario = Scenario::builder("capabilities")
            .integers("x", &[1])
            .function("f", FunctionBehavior::Identity)
            .null("nil")
            .step_fails("read function", Op::read("f", 0), "capability_mismatch")
            .step_fails("size of function", Op::size("f"), "capability_mismatch")
            .step_fails("execute vector", Op::execute("x", vec![]), "capability_mismatch")
            .step_fails(
                "write null",
                Op::write("nil", 0, ValueSpec::Number(1.0)),
                "capability_mismatch",
            )
            .step_fails("sum function", Op::sum("f", false), "capability_mismatch")
            .step_returning("null pointer", Op::pointer("nil"), ValueSpec::Number(0.0))
            .build();
        assert_passes(&scenario);
    }

    #[test]
    fn test_managed_only_mode() {
        let scenario = Scenario::builder("managed only")
            .mode(ExecutionMode::ManagedOnly)
            .integers("x", &[1, 2])
            .function("f", FunctionBehavior::CountArgs)
            .step_fails("vector pointer", Op::pointer("x"), "unsupported")
            .step("function pointer", Op::pointer("f"))
            .step_returning("read", Op::read("x", 1), ValueSpec::Number(2.0))
            .expect_vector(
                "x",
                VectorExpectation {
                    promoted: Some(false),
                    lease_count: Some(0),
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    #[test]
    fn test_function_execution() {
        let scenario = Scenario::builder("execute")
            .function("id", FunctionBehavior::Identity)
            .function("count", FunctionBehavior::CountArgs)
            .step_returning(
                "identity",
                Op::execute("id", vec![ValueSpec::Number(2.5)]),
                ValueSpec::Number(2.5),
            )
            .step_returning("identity of nothing", Op::execute("id", vec![]), ValueSpec::Na)
            .step_returning(
                "count",
                Op::execute(
                    "count",
                    vec![ValueSpec::Bool(true), ValueSpec::Na, ValueSpec::Number(1.0)],
                ),
                ValueSpec::Number(3.0),
            )
            .build();
        assert_passes(&scenario);
    }

    // ============================================================================
    // Pointer identity
    // ============================================================================

    #[test]
    fn test_registry_addresses_are_stable_and_unique() {
        let scenario = Scenario::builder("registry")
            .function("f", FunctionBehavior::Identity)
            .function("g", FunctionBehavior::Identity)
            .null("nil")
            .step("f", Op::pointer("f"))
            .step("g", Op::pointer("g"))
            .step("f again", Op::pointer("f"))
            .step_returning("nil", Op::pointer("nil"), ValueSpec::Number(0.0))
            .push_step(Step::new("resolve f", Op::resolve("f")).with_receiver("function"))
            .push_step(Step::new("resolve nil", Op::resolve("nil")).with_receiver("pointer"))
            .expect_stable_pointer("f")
            .expect_distinct_pointers(&["f", "g", "nil"])
            .build();
        let report = assert_passes(&scenario);

        let f = report.step("f").unwrap().reply.clone();
        assert_eq!(report.step("f again").unwrap().reply, f);
        assert!(matches!(f, Some(StepReply::Pointer(a)) if a != 0));
    }

    #[test]
    fn test_vector_pointers_are_not_registered() {
        let scenario = Scenario::builder("unregistered")
            .integers("x", &[1])
            .step("pointer", Op::pointer("x"))
            .step_fails("resolve", Op::resolve("x"), "unknown_address")
            .build();
        assert_passes(&scenario);
    }

    // ============================================================================
    // ALTREP vectors
    // ============================================================================

    #[test]
    fn test_altrep_length_only_class() {
        let storage: Vec<i32> = (1..=10).collect();
        let scenario = Scenario::builder("length only")
            .altrep_integers(
                "a",
                &storage,
                AltrepSpec {
                    length: Some(10),
                    ..Default::default()
                },
            )
            .step_returning("size", Op::size("a"), ValueSpec::Number(10.0))
            .step_returning("first", Op::read("a", 0), ValueSpec::Number(1.0))
            .step_returning("last", Op::read("a", 9), ValueSpec::Number(10.0))
            .step_fails("past end", Op::read("a", 10), "index_out_of_bounds")
            .step_returning("sum", Op::sum("a", false), ValueSpec::Number(55.0))
            .expect_vector(
                "a",
                VectorExpectation {
                    promoted: Some(false),
                    complete: Some(false),
                    lease_count: None,
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    #[test]
    fn test_altrep_materialization_is_one_way() {
        let scenario = Scenario::builder("materialize")
            .altrep_integers(
                "seq",
                &[0, 0, 0, 0, 0],
                AltrepSpec {
                    length: Some(5),
                    sequence_start: Some(100),
                    no_na: Some(true),
                },
            )
            .step_returning("computed", Op::read("seq", 2), ValueSpec::Number(102.0))
            .step("pointer", Op::pointer("seq"))
            .step_returning("contents survive", Op::read("seq", 2), ValueSpec::Number(102.0))
            .step("foreign store", Op::native_write("seq", 2, ValueSpec::Number(7.0)))
            .step_returning("sees store", Op::read("seq", 2), ValueSpec::Number(7.0))
            .step_returning("release is a no-op", Op::release("seq"), ValueSpec::Bool(false))
            .step("pointer again", Op::pointer("seq"))
            .expect_stable_pointer("seq")
            .expect_vector(
                "seq",
                VectorExpectation {
                    values: Some(vec![
                        ValueSpec::Number(100.0),
                        ValueSpec::Number(101.0),
                        ValueSpec::Number(7.0),
                        ValueSpec::Number(103.0),
                        ValueSpec::Number(104.0),
                    ]),
                    promoted: Some(true),
                    complete: Some(true),
                    ..Default::default()
                },
            )
            .build();
        assert_passes(&scenario);
    }

    // ============================================================================
    // Reporting
    // ============================================================================

    #[test]
    fn test_mismatches_are_reported() {
        let scenario = Scenario::builder("wrong")
            .integers("x", &[1])
            .step_returning("read", Op::read("x", 0), ValueSpec::Number(2.0))
            .step_fails("succeeds", Op::size("x"), "unsupported")
            .expect_vector(
                "x",
                VectorExpectation {
                    complete: Some(false),
                    ..Default::default()
                },
            )
            .expect_vector("missing", VectorExpectation::default())
            .build();
        let report = ScenarioRunner::run(&scenario).unwrap();
        assert!(!report.passed());
        assert_eq!(report.mismatches.len(), 4, "{}", report);
    }

    #[test]
    fn test_scenario_from_json_file() {
        let json = r#"{
            "name": "from file",
            "setup": {
                "vectors": {
                    "flags": { "kind": "logical", "values": [true, false, null] }
                }
            },
            "steps": [
                { "name": "pointer", "op": { "op": "pointer", "target": "flags" } },
                { "name": "store", "op": { "op": "native_write", "target": "flags", "index": 1, "value": true } },
                { "name": "release", "op": { "op": "release", "target": "flags" }, "expect_value": true },
                { "name": "sum", "op": { "op": "sum", "target": "flags", "na_rm": true }, "expect_value": 2 }
            ],
            "expect": {
                "vectors": {
                    "flags": { "values": [true, true, null], "complete": false, "promoted": false }
                }
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        fs_err::write(&path, json).unwrap();

        let scenario = Scenario::load(&path).unwrap();
        assert_passes(&scenario);
    }
}
