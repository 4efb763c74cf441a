//! Transition resolution and input assembly.
//!
//! `next_steps` decides where a run goes after a step completes;
//! `assemble_input` builds a step's input from the outputs of the steps that
//! feed it. Neither gates execution order: only transitions do.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use weft_types::workflow::State;

use super::definition::{Condition, Successors, TransitionTarget, WorkflowDefinition, WorkflowError};
use super::expression::WorkflowEvaluator;

/// Successors of `completed`.
///
/// An explicit `next` from the step result wins. Otherwise every transition
/// leaving `completed` is consulted in declaration order: static targets are
/// always taken, conditional targets when their condition holds against
/// `state`, routers contribute whatever they return. Names are deduplicated
/// and may include undeclared steps; the executor rejects those when they
/// are about to run.
pub fn next_steps(
    workflow: &WorkflowDefinition,
    completed: &str,
    explicit: &Successors,
    state: &State,
) -> Result<Vec<String>, WorkflowError> {
    if !explicit.is_none() {
        return Ok(explicit.names());
    }

    let mut evaluator: Option<WorkflowEvaluator> = None;
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |names: &[String], out: &mut Vec<String>| {
        for name in names {
            if seen.insert(name.clone()) {
                out.push(name.clone());
            }
        }
    };

    for transition in workflow.transitions_from(completed) {
        match &transition.target {
            TransitionTarget::Static(to) => push(to, &mut out),
            TransitionTarget::Conditional { condition, to } => {
                if condition_holds(condition, state, &mut evaluator)? {
                    push(to, &mut out);
                }
            }
            TransitionTarget::Dynamic(router) => push(&router(state).names(), &mut out),
        }
    }

    Ok(out)
}

fn condition_holds(
    condition: &Condition,
    state: &State,
    evaluator: &mut Option<WorkflowEvaluator>,
) -> Result<bool, WorkflowError> {
    match condition {
        Condition::Predicate(predicate) => Ok(predicate(state)),
        Condition::Expr(expression) => evaluator
            .get_or_insert_with(WorkflowEvaluator::new)
            .evaluate_condition(expression, state)
            .map_err(|e| WorkflowError::Expression {
                expression: expression.clone(),
                message: e.to_string(),
            }),
    }
}

/// Input for `step`: `Null` without dependencies, the single dependency's
/// output with one, a list in transition-declaration order with several.
/// Dependencies that have not produced output yet contribute `Null`.
pub fn assemble_input(
    workflow: &WorkflowDefinition,
    step: &str,
    outputs: &BTreeMap<String, Value>,
) -> Value {
    let output_of = |name: &String| outputs.get(name).cloned().unwrap_or(Value::Null);
    match workflow.dependencies_of(step) {
        [] => Value::Null,
        [only] => output_of(only),
        many => Value::Array(many.iter().map(output_of).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::StepContext;
    use crate::workflow::definition::WorkflowBuilder;
    use crate::workflow::step::{StepError, StepResult};
    use serde_json::json;

    async fn noop(_ctx: StepContext) -> Result<StepResult, StepError> {
        Ok(StepResult::default())
    }

    fn state(v: Value) -> State {
        v.as_object().cloned().unwrap()
    }

    fn branching() -> WorkflowDefinition {
        WorkflowBuilder::new("branching")
            .step_fn("start", noop)
            .step_fn("audit", noop)
            .step_fn("small", noop)
            .step_fn("large", noop)
            .step_fn("notify", noop)
            .edge("start", "audit")
            .when(
                "start",
                Condition::predicate(|s| s.get("amount").and_then(Value::as_f64).unwrap_or(0.0) < 100.0),
                ["small"],
            )
            .when("start", Condition::expr("amount >= 100"), ["large", "audit"])
            .route("start", |s| {
                if s.contains_key("email") {
                    Successors::from("notify")
                } else {
                    Successors::None
                }
            })
            .build()
            .unwrap()
    }

    #[test]
    fn static_and_conditional_successors() {
        let wf = branching();
        let small = next_steps(&wf, "start", &Successors::None, &state(json!({"amount": 20.0}))).unwrap();
        assert_eq!(small, vec!["audit", "small"]);

        let large = next_steps(&wf, "start", &Successors::None, &state(json!({"amount": 500.0}))).unwrap();
        assert_eq!(large, vec!["audit", "large"]);
    }

    #[test]
    fn router_contributes_successors() {
        let wf = branching();
        let next = next_steps(
            &wf,
            "start",
            &Successors::None,
            &state(json!({"amount": 20.0, "email": "a@b.c"})),
        )
        .unwrap();
        assert_eq!(next, vec!["audit", "small", "notify"]);
    }

    #[test]
    fn explicit_next_overrides_transitions() {
        let wf = branching();
        let next = next_steps(&wf, "start", &Successors::from("undeclared"), &State::new()).unwrap();
        assert_eq!(next, vec!["undeclared"]);

        let none = next_steps(&wf, "start", &Successors::Many(vec![]), &State::new()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn terminal_step_has_no_successors() {
        let wf = branching();
        assert!(next_steps(&wf, "notify", &Successors::None, &State::new()).unwrap().is_empty());
    }

    #[test]
    fn bad_expression_is_a_workflow_error() {
        let wf = WorkflowBuilder::new("wf")
            .step_fn("a", noop)
            .step_fn("b", noop)
            .when("a", Condition::expr("amount >"), ["b"])
            .build()
            .unwrap();
        let err = next_steps(&wf, "a", &Successors::None, &State::new()).unwrap_err();
        assert!(matches!(err, WorkflowError::Expression { .. }));
    }

    #[test]
    fn input_shapes() {
        let wf = WorkflowBuilder::new("wf")
            .step_fn("a", noop)
            .step_fn("b", noop)
            .step_fn("c", noop)
            .step_fn("join", noop)
            .edges("a", ["b", "c"])
            .edge("c", "join")
            .edge("b", "join")
            .build()
            .unwrap();

        let mut outputs = BTreeMap::new();
        assert_eq!(assemble_input(&wf, "a", &outputs), Value::Null);
        assert_eq!(assemble_input(&wf, "b", &outputs), Value::Null);

        outputs.insert("a".to_string(), json!("seed"));
        outputs.insert("b".to_string(), json!(1));
        assert_eq!(assemble_input(&wf, "b", &outputs), json!("seed"));
        // Declaration order (c before b), missing output is null.
        assert_eq!(assemble_input(&wf, "join", &outputs), json!([null, 1]));

        outputs.insert("c".to_string(), json!(2));
        assert_eq!(assemble_input(&wf, "join", &outputs), json!([2, 1]));
    }
}
