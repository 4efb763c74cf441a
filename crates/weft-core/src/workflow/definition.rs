//! Workflow definitions: steps, transitions and the builder that validates them.
//!
//! A `WorkflowDefinition` is immutable once built and is shared read-only
//! (usually behind an `Arc`) across concurrent runs. Transitions are the only
//! source of topology; cycles are allowed and bounded at run time by the
//! iteration ceiling.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use weft_types::workflow::State;

use super::context::StepContext;
use super::graph::{Diagnostic, diagnose};
use super::step::{FnStep, Step, StepError, StepHandler, StepResult};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building a workflow or resolving its transitions.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow '{0}' declares no steps")]
    NoSteps(String),

    #[error("duplicate step name: '{0}'")]
    DuplicateStep(String),

    #[error("entry step '{0}' is not declared")]
    UnknownEntry(String),

    #[error("transition source '{0}' is not declared")]
    UnknownSource(String),

    /// A JEXL condition failed to evaluate.
    #[error("expression error in '{expression}': {message}")]
    Expression { expression: String, message: String },
}

// ---------------------------------------------------------------------------
// Successors
// ---------------------------------------------------------------------------

/// Successor names as returned by a step or a router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Successors {
    /// Not given; the declared transitions apply.
    #[default]
    None,
    Single(String),
    Many(Vec<String>),
}

impl Successors {
    pub fn is_none(&self) -> bool {
        matches!(self, Successors::None)
    }

    /// Normalized names: declaration order kept, duplicates removed.
    pub fn names(&self) -> Vec<String> {
        match self {
            Successors::None => Vec::new(),
            Successors::Single(name) => vec![name.clone()],
            Successors::Many(names) => {
                let mut seen = HashSet::new();
                names
                    .iter()
                    .filter(|n| seen.insert(n.as_str()))
                    .cloned()
                    .collect()
            }
        }
    }
}

impl From<&str> for Successors {
    fn from(name: &str) -> Self {
        Successors::Single(name.to_string())
    }
}

impl From<String> for Successors {
    fn from(name: String) -> Self {
        Successors::Single(name)
    }
}

impl From<Vec<String>> for Successors {
    fn from(names: Vec<String>) -> Self {
        Successors::Many(names)
    }
}

impl From<Vec<&str>> for Successors {
    fn from(names: Vec<&str>) -> Self {
        Successors::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl<T: Into<Successors>> From<Option<T>> for Successors {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Conditions and routers
// ---------------------------------------------------------------------------

/// Predicate deciding whether a conditional transition is taken.
#[derive(Clone)]
pub enum Condition {
    /// Rust predicate over the run state.
    Predicate(Arc<dyn Fn(&State) -> bool + Send + Sync>),
    /// JEXL expression evaluated against the run state.
    Expr(String),
}

impl Condition {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        Condition::Predicate(Arc::new(f))
    }

    /// A JEXL expression, e.g. `approved && amount < 1000` or `state.retries > 2`.
    pub fn expr(expression: impl Into<String>) -> Self {
        Condition::Expr(expression.into())
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Predicate(_) => f.write_str("Condition::Predicate(..)"),
            Condition::Expr(e) => write!(f, "Condition::Expr({e:?})"),
        }
    }
}

/// Computes successors from the run state at run time.
pub type Router = Arc<dyn Fn(&State) -> Successors + Send + Sync>;

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Where a transition leads.
#[derive(Clone)]
pub enum TransitionTarget {
    /// Always taken.
    Static(Vec<String>),
    /// Taken when the condition holds against the current state.
    Conditional { condition: Condition, to: Vec<String> },
    /// Targets computed at run time; not part of the dependency relation.
    Dynamic(Router),
}

impl std::fmt::Debug for TransitionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionTarget::Static(to) => f.debug_tuple("Static").field(to).finish(),
            TransitionTarget::Conditional { condition, to } => f
                .debug_struct("Conditional")
                .field("condition", condition)
                .field("to", to)
                .finish(),
            TransitionTarget::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// An edge (or fan-out) from one step to its successors.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: String,
    pub target: TransitionTarget,
}

impl Transition {
    /// Targets known without running anything (static and conditional).
    pub fn declared_targets(&self) -> &[String] {
        match &self.target {
            TransitionTarget::Static(to) | TransitionTarget::Conditional { to, .. } => to,
            TransitionTarget::Dynamic(_) => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// Immutable step graph plus entry point and initial state.
#[derive(Debug)]
pub struct WorkflowDefinition {
    name: String,
    initial_state: State,
    steps: HashMap<String, Step>,
    /// Step names in declaration order.
    order: Vec<String>,
    transitions: Vec<Transition>,
    entry: String,
    /// step -> steps whose static/conditional transitions point at it,
    /// in transition-declaration order.
    dependencies: HashMap<String, Vec<String>>,
}

impl WorkflowDefinition {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn initial_state(&self) -> &State {
        &self.initial_state
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn contains_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Declared step names in declaration order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn step_count(&self) -> usize {
        self.order.len()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Transitions leaving `step`, in declaration order.
    pub fn transitions_from<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| t.from == step)
    }

    /// Steps whose transitions point at `step`. Used only to assemble input.
    pub fn dependencies_of(&self, step: &str) -> &[String] {
        self.dependencies
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Static problems worth a warning: undeclared static targets and steps
    /// unreachable through static/conditional transitions.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        diagnose(self)
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`WorkflowDefinition`].
///
/// ```ignore
/// let wf = WorkflowBuilder::new("order")
///     .step_fn("validate", |ctx| async move { Ok(StepResult::new(ctx.input().clone())) })
///     .step_fn("charge", charge)
///     .edge("validate", "charge")
///     .build()?;
/// ```
pub struct WorkflowBuilder {
    name: String,
    initial_state: State,
    steps: Vec<Step>,
    transitions: Vec<Transition>,
    entry: Option<String>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_state: State::new(),
            steps: Vec::new(),
            transitions: Vec::new(),
            entry: None,
        }
    }

    pub fn initial_state(mut self, state: State) -> Self {
        self.initial_state = state;
        self
    }

    pub fn step<H: StepHandler + 'static>(mut self, name: impl Into<String>, handler: H) -> Self {
        self.steps.push(Step::new(name, handler));
        self
    }

    pub fn step_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepResult, StepError>> + Send + 'static,
    {
        self.step(name, FnStep::new(f))
    }

    pub fn edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.push(from, TransitionTarget::Static(vec![to.into()]))
    }

    pub fn edges<I, S>(self, from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let to = to.into_iter().map(Into::into).collect();
        self.push(from, TransitionTarget::Static(to))
    }

    pub fn when<I, S>(self, from: impl Into<String>, condition: Condition, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let to = to.into_iter().map(Into::into).collect();
        self.push(from, TransitionTarget::Conditional { condition, to })
    }

    pub fn route<F>(self, from: impl Into<String>, router: F) -> Self
    where
        F: Fn(&State) -> Successors + Send + Sync + 'static,
    {
        self.push(from, TransitionTarget::Dynamic(Arc::new(router)))
    }

    /// Entry step. Defaults to the first declared step.
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    fn push(mut self, from: impl Into<String>, target: TransitionTarget) -> Self {
        self.transitions.push(Transition {
            from: from.into(),
            target,
        });
        self
    }

    /// Validate and freeze the definition.
    ///
    /// Transition targets are not validated here: a missing target fails the
    /// run when it is reached. They are reported by `diagnostics()` instead.
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::EmptyName);
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::NoSteps(self.name));
        }

        let mut steps = HashMap::with_capacity(self.steps.len());
        let mut order = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            let name = step.name().to_string();
            if steps.contains_key(&name) {
                return Err(WorkflowError::DuplicateStep(name));
            }
            order.push(name.clone());
            steps.insert(name, step);
        }

        let entry = match self.entry {
            Some(entry) => entry,
            None => order[0].clone(),
        };
        if !steps.contains_key(&entry) {
            return Err(WorkflowError::UnknownEntry(entry));
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for transition in &self.transitions {
            if !steps.contains_key(&transition.from) {
                return Err(WorkflowError::UnknownSource(transition.from.clone()));
            }
            for target in transition.declared_targets() {
                let deps = dependencies.entry(target.clone()).or_default();
                if !deps.contains(&transition.from) {
                    deps.push(transition.from.clone());
                }
            }
        }

        let definition = WorkflowDefinition {
            name: self.name,
            initial_state: self.initial_state,
            steps,
            order,
            transitions: self.transitions,
            entry,
            dependencies,
        };

        for diagnostic in definition.diagnostics() {
            tracing::warn!(workflow = definition.name.as_str(), "{diagnostic}");
        }

        Ok(definition)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn noop(_ctx: StepContext) -> Result<StepResult, StepError> {
        Ok(StepResult::default())
    }

    #[test]
    fn successors_normalize() {
        assert!(Successors::None.names().is_empty());
        assert_eq!(Successors::from("a").names(), vec!["a"]);
        assert_eq!(
            Successors::from(vec!["b", "a", "b"]).names(),
            vec!["b".to_string(), "a".to_string()]
        );
        assert_eq!(Successors::from(None::<String>), Successors::None);
        assert_eq!(
            Successors::from(Some("x")),
            Successors::Single("x".to_string())
        );
    }

    #[test]
    fn build_defaults_entry_to_first_step() {
        let wf = WorkflowBuilder::new("wf")
            .step_fn("a", noop)
            .step_fn("b", noop)
            .edge("a", "b")
            .build()
            .unwrap();
        assert_eq!(wf.entry(), "a");
        assert_eq!(wf.step_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(wf.step_count(), 2);
        assert!(wf.contains_step("b"));
    }

    #[test]
    fn build_rejects_invalid_definitions() {
        assert!(matches!(
            WorkflowBuilder::new(" ").step_fn("a", noop).build(),
            Err(WorkflowError::EmptyName)
        ));
        assert!(matches!(
            WorkflowBuilder::new("wf").build(),
            Err(WorkflowError::NoSteps(_))
        ));
        assert!(matches!(
            WorkflowBuilder::new("wf").step_fn("a", noop).step_fn("a", noop).build(),
            Err(WorkflowError::DuplicateStep(name)) if name == "a"
        ));
        assert!(matches!(
            WorkflowBuilder::new("wf").step_fn("a", noop).entry("zz").build(),
            Err(WorkflowError::UnknownEntry(name)) if name == "zz"
        ));
        assert!(matches!(
            WorkflowBuilder::new("wf").step_fn("a", noop).edge("ghost", "a").build(),
            Err(WorkflowError::UnknownSource(name)) if name == "ghost"
        ));
    }

    #[test]
    fn missing_targets_do_not_fail_build() {
        let wf = WorkflowBuilder::new("wf")
            .step_fn("a", noop)
            .edge("a", "nowhere")
            .build();
        assert!(wf.is_ok());
    }

    #[test]
    fn dependencies_follow_declaration_order() {
        let wf = WorkflowBuilder::new("wf")
            .step_fn("start", noop)
            .step_fn("left", noop)
            .step_fn("right", noop)
            .step_fn("join", noop)
            .edges("start", ["left", "right"])
            .edge("right", "join")
            .when("left", Condition::expr("ok"), ["join"])
            .edge("right", "join")
            .route("start", |_| Successors::from("join"))
            .build()
            .unwrap();

        assert_eq!(wf.dependencies_of("join"), ["right", "left"]);
        assert_eq!(wf.dependencies_of("left"), ["start"]);
        assert!(wf.dependencies_of("start").is_empty());
        assert_eq!(wf.transitions_from("start").count(), 2);
    }

    #[test]
    fn initial_state_is_kept() {
        let state = json!({"count": 0}).as_object().cloned().unwrap();
        let wf = WorkflowBuilder::new("wf")
            .initial_state(state)
            .step_fn("a", noop)
            .build()
            .unwrap();
        assert_eq!(wf.initial_state()["count"], json!(0));
        assert_eq!(wf.name(), "wf");
    }

    #[test]
    fn condition_debug_hides_closure() {
        let c = Condition::predicate(|s| s.contains_key("x"));
        assert_eq!(format!("{c:?}"), "Condition::Predicate(..)");
        assert!(format!("{:?}", Condition::expr("a > 1")).contains("a > 1"));
    }
}
