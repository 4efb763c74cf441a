//! Static topology diagnostics.
//!
//! Models the always and conditional transitions as a `petgraph` directed
//! graph. Cycles are legal, so nothing here rejects a definition; the
//! findings are warnings surfaced by `WorkflowDefinition::diagnostics`.

use std::collections::HashMap;
use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;

use super::definition::{TransitionTarget, WorkflowDefinition};

/// A static finding about a workflow's topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A static or conditional transition names an undeclared step.
    UndeclaredTarget { from: String, to: String },
    /// No static or conditional path leads from the entry step to this step.
    /// It may still be reached through a router or an explicit `next`.
    Unreachable(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UndeclaredTarget { from, to } => {
                write!(f, "transition from '{from}' targets undeclared step '{to}'")
            }
            Diagnostic::Unreachable(step) => {
                write!(f, "step '{step}' is not statically reachable from the entry step")
            }
        }
    }
}

/// Static transition graph over declared steps.
pub struct StepGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    index: HashMap<&'a str, NodeIndex>,
    has_routers: bool,
}

impl<'a> StepGraph<'a> {
    pub fn build(workflow: &'a WorkflowDefinition) -> Self {
        let mut graph = DiGraph::<&str, ()>::new();
        let index: HashMap<&str, NodeIndex> = workflow
            .step_names()
            .map(|name| (name, graph.add_node(name)))
            .collect();

        let mut has_routers = false;
        for transition in workflow.transitions() {
            if matches!(transition.target, TransitionTarget::Dynamic(_)) {
                has_routers = true;
            }
            let Some(&from) = index.get(transition.from.as_str()) else {
                continue;
            };
            for to in transition.declared_targets() {
                if let Some(&to) = index.get(to.as_str()) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        Self {
            graph,
            index,
            has_routers,
        }
    }

    /// Whether any static/conditional loop exists.
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Whether routers may add edges not visible here.
    pub fn has_routers(&self) -> bool {
        self.has_routers
    }

    /// Declared steps reachable from `entry`, in BFS order.
    pub fn reachable_from(&self, entry: &str) -> Vec<&'a str> {
        let Some(&start) = self.index.get(entry) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut out = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            out.push(self.graph[node]);
        }
        out
    }
}

pub(crate) fn diagnose(workflow: &WorkflowDefinition) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    for transition in workflow.transitions() {
        for to in transition.declared_targets() {
            if !workflow.contains_step(to) {
                out.push(Diagnostic::UndeclaredTarget {
                    from: transition.from.clone(),
                    to: to.clone(),
                });
            }
        }
    }

    let graph = StepGraph::build(workflow);
    let reachable = graph.reachable_from(workflow.entry());
    for name in workflow.step_names() {
        if !reachable.contains(&name) {
            out.push(Diagnostic::Unreachable(name.to_string()));
        }
    }

    out
}
