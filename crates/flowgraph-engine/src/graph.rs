//! Step graph construction and validation.
//!
//! A step set is accepted only when names are unique, every dependency names
//! a declared step (and, for label dependencies, a label that branch
//! declares), and the dependency relation is acyclic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::ValidationError;
use crate::step::{Dependency, Step};

/// What a dependent needs from one upstream step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRequirement {
    /// The upstream step completed.
    Completion,
    /// The upstream branch completed and selected one of these labels.
    Labels(Vec<String>),
}

impl EdgeRequirement {
    /// Whether an upstream output satisfies this edge.
    pub fn satisfied_by(&self, output: &serde_json::Value) -> bool {
        match self {
            Self::Completion => true,
            Self::Labels(labels) => output
                .as_str()
                .map(|selected| labels.iter().any(|l| l == selected))
                .unwrap_or(false),
        }
    }
}

/// Validated dependency structure, computed once per workflow.
#[derive(Debug, Clone)]
pub struct StepGraph {
    /// Step names in declaration order.
    order: Vec<String>,
    /// For each step, its distinct upstream steps and what it needs from each.
    upstream: HashMap<String, Vec<(String, EdgeRequirement)>>,
    /// For each step, its direct dependents in declaration order.
    downstream: HashMap<String, Vec<String>>,
}

impl StepGraph {
    /// Validate a step set and build its adjacency.
    pub fn build(steps: &[Arc<Step>]) -> Result<Self, ValidationError> {
        if steps.is_empty() {
            return Err(ValidationError::Empty);
        }

        // Uniqueness
        let mut by_name: HashMap<&str, &Step> = HashMap::new();
        for step in steps {
            if by_name.insert(step.name(), step).is_some() {
                return Err(ValidationError::DuplicateStep {
                    name: step.name().to_string(),
                });
            }
        }

        // Referential integrity
        for step in steps {
            for dep in step.dependencies() {
                let Some(target) = by_name.get(dep.target()) else {
                    return Err(ValidationError::UnknownDependency {
                        step: step.name().to_string(),
                        dependency: dep.target().to_string(),
                    });
                };
                if let Dependency::Label { branch, label } = dep {
                    let declared = target
                        .branch_labels()
                        .map(|labels| labels.iter().any(|l| l == label))
                        .unwrap_or(false);
                    if !declared {
                        return Err(ValidationError::UnknownBranchLabel {
                            step: step.name().to_string(),
                            branch: branch.clone(),
                            label: label.clone(),
                        });
                    }
                }
            }
        }

        let order: Vec<String> = steps.iter().map(|s| s.name().to_string()).collect();
        let mut upstream: HashMap<String, Vec<(String, EdgeRequirement)>> = HashMap::new();
        let mut downstream: HashMap<String, Vec<String>> =
            order.iter().map(|n| (n.clone(), Vec::new())).collect();

        for step in steps {
            let edges = merge_dependencies(step.dependencies());
            for (target, _) in &edges {
                if let Some(list) = downstream.get_mut(target) {
                    list.push(step.name().to_string());
                }
            }
            upstream.insert(step.name().to_string(), edges);
        }

        let graph = Self {
            order,
            upstream,
            downstream,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(ValidationError::CyclicDependency { cycle });
        }

        Ok(graph)
    }

    /// Step names in declaration order.
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, step: &str) -> bool {
        self.upstream.contains_key(step)
    }

    /// Distinct steps `step` waits on, in declaration order.
    pub fn dependencies(&self, step: &str) -> Vec<&str> {
        self.upstream(step).iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Steps that directly wait on `step`.
    pub fn dependents(&self, step: &str) -> &[String] {
        self.downstream.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps with no dependencies.
    pub fn entry_steps(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|n| self.upstream(n).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// One valid execution order. Ties resolve in declaration order.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|n| (n.as_str(), self.upstream(n).len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();

        let mut result = Vec::with_capacity(self.order.len());
        while let Some(name) = queue.pop_front() {
            result.push(name);
            for dependent in self.dependents(name) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        result
    }

    pub(crate) fn upstream(&self, step: &str) -> &[(String, EdgeRequirement)] {
        self.upstream.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// What `dependent` needs from `upstream_step`, if it depends on it.
    pub(crate) fn requirement(&self, upstream_step: &str, dependent: &str) -> Option<&EdgeRequirement> {
        self.upstream(dependent)
            .iter()
            .find(|(n, _)| n == upstream_step)
            .map(|(_, r)| r)
    }

    /// Depth-first search for a cycle along dependency edges. Returns the
    /// cycle's names in traversal order, closed with the first name repeated.
    ///
    /// Walks with an explicit frame stack, so chain length is bounded by the
    /// heap rather than the thread stack.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            Visiting,
            Visited,
        }

        let mut state: HashMap<&str, State> = self
            .order
            .iter()
            .map(|n| (n.as_str(), State::Unvisited))
            .collect();
        // (step, index of the next upstream edge to follow); the names on the
        // stack are the current DFS path.
        let mut frames: Vec<(&str, usize)> = Vec::new();

        for root in &self.order {
            if state.get(root.as_str()) != Some(&State::Unvisited) {
                continue;
            }
            state.insert(root.as_str(), State::Visiting);
            frames.push((root.as_str(), 0));

            while let Some(&(node, next)) = frames.last() {
                let upstream = self.upstream(node);
                if next == upstream.len() {
                    frames.pop();
                    state.insert(node, State::Visited);
                    continue;
                }
                let top = frames.len() - 1;
                frames[top].1 += 1;

                let dep = upstream[next].0.as_str();
                match state.get(dep).copied().unwrap_or(State::Unvisited) {
                    State::Visiting => {
                        let start = frames.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            frames[start..].iter().map(|(n, _)| n.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    State::Unvisited => {
                        state.insert(dep, State::Visiting);
                        frames.push((dep, 0));
                    }
                    State::Visited => {}
                }
            }
        }
        None
    }
}

/// Collapse a step's dependency list into one requirement per upstream step.
///
/// Any label dependency on a branch makes that edge label-gated; several labels
/// on the same branch are alternatives.
fn merge_dependencies(deps: &[Dependency]) -> Vec<(String, EdgeRequirement)> {
    let mut edges: Vec<(String, EdgeRequirement)> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for dep in deps {
        let target = dep.target();
        if seen.insert(target) {
            edges.push((target.to_string(), EdgeRequirement::Completion));
        }
        if let Dependency::Label { label, .. } = dep {
            if let Some((_, req)) = edges.iter_mut().find(|(n, _)| n == target) {
                match req {
                    EdgeRequirement::Completion => *req = EdgeRequirement::Labels(vec![label.clone()]),
                    EdgeRequirement::Labels(labels) => {
                        if !labels.contains(label) {
                            labels.push(label.clone());
                        }
                    }
                }
            }
        }
    }
    edges
}
