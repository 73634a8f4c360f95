//! Graph builder with validation.

use super::{TaskGraph, TaskSpec};
use crate::errors::{CycleDetectedError, ValidationError};
use std::collections::{HashMap, HashSet};

/// Builder for validated task graphs.
///
/// Dependencies can be declared on each [`TaskSpec`] or added as separate
/// edges; both end up in the same dependency sets.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    /// The graph name.
    name: String,
    /// Tasks in insertion order.
    tasks: Vec<TaskSpec>,
    /// Extra `(dependency, dependent)` edges.
    edges: Vec<(String, String)>,
}

impl GraphBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a task.
    #[must_use]
    pub fn task(mut self, spec: TaskSpec) -> Self {
        self.tasks.push(spec);
        self
    }

    /// Adds several tasks.
    #[must_use]
    pub fn tasks(mut self, specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.tasks.extend(specs);
        self
    }

    /// Declares that `dependent` runs only after `dependency` succeeded.
    #[must_use]
    pub fn edge(mut self, dependency: impl Into<String>, dependent: impl Into<String>) -> Self {
        self.edges.push((dependency.into(), dependent.into()));
        self
    }

    /// Returns the number of tasks added so far.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Validates and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for empty or duplicate ids, edges or
    /// dependencies naming unknown tasks, self-dependencies, or a cycle. For a
    /// cycle, exactly one offending cycle is reported.
    pub fn build(self) -> Result<TaskGraph, ValidationError> {
        let mut order = Vec::with_capacity(self.tasks.len());
        let mut tasks: HashMap<String, TaskSpec> = HashMap::with_capacity(self.tasks.len());

        for spec in self.tasks {
            if spec.id.trim().is_empty() {
                return Err(ValidationError::EmptyTaskId);
            }
            if tasks.contains_key(&spec.id) {
                return Err(ValidationError::DuplicateTask { task: spec.id });
            }
            order.push(spec.id.clone());
            tasks.insert(spec.id.clone(), spec);
        }

        for (dependency, dependent) in self.edges {
            if !tasks.contains_key(&dependency) {
                return Err(ValidationError::UnknownDependency {
                    task: dependent,
                    dependency,
                });
            }
            match tasks.get_mut(&dependent) {
                Some(spec) => {
                    spec.dependencies.insert(dependency);
                }
                None => return Err(ValidationError::UnknownTask { task: dependent }),
            }
        }

        for id in &order {
            let Some(spec) = tasks.get(id) else { continue };
            for dep in &spec.dependencies {
                if dep == id {
                    return Err(ValidationError::SelfDependency { task: id.clone() });
                }
                if !tasks.contains_key(dep) {
                    return Err(ValidationError::UnknownDependency {
                        task: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        detect_cycle(&tasks, &order)?;

        Ok(TaskGraph::from_validated(self.name, tasks, order))
    }
}

/// Depth-first search over dependency edges; returns the first cycle found.
fn detect_cycle(tasks: &HashMap<String, TaskSpec>, order: &[String]) -> Result<(), CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for id in order {
        if !visited.contains(id.as_str()) {
            if let Some(cycle) = dfs_cycle(id, tasks, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(cycle));
            }
        }
    }

    Ok(())
}

fn dfs_cycle<'a>(
    node: &'a str,
    tasks: &'a HashMap<String, TaskSpec>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(spec) = tasks.get(node) {
        for dep in &spec.dependencies {
            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = dfs_cycle(dep, tasks, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep.as_str()) {
                let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityHandle;

    fn task(id: &str) -> TaskSpec {
        TaskSpec::new(id, CapabilityHandle::new("noop", "local"))
    }

    #[test]
    fn test_build_with_edges_and_declared_deps() {
        let graph = GraphBuilder::new("etl")
            .task(task("extract"))
            .task(task("transform").depends_on("extract"))
            .task(task("load"))
            .edge("transform", "load")
            .build()
            .unwrap();

        assert_eq!(graph.len(), 3);
        assert!(graph.dependencies("load").unwrap().contains("transform"));
    }

    #[test]
    fn test_empty_graph_is_valid() {
        let graph = GraphBuilder::new("empty").build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_layers().is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let err = GraphBuilder::new("loop")
            .task(task("a").depends_on("c"))
            .task(task("b").depends_on("a"))
            .task(task("c").depends_on("b"))
            .build()
            .unwrap_err();

        match err {
            ValidationError::CycleDetected(cycle) => {
                assert_eq!(cycle.cycle_path.first(), cycle.cycle_path.last());
                assert_eq!(cycle.cycle_path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_reports_only_one_cycle() {
        let err = GraphBuilder::new("two-loops")
            .task(task("a").depends_on("b"))
            .task(task("b").depends_on("a"))
            .task(task("x").depends_on("y"))
            .task(task("y").depends_on("x"))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), "GRAPH-CYCLE");
        let tasks = err.tasks();
        assert!(tasks.iter().all(|t| t == "a" || t == "b"));
    }

    #[test]
    fn test_self_dependency() {
        let err = GraphBuilder::new("g")
            .task(task("a").depends_on("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::SelfDependency { task: "a".to_string() });
    }

    #[test]
    fn test_unknown_dependency() {
        let err = GraphBuilder::new("g")
            .task(task("load").depends_on("extract"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "GRAPH-MISSING-DEP");
    }

    #[test]
    fn test_edge_to_unknown_task() {
        let err = GraphBuilder::new("g")
            .task(task("a"))
            .edge("a", "ghost")
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownTask { task: "ghost".to_string() });
    }

    #[test]
    fn test_duplicate_and_empty_ids() {
        let dup = GraphBuilder::new("g")
            .task(task("a"))
            .task(task("a"))
            .build()
            .unwrap_err();
        assert_eq!(dup.code(), "GRAPH-DUPLICATE");

        let empty = GraphBuilder::new("g").task(task("  ")).build().unwrap_err();
        assert_eq!(empty, ValidationError::EmptyTaskId);
    }
}
