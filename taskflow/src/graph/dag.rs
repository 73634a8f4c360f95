//! Immutable, validated task graph.

use super::{GraphBuilder, TaskSpec};
use crate::errors::ValidationError;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// A validated directed acyclic graph of tasks.
///
/// Built once by [`GraphBuilder`] and never mutated afterwards, so one graph
/// can be shared (behind an `Arc`) by any number of concurrent runs.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// The graph name.
    name: String,
    /// Task specifications by id.
    tasks: HashMap<String, TaskSpec>,
    /// Insertion order of task ids.
    order: Vec<String>,
    /// Forward edges: task id -> tasks that depend on it.
    dependents: HashMap<String, BTreeSet<String>>,
    /// Topological layers.
    layers: Vec<BTreeSet<String>>,
}

impl TaskGraph {
    /// Validates `tasks` and builds a graph.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the tasks do not form a valid DAG.
    pub fn from_tasks(
        name: impl Into<String>,
        tasks: impl IntoIterator<Item = TaskSpec>,
    ) -> Result<Self, ValidationError> {
        GraphBuilder::new(name).tasks(tasks).build()
    }

    /// Assembles a graph from already validated parts.
    pub(crate) fn from_validated(
        name: String,
        tasks: HashMap<String, TaskSpec>,
        order: Vec<String>,
    ) -> Self {
        let mut dependents: HashMap<String, BTreeSet<String>> =
            order.iter().map(|id| (id.clone(), BTreeSet::new())).collect();
        for (id, spec) in &tasks {
            for dep in &spec.dependencies {
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(id.clone());
                }
            }
        }

        let layers = compute_layers(&tasks, &dependents, &order);

        Self {
            name,
            tasks,
            order,
            dependents,
            layers,
        }
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns a task by id.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    /// Returns true if the graph contains the task.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Task ids in insertion order.
    #[must_use]
    pub fn task_ids(&self) -> &[String] {
        &self.order
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Reverse edges of a task: the tasks it depends on.
    #[must_use]
    pub fn dependencies(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.tasks.get(id).map(|spec| &spec.dependencies)
    }

    /// Forward edges of a task: the tasks that depend on it.
    #[must_use]
    pub fn dependents(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(id)
    }

    /// Tasks with no dependencies.
    #[must_use]
    pub fn roots(&self) -> Vec<&str> {
        self.tasks()
            .filter(|spec| spec.dependencies.is_empty())
            .map(|spec| spec.id.as_str())
            .collect()
    }

    /// Every task reachable from `id` through forward edges, excluding `id`.
    #[must_use]
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            if let Some(next) = self.dependents.get(current) {
                for dependent in next {
                    if seen.insert(dependent.clone()) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        seen
    }

    /// Disjoint layers where layer `k` holds exactly the tasks whose
    /// dependencies all lie in layers `< k`.
    #[must_use]
    pub fn topological_layers(&self) -> &[BTreeSet<String>] {
        &self.layers
    }

    /// Flattened topological order (layer by layer).
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.layers
            .iter()
            .flat_map(|layer| layer.iter().map(String::as_str))
            .collect()
    }
}

/// Kahn's algorithm, one frontier at a time.
fn compute_layers(
    tasks: &HashMap<String, TaskSpec>,
    dependents: &HashMap<String, BTreeSet<String>>,
    order: &[String],
) -> Vec<BTreeSet<String>> {
    let mut in_degree: HashMap<&str, usize> = tasks
        .iter()
        .map(|(id, spec)| (id.as_str(), spec.dependencies.len()))
        .collect();

    let mut frontier: BTreeSet<String> = order
        .iter()
        .filter(|id| in_degree.get(id.as_str()) == Some(&0))
        .cloned()
        .collect();

    let mut layers = Vec::new();
    while !frontier.is_empty() {
        let mut next = BTreeSet::new();
        for id in &frontier {
            let Some(children) = dependents.get(id) else { continue };
            for child in children {
                if let Some(count) = in_degree.get_mut(child.as_str()) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        next.insert(child.clone());
                    }
                }
            }
        }
        layers.push(std::mem::replace(&mut frontier, next));
    }

    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityHandle;
    use pretty_assertions::assert_eq;

    fn task(id: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec::new(id, CapabilityHandle::new("noop", "local")).with_dependencies(deps.iter().copied())
    }

    fn diamond() -> TaskGraph {
        TaskGraph::from_tasks(
            "diamond",
            [
                task("a", &[]),
                task("b", &["a"]),
                task("c", &["a"]),
                task("d", &["b", "c"]),
            ],
        )
        .unwrap()
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_layers_diamond() {
        let graph = diamond();
        assert_eq!(
            graph.topological_layers(),
            &[set(&["a"]), set(&["b", "c"]), set(&["d"])]
        );
    }

    #[test]
    fn test_layers_uneven_depths() {
        let graph = TaskGraph::from_tasks(
            "uneven",
            [
                task("a", &[]),
                task("b", &["a"]),
                task("c", &["b"]),
                task("x", &[]),
                task("y", &["x", "c"]),
            ],
        )
        .unwrap();

        assert_eq!(
            graph.topological_layers(),
            &[set(&["a", "x"]), set(&["b"]), set(&["c"]), set(&["y"])]
        );
    }

    #[test]
    fn test_every_dependency_in_earlier_layer() {
        let graph = diamond();
        let layer_of: HashMap<&str, usize> = graph
            .topological_layers()
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| layer.iter().map(move |id| (id.as_str(), i)))
            .collect();

        assert_eq!(layer_of.len(), graph.len());
        for spec in graph.tasks() {
            for dep in &spec.dependencies {
                assert!(layer_of[dep.as_str()] < layer_of[spec.id.as_str()]);
            }
        }
    }

    #[test]
    fn test_edges_and_descendants() {
        let graph = diamond();

        assert_eq!(graph.dependents("a"), Some(&set(&["b", "c"])));
        assert_eq!(graph.dependencies("d"), Some(&set(&["b", "c"])));
        assert_eq!(graph.descendants("a"), set(&["b", "c", "d"]));
        assert_eq!(graph.descendants("c"), set(&["d"]));
        assert!(graph.descendants("d").is_empty());
        assert_eq!(graph.roots(), vec!["a"]);
    }

    #[test]
    fn test_task_ids_keep_insertion_order() {
        let graph = diamond();
        assert_eq!(graph.task_ids(), &["a", "b", "c", "d"]);
        assert_eq!(graph.topological_order(), vec!["a", "b", "c", "d"]);
    }
}
