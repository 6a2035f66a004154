//! Dependency resolution shared by workflows and compositions
//!
//! Builds a graph from `depends_on` edges (plus `node.field` mapping sources
//! for composition nodes) and offers a Kahn total order, a dependency
//! leveling for fan-out/fan-in execution and a DFS cycle finder.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::config::validator::ValidationError;
use crate::domain::{CompositionNode, WorkflowStep};

/// Anything that can sit in a dependency graph
pub trait GraphNode {
    fn node_id(&self) -> &str;
    fn dependencies(&self) -> Vec<&str>;
}

impl GraphNode for WorkflowStep {
    fn node_id(&self) -> &str {
        &self.step_id
    }

    fn dependencies(&self) -> Vec<&str> {
        self.depends_on.iter().map(String::as_str).collect()
    }
}

impl GraphNode for CompositionNode {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Explicit dependencies plus every node read through an input mapping
    fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self.depends_on.iter().map(String::as_str).collect();
        for source in self.mapped_sources() {
            if !source.is_empty() && !deps.contains(&source) {
                deps.push(source);
            }
        }
        deps
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node ids in declaration order
    ids: Vec<String>,
    deps: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn from_nodes<N: GraphNode>(nodes: &[N]) -> Self {
        let mut ids = Vec::with_capacity(nodes.len());
        let mut deps = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let id = node.node_id().to_string();
            if deps.contains_key(&id) {
                continue;
            }
            deps.insert(
                id.clone(),
                node.dependencies().into_iter().map(str::to_string).collect(),
            );
            ids.push(id);
        }
        Self { ids, deps }
    }

    /// Same nodes restricted to `keep`, dropping edges that leave the subset
    pub fn subgraph(&self, keep: &[String]) -> Self {
        let keep_set: HashSet<&String> = keep.iter().collect();
        let ids: Vec<String> = self
            .ids
            .iter()
            .filter(|id| keep_set.contains(id))
            .cloned()
            .collect();
        let deps = ids
            .iter()
            .map(|id| {
                let inner = self.deps[id]
                    .iter()
                    .filter(|d| keep_set.contains(d))
                    .cloned()
                    .collect();
                (id.clone(), inner)
            })
            .collect();
        Self { ids, deps }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.deps.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every `(node, missing dependency)` pair
    pub fn unknown_dependencies(&self) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        for id in &self.ids {
            for dep in &self.deps[id] {
                if !self.deps.contains_key(dep) {
                    missing.push((id.clone(), dep.clone()));
                }
            }
        }
        missing
    }

    /// Kahn's algorithm, stable with respect to declaration order.
    ///
    /// Unknown dependencies are ignored here; validation reports them.
    pub fn topological_order(&self) -> Result<Vec<String>, ValidationError> {
        let order = self.kahn();
        if order.len() < self.ids.len() {
            let placed: HashSet<&String> = order.iter().collect();
            let path = self.find_cycle().unwrap_or_else(|| {
                self.ids
                    .iter()
                    .filter(|id| !placed.contains(id))
                    .cloned()
                    .collect()
            });
            return Err(ValidationError::Cycle(path));
        }
        Ok(order)
    }

    /// True when Kahn's algorithm cannot place every node
    pub fn has_cycle(&self) -> bool {
        self.kahn().len() < self.ids.len()
    }

    /// Kahn's algorithm picking the earliest-declared ready node each time,
    /// so a graph without forward edges keeps declaration order.
    fn kahn(&self) -> Vec<String> {
        let position: HashMap<&str, usize> = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut in_degree: Vec<usize> = vec![0; self.ids.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.ids.len()];

        for (i, id) in self.ids.iter().enumerate() {
            for dep in &self.deps[id] {
                if let Some(&d) = position.get(dep.as_str()) {
                    in_degree[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.ids.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(i) = ready.pop_first() {
            order.push(self.ids[i].clone());
            for &child in &dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        order
    }

    /// Depth-first search with a recursion stack; returns the cycle path
    /// (first node repeated at the end) when one exists.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = Vec::new();

        for id in &self.ids {
            if !visited.contains(id.as_str()) {
                if let Some(path) = self.visit(id, &mut visited, &mut rec_stack) {
                    return Some(path);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        rec_stack.push(id);

        if let Some(deps) = self.deps.get(id) {
            for dep in deps {
                if !self.deps.contains_key(dep) {
                    continue;
                }
                if let Some(pos) = rec_stack.iter().position(|s| *s == dep.as_str()) {
                    let mut path: Vec<String> =
                        rec_stack[pos..].iter().map(|s| s.to_string()).collect();
                    path.push(dep.clone());
                    return Some(path);
                }
                if !visited.contains(dep.as_str()) {
                    if let Some(path) = self.visit(dep, visited, rec_stack) {
                        return Some(path);
                    }
                }
            }
        }

        rec_stack.pop();
        None
    }

    /// `level(n) = 0` without dependencies, otherwise `1 + max(level(dep))`.
    ///
    /// Levels are computed once over the topological order. Within a level,
    /// nodes keep their declaration order.
    pub fn level_grouping(&self) -> Result<BTreeMap<usize, Vec<String>>, ValidationError> {
        let order = self.topological_order()?;
        let mut level_of: HashMap<&str, usize> = HashMap::with_capacity(order.len());

        for id in &order {
            let level = self.deps[id]
                .iter()
                .filter_map(|d| level_of.get(d.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(id.as_str(), level);
        }

        let mut levels: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for id in &self.ids {
            levels.entry(level_of[id.as_str()]).or_default().push(id.clone());
        }
        Ok(levels)
    }
}

/// Structural checks shared by workflow and composition registration:
/// duplicate ids, dependencies on unknown nodes and cycles.
pub fn validate_graph<N: GraphNode>(owner: &str, nodes: &[N]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for node in nodes {
        if node.node_id().is_empty() {
            errors.push(ValidationError::MissingField(format!("{}.node_id", owner)));
        }
        if !seen.insert(node.node_id()) {
            errors.push(ValidationError::Duplicate(format!(
                "{} declares '{}' more than once",
                owner,
                node.node_id()
            )));
        }
    }

    let graph = DependencyGraph::from_nodes(nodes);
    for (node, dep) in graph.unknown_dependencies() {
        errors.push(ValidationError::UnknownDependency {
            owner: format!("{}.{}", owner, node),
            dependency: dep,
        });
    }

    if let Some(path) = graph.find_cycle() {
        errors.push(ValidationError::Cycle(path));
    } else if graph.has_cycle() {
        // Both checks walk the same edges; reaching this means they disagree.
        tracing::error!(owner, "Kahn order found a cycle the DFS check missed");
        errors.push(ValidationError::Cycle(Vec::new()));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentRole;

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep::new(id, "agent", "cap").depends_on(deps.iter().copied())
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|s| s == id).unwrap()
    }

    #[test]
    fn test_topological_order_places_dependencies_first() {
        let steps = vec![
            step("report", &["coach", "nutrition"]),
            step("coach", &["sensor"]),
            step("sensor", &[]),
            step("nutrition", &[]),
        ];
        let order = DependencyGraph::from_nodes(&steps).topological_order().unwrap();

        assert_eq!(order.len(), 4);
        for s in &steps {
            for dep in &s.depends_on {
                assert!(position(&order, dep) < position(&order, &s.step_id));
            }
        }
        // Earliest-declared ready node goes first
        assert_eq!(order, vec!["sensor", "coach", "nutrition", "report"]);
    }

    #[test]
    fn test_topological_order_keeps_declaration_order_without_forward_edges() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &[]), step("d", &["b", "c"])];
        let order = DependencyGraph::from_nodes(&steps).topological_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_level_grouping() {
        let steps = vec![
            step("a", &[]),
            step("b", &[]),
            step("c", &["a"]),
            step("d", &["a", "c"]),
            step("e", &["b"]),
        ];
        let graph = DependencyGraph::from_nodes(&steps);
        let levels = graph.level_grouping().unwrap();

        assert_eq!(levels[&0], vec!["a", "b"]);
        assert_eq!(levels[&1], vec!["c", "e"]);
        assert_eq!(levels[&2], vec!["d"]);
        assert_eq!(graph.level_grouping().unwrap(), levels);
    }

    #[test]
    fn test_cycle_detected_by_both_checks() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"]), step("d", &[])];
        let graph = DependencyGraph::from_nodes(&steps);

        assert!(graph.has_cycle());
        let path = graph.find_cycle().unwrap();
        assert_eq!(path.first(), path.last());
        assert!(matches!(graph.topological_order(), Err(ValidationError::Cycle(_))));
        assert!(graph.level_grouping().is_err());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let steps = vec![step("loop", &["loop"])];
        let graph = DependencyGraph::from_nodes(&steps);

        assert_eq!(graph.find_cycle(), Some(vec!["loop".to_string(), "loop".to_string()]));
        assert!(graph.has_cycle());
    }

    #[test]
    fn test_validate_graph_reports_unknown_and_duplicate() {
        let steps = vec![step("a", &["ghost"]), step("a", &[])];
        let errors = validate_graph("workflow", &steps);

        assert!(errors.iter().any(|e| matches!(e, ValidationError::Duplicate(_))));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::UnknownDependency { dependency, .. } if dependency == "ghost"
        )));
    }

    #[test]
    fn test_composition_mapping_sources_are_edges() {
        let nodes = vec![
            CompositionNode::new("coach", "ai-coach", AgentRole::Aggregator)
                .map_input("muscle_data", "sensor.muscle_zones"),
            CompositionNode::new("sensor", "fabric", AgentRole::Primary),
        ];
        let order = DependencyGraph::from_nodes(&nodes).topological_order().unwrap();
        assert_eq!(order, vec!["sensor", "coach"]);
    }

    #[test]
    fn test_subgraph_drops_external_edges() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let graph = DependencyGraph::from_nodes(&steps);
        let sub = graph.subgraph(&["b".to_string(), "c".to_string()]);

        let levels = sub.level_grouping().unwrap();
        assert_eq!(levels[&0], vec!["b"]);
        assert_eq!(levels[&1], vec!["c"]);
        assert_eq!(sub.len(), 2);
    }
}
