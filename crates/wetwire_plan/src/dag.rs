//! Dependency graph over declared resources and resolved jobs.
//!
//! Graphs are keyed by name. A node's `depends_on` lists the names it
//! needs; names that are not nodes of the graph stay on the node but are
//! not edges, so ordering, cycle detection and rendering all skip them.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;
use thiserror::Error;
use wetwire_core::{CoreError, CoreResult, DeclaredResource, Location, ResourceKind, Workflow};

/// Name → names it depends on, in insertion order
pub type DependencyMap = IndexMap<String, Vec<String>>;

/// Ordering failed because the graph is cyclic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
pub struct CycleError {
    /// Closed walk: first and last element are the same node
    pub cycle: Vec<String>,
}

impl From<CycleError> for CoreError {
    fn from(err: CycleError) -> Self {
        CoreError::Validation {
            field: "dependencies".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Order nodes so that every known dependency precedes its dependents.
///
/// Kahn's algorithm; ready nodes are released in insertion order.
///
/// # Errors
///
/// Returns [`CycleError`] with a witness cycle if no such order exists
pub fn topological_sort(graph: &DependencyMap) -> Result<Vec<String>, CycleError> {
    let mut in_degree: IndexMap<&str, usize> = graph.keys().map(|k| (k.as_str(), 0)).collect();
    let mut dependents: IndexMap<&str, Vec<&str>> =
        graph.keys().map(|k| (k.as_str(), Vec::new())).collect();

    for (node, deps) in known_dependencies(graph) {
        for dep in deps {
            if let Some(degree) = in_degree.get_mut(node) {
                *degree += 1;
            }
            if let Some(list) = dependents.get_mut(dep) {
                list.push(node);
            }
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        for dependent in dependents.get(node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if order.len() != graph.len() {
        let cycle = detect_cycles(graph)
            .into_iter()
            .next()
            .unwrap_or_else(|| vec!["unknown".to_string()]);
        return Err(CycleError { cycle });
    }
    Ok(order)
}

/// Known dependencies of every node, duplicates removed, in insertion order
fn known_dependencies(graph: &DependencyMap) -> IndexMap<&str, Vec<&str>> {
    graph
        .iter()
        .map(|(node, deps)| {
            let unique: IndexSet<&str> = deps
                .iter()
                .map(String::as_str)
                .filter(|d| graph.contains_key(*d))
                .collect();
            (node.as_str(), unique.into_iter().collect())
        })
        .collect()
}

/// Find cycles by depth-first search in insertion order
///
/// Each cycle is reported as a closed walk (`a -> b -> a`). Only back edges
/// found during the walk are reported, so a node can appear in several
/// cycles and not every elementary cycle is listed. The walk keeps an
/// explicit stack of `(node, next dependency index)` frames.
#[must_use]
pub fn detect_cycles(graph: &DependencyMap) -> Vec<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let deps = known_dependencies(graph);
    let mut color: IndexMap<&str, Color> = deps.keys().map(|k| (*k, Color::White)).collect();
    let mut cycles = Vec::new();

    for root in deps.keys().copied() {
        if color.get(root) != Some(&Color::White) {
            continue;
        }
        color.insert(root, Color::Grey);
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

        while let Some(&(node, next)) = stack.last() {
            let Some(&dep) = deps.get(node).and_then(|d| d.get(next)) else {
                color.insert(node, Color::Black);
                stack.pop();
                continue;
            };
            if let Some(frame) = stack.last_mut() {
                frame.1 += 1;
            }
            match color.get(dep).copied() {
                Some(Color::White) => {
                    color.insert(dep, Color::Grey);
                    stack.push((dep, 0));
                }
                Some(Color::Grey) => {
                    if let Some(start) = stack.iter().position(|(n, _)| *n == dep) {
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(n, _)| (*n).to_string()).collect();
                        cycle.push(dep.to_string());
                        cycles.push(cycle);
                    }
                }
                Some(Color::Black) | None => {}
            }
        }
    }
    cycles
}

/// A node in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Unique name
    pub id: String,
    /// What the node stands for
    pub kind: ResourceKind,
    /// Names this node depends on
    pub depends_on: Vec<String>,
    /// Where the node was declared, if known
    pub origin: Option<Location>,
}

impl DependencyNode {
    /// Create a node
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            depends_on: Vec::new(),
            origin: None,
        }
    }

    /// Add a dependency
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Set the declaration site
    #[must_use]
    pub fn with_origin(mut self, origin: Location) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// A dependency edge: `to` needs `from`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Dependency
    pub from: String,
    /// Dependent
    pub to: String,
}

/// Dependency graph with optional reusable-workflow call links
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Graph {
    /// Nodes keyed by name
    pub nodes: IndexMap<String, DependencyNode>,
    /// `(caller, callee)` reusable-workflow calls
    pub workflow_calls: Vec<(String, String)>,
}

impl Graph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a dependency map; every key becomes a job node
    #[must_use]
    pub fn from_dependencies(map: &DependencyMap) -> Self {
        let nodes = map
            .iter()
            .map(|(id, deps)| {
                let node = DependencyNode {
                    id: id.clone(),
                    kind: ResourceKind::Job,
                    depends_on: deps.clone(),
                    origin: None,
                };
                (id.clone(), node)
            })
            .collect();
        Self {
            nodes,
            workflow_calls: Vec::new(),
        }
    }

    /// Build from scanned resources
    ///
    /// Dependencies that do not name another resource (helper variables,
    /// imported constants) are dropped. If a name is declared twice the last
    /// declaration wins.
    #[must_use]
    pub fn from_resources(resources: &[DeclaredResource]) -> Self {
        let known: IndexSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();
        let mut graph = Self::new();
        for resource in resources {
            let node = DependencyNode {
                id: resource.name.clone(),
                kind: resource.kind,
                depends_on: resource
                    .dependencies
                    .iter()
                    .filter(|d| known.contains(d.as_str()))
                    .cloned()
                    .collect(),
                origin: Some(Location::source(&resource.file_path, resource.line, 1)),
            };
            graph.nodes.shift_remove(&resource.name);
            graph.nodes.insert(resource.name.clone(), node);
        }
        graph
    }

    /// Add a node
    ///
    /// # Errors
    ///
    /// Returns error if a node with the same id exists
    pub fn add_node(&mut self, node: DependencyNode) -> CoreResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(CoreError::AlreadyExists {
                kind: "node".to_string(),
                id: node.id,
            });
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add every job of a resolved workflow as `workflow/job`
    ///
    /// An empty workflow name is recorded as `unnamed`. Existing nodes with
    /// the same id are replaced.
    pub fn add_workflow(&mut self, workflow: &Workflow, origin: Option<Location>) {
        let prefix = if workflow.name.is_empty() {
            "unnamed"
        } else {
            workflow.name.as_str()
        };
        for (job_id, job) in &workflow.jobs {
            let id = format!("{}/{}", prefix, job_id);
            let node = DependencyNode {
                id: id.clone(),
                kind: ResourceKind::Job,
                depends_on: job.needs.iter().map(|n| format!("{}/{}", prefix, n)).collect(),
                origin: origin.clone(),
            };
            self.nodes.insert(id, node);
        }
        tracing::debug!(workflow = prefix, jobs = workflow.jobs.len(), "added workflow to graph");
    }

    /// Record that `caller` invokes the reusable workflow `callee`
    pub fn add_workflow_call(&mut self, caller: impl Into<String>, callee: impl Into<String>) {
        self.workflow_calls.push((caller.into(), callee.into()));
    }

    /// Name → dependencies view of the graph
    #[must_use]
    pub fn dependency_map(&self) -> DependencyMap {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.depends_on.clone()))
            .collect()
    }

    /// Dependencies of `node` that are nodes of this graph
    fn known_deps<'a>(&'a self, node: &'a DependencyNode) -> impl Iterator<Item = &'a String> + 'a {
        let mut seen = IndexSet::new();
        node.depends_on
            .iter()
            .filter(move |dep| self.nodes.contains_key(dep.as_str()) && seen.insert(dep.as_str()))
    }

    /// All edges between nodes of the graph, dependency first
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        self.nodes
            .values()
            .flat_map(|node| {
                self.known_deps(node).map(move |dep| Edge {
                    from: dep.clone(),
                    to: node.id.clone(),
                })
            })
            .collect()
    }

    /// Dependency order over the graph's nodes
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] if the graph is cyclic
    pub fn topological_sort(&self) -> Result<Vec<String>, CycleError> {
        topological_sort(&self.dependency_map())
    }

    /// Cycles in the graph
    #[must_use]
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        detect_cycles(&self.dependency_map())
    }

    /// Nodes that depend on `id`
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|node| node.depends_on.iter().any(|d| d == id))
            .map(|node| node.id.as_str())
            .collect()
    }

    /// Nodes that `id` depends on
    #[must_use]
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.nodes
            .get(id)
            .map(|node| node.depends_on.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Get node count
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn groups(&self) -> IndexMap<&str, Vec<&DependencyNode>> {
        let mut groups: IndexMap<&str, Vec<&DependencyNode>> = IndexMap::new();
        for (id, node) in &self.nodes {
            let group = match id.split_once('/') {
                Some((workflow, _)) => workflow,
                None => "_default",
            };
            groups.entry(group).or_default().push(node);
        }
        groups
    }

    /// Render as a Mermaid flowchart
    #[must_use]
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD");
        let groups = self.groups();
        let nested = groups.len() > 1;
        let indent = if nested { "        " } else { "    " };

        for (group, nodes) in &groups {
            if nested {
                let _ = write!(out, "\n    subgraph {}[{}]", sanitize_id(group), group);
            }
            for node in nodes.iter().filter(|n| self.known_deps(n).next().is_none()) {
                let _ = write!(
                    out,
                    "\n{}{}[{}]",
                    indent,
                    sanitize_id(&node.id),
                    display_name(&node.id)
                );
            }
            for node in nodes {
                for dep in self.known_deps(node) {
                    let _ = write!(
                        out,
                        "\n{}{} --> {}",
                        indent,
                        sanitize_id(dep),
                        sanitize_id(&node.id)
                    );
                }
            }
            if nested {
                out.push_str("\n    end");
            }
        }

        for (caller, callee) in &self.workflow_calls {
            let _ = write!(
                out,
                "\n    {}([{}]) -.-> {}([{}])",
                sanitize_id(caller),
                caller,
                sanitize_id(callee),
                callee
            );
        }
        out
    }

    /// Render as a Graphviz digraph
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph G {\n    rankdir=TB;\n    node [shape=box];");
        let groups = self.groups();
        let nested = groups.len() > 1;
        let indent = if nested { "        " } else { "    " };

        for (group, nodes) in &groups {
            if nested {
                let _ = write!(
                    out,
                    "\n    subgraph cluster_{} {{\n        label=\"{}\";",
                    sanitize_id(group),
                    group
                );
            }
            for node in nodes {
                let _ = write!(
                    out,
                    "\n{}\"{}\" [label=\"{}\"];",
                    indent,
                    sanitize_id(&node.id),
                    display_name(&node.id)
                );
            }
            for node in nodes {
                for dep in self.known_deps(node) {
                    let _ = write!(
                        out,
                        "\n{}\"{}\" -> \"{}\";",
                        indent,
                        sanitize_id(dep),
                        sanitize_id(&node.id)
                    );
                }
            }
            if nested {
                out.push_str("\n    }");
            }
        }
        out.push_str("\n}");
        out
    }
}

/// Make a name usable as a diagram node id
#[must_use]
pub fn sanitize_id(name: &str) -> String {
    name.replace(['-', ' ', '/'], "_")
}

fn display_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}
