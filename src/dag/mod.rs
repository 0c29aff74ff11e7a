//! Dependency resolver
//!
//! Builds the execution graph from task declarations, rejects unknown
//! references and cycles, and computes execution layers with Kahn's
//! algorithm: layer *k* depends only on layers < *k*, and tasks within one
//! layer are mutually independent, so a layer is a unit of parallel
//! dispatch.
//!
//! Tasks are indexed by both id and name; the canonical identity is the id,
//! and statistics count canonical nodes only.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::TaskConfig;
use crate::error::{Result, SkeinError};

/// A task's place in the dependency graph
#[derive(Debug)]
pub struct TaskNode {
    pub task: Arc<TaskConfig>,
    /// Indices of tasks this node depends on
    pub dependencies: Vec<usize>,
    /// Indices of tasks depending on this node
    pub dependents: Vec<usize>,
    pub in_degree: usize,
    /// Assigned execution layer; -1 until computed
    pub layer: i64,
}

/// A set of mutually independent tasks scheduled together
#[derive(Debug, Clone)]
pub struct ExecutionLayer {
    pub index: usize,
    pub tasks: Vec<Arc<TaskConfig>>,
}

/// Resolver statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub task_count: usize,
    pub edge_count: usize,
    pub layer_count: usize,
    pub layer_sizes: Vec<usize>,
    pub max_parallelism: usize,
}

/// Immutable dependency graph over a workflow's tasks
#[derive(Debug)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    /// id and name (when different) both map to the same node
    index: FxHashMap<String, usize>,
    layers: Vec<ExecutionLayer>,
    edge_count: usize,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

impl TaskGraph {
    /// Build the graph and compute layers
    ///
    /// Fails on unknown depends_on references and on cycles. Cycles are
    /// detected twice: a color-marked DFS up front (so the error can cite
    /// the offending path) and the Kahn count check afterwards.
    pub fn build(tasks: &[Arc<TaskConfig>]) -> Result<Self> {
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        let mut nodes: Vec<TaskNode> = Vec::with_capacity(tasks.len());

        for (i, task) in tasks.iter().enumerate() {
            for key in [task.id.as_str(), task.name.as_str()] {
                if let Some(&other) = index.get(key) {
                    if other != i {
                        return Err(SkeinError::GraphInconsistent {
                            detail: format!("key '{}' maps to more than one task", key),
                        });
                    }
                } else {
                    index.insert(key.to_string(), i);
                }
            }
            nodes.push(TaskNode {
                task: Arc::clone(task),
                dependencies: Vec::new(),
                dependents: Vec::new(),
                in_degree: 0,
                layer: -1,
            });
        }

        // depends_on may reference a task by id or name; both resolve to the
        // same node, so duplicate references collapse to one edge.
        let mut edge_count = 0;
        for (i, task) in tasks.iter().enumerate() {
            let mut seen: FxHashSet<usize> = FxHashSet::default();
            for reference in &task.depends_on {
                let &dep = index.get(reference.as_str()).ok_or_else(|| {
                    SkeinError::UnknownDependency {
                        task: task.id.clone(),
                        reference: reference.clone(),
                    }
                })?;
                if seen.insert(dep) {
                    nodes[dep].dependents.push(i);
                    nodes[i].dependencies.push(dep);
                    nodes[i].in_degree += 1;
                    edge_count += 1;
                }
            }
        }

        let mut graph = Self {
            nodes,
            index,
            layers: Vec::new(),
            edge_count,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(SkeinError::CycleDetected { cycle });
        }
        graph.compute_layers()?;
        graph.verify_layers()?;

        Ok(graph)
    }

    /// Color-marked DFS; returns the cycle path as "a -> b -> a"
    fn find_cycle(&self) -> Option<String> {
        let n = self.nodes.len();
        let mut color = vec![Color::White; n];
        let mut path = Vec::new();

        for start in 0..n {
            if color[start] == Color::White {
                if let Some(cycle) = self.dfs(start, &mut color, &mut path) {
                    let ids: Vec<&str> =
                        cycle.iter().map(|&i| self.nodes[i].task.id.as_str()).collect();
                    return Some(ids.join(" -> "));
                }
            }
        }
        None
    }

    fn dfs(&self, i: usize, color: &mut [Color], path: &mut Vec<usize>) -> Option<Vec<usize>> {
        color[i] = Color::Gray;
        path.push(i);
        for &dep in &self.nodes[i].dependencies {
            match color[dep] {
                Color::Gray => {
                    // Found a back edge; the cycle is the path tail from dep
                    let pos = path.iter().position(|&p| p == dep).unwrap_or(0);
                    let mut cycle = path[pos..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = self.dfs(dep, color, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
        path.pop();
        color[i] = Color::Black;
        None
    }

    /// Kahn's algorithm: peel off zero-in-degree fronts as layers
    fn compute_layers(&mut self) -> Result<()> {
        let n = self.nodes.len();
        let mut remaining: Vec<usize> = self.nodes.iter().map(|node| node.in_degree).collect();
        let mut current: Vec<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut processed = 0;
        let mut layer_index = 0usize;

        while !current.is_empty() {
            processed += current.len();
            let mut next = Vec::new();
            for &i in &current {
                self.nodes[i].layer = layer_index as i64;
                for d in self.nodes[i].dependents.clone() {
                    remaining[d] -= 1;
                    if remaining[d] == 0 {
                        next.push(d);
                    }
                }
            }
            self.layers.push(ExecutionLayer {
                index: layer_index,
                tasks: current
                    .iter()
                    .map(|&i| Arc::clone(&self.nodes[i].task))
                    .collect(),
            });
            current = next;
            layer_index += 1;
        }

        if processed != n {
            return Err(SkeinError::CycleDetected {
                cycle: "circular dependency detected".to_string(),
            });
        }
        Ok(())
    }

    /// Post-computation sanity check: every node assigned, every edge goes
    /// from a lower layer to a higher one.
    fn verify_layers(&self) -> Result<()> {
        for node in &self.nodes {
            if node.layer < 0 {
                return Err(SkeinError::GraphInconsistent {
                    detail: format!("task '{}' was never assigned a layer", node.task.id),
                });
            }
            for &dep in &node.dependencies {
                if self.nodes[dep].layer >= node.layer {
                    return Err(SkeinError::GraphInconsistent {
                        detail: format!(
                            "task '{}' (layer {}) does not follow its dependency '{}' (layer {})",
                            node.task.id, node.layer, self.nodes[dep].task.id, self.nodes[dep].layer
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Ordered execution layers
    pub fn execution_layers(&self) -> &[ExecutionLayer] {
        &self.layers
    }

    /// Topological flatten of the layers
    pub fn task_order(&self) -> Vec<Arc<TaskConfig>> {
        self.layers
            .iter()
            .flat_map(|layer| layer.tasks.iter().cloned())
            .collect()
    }

    pub fn stats(&self) -> GraphStats {
        let layer_sizes: Vec<usize> = self.layers.iter().map(|l| l.tasks.len()).collect();
        GraphStats {
            task_count: self.nodes.len(),
            edge_count: self.edge_count,
            layer_count: self.layers.len(),
            max_parallelism: layer_sizes.iter().copied().max().unwrap_or(0),
            layer_sizes,
        }
    }

    /// Node lookup by id or name
    pub fn node(&self, key: &str) -> Option<&TaskNode> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    /// Canonical ids of a task's direct dependencies
    pub fn dependencies_of(&self, key: &str) -> Vec<&str> {
        self.node(key)
            .map(|node| {
                node.dependencies
                    .iter()
                    .map(|&i| self.nodes[i].task.id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Canonical ids of a task's direct dependents
    pub fn dependents_of(&self, key: &str) -> Vec<&str> {
        self.node(key)
            .map(|node| {
                node.dependents
                    .iter()
                    .map(|&i| self.nodes[i].task.id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}
