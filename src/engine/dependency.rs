// ABOUTME: Expands a root task into a dependency graph and plans its execution
// ABOUTME: Detects cycles, resolves inherited discriminators and reports dependency levels

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::context::TaskConfiguration;
use super::error::{EngineError, Result};
use crate::discriminator::{fingerprint, normalize, ContextId};
use crate::task::Task;

/// One task instance of the graph with its fully resolved configuration
pub struct TaskNode {
    pub index: usize,
    pub task: Arc<dyn Task>,
    pub configuration: TaskConfiguration,
    pub context_id: ContextId,
    /// Node indices of the declared dependencies, in declaration order
    pub dependencies: Vec<usize>,
}

impl TaskNode {
    pub fn task_type(&self) -> &str {
        &self.configuration.task_type
    }
}

pub struct DependencyGraph {
    /// Dependencies always precede their dependents
    nodes: Vec<TaskNode>,
    graph: Graph<usize, ()>,
    node_indices: Vec<NodeIndex>,
}

pub struct ExecutionPlan {
    pub batches: Vec<Vec<usize>>,
    pub total_tasks: usize,
}

#[derive(Default)]
struct Expansion {
    nodes: Vec<TaskNode>,
    visited: HashMap<usize, usize>,
    /// (instance key, declared identity, task type) of the tasks being expanded
    stack: Vec<(usize, ContextId, String)>,
}

fn instance_key(task: &Arc<dyn Task>) -> usize {
    Arc::as_ptr(task) as *const () as usize
}

impl DependencyGraph {
    /// Expand `root` depth first. Shared instances are visited once. Every configuration and
    /// fingerprint is computed here, so malformed graphs fail before anything is stored.
    pub fn from_root(root: Arc<dyn Task>) -> Result<Self> {
        let mut expansion = Expansion::default();
        Self::visit(&root, &mut expansion)?;

        let mut graph = Graph::new();
        let node_indices: Vec<NodeIndex> = expansion
            .nodes
            .iter()
            .map(|node| graph.add_node(node.index))
            .collect();

        for node in &expansion.nodes {
            for &dependency in &node.dependencies {
                graph.add_edge(node_indices[dependency], node_indices[node.index], ());
            }
        }

        Ok(Self {
            nodes: expansion.nodes,
            graph,
            node_indices,
        })
    }

    fn visit(task: &Arc<dyn Task>, expansion: &mut Expansion) -> Result<usize> {
        let key = instance_key(task);
        if let Some(&index) = expansion.visited.get(&key) {
            return Ok(index);
        }

        let task_type = task.task_type().to_string();
        let own = task
            .discriminators()
            .map_err(|source| EngineError::TaskConfiguration {
                task_type: task_type.clone(),
                source,
            })?;
        let declared = fingerprint(
            &task_type,
            &normalize(&own).map_err(|source| EngineError::TaskConfiguration {
                task_type: task_type.clone(),
                source,
            })?,
        );

        // the same instance, or an equally declared one, already being expanded
        if let Some(position) = expansion
            .stack
            .iter()
            .position(|(k, d, _)| *k == key || *d == declared)
        {
            let mut path: Vec<String> = expansion.stack[position..]
                .iter()
                .map(|(_, _, t)| t.clone())
                .collect();
            path.push(task_type);
            return Err(EngineError::CyclicDependency { path });
        }

        expansion.stack.push((key, declared, task_type.clone()));
        let mut dependencies = Vec::new();
        for dependency in task.dependencies() {
            let index = Self::visit(&dependency, expansion)?;
            if !dependencies.contains(&index) {
                dependencies.push(index);
            }
        }
        expansion.stack.pop();

        let mut discriminators = own;
        for &dependency in &dependencies {
            let upstream = &expansion.nodes[dependency].configuration;
            discriminators
                .inherit(&upstream.task_type, &upstream.discriminators)
                .map_err(|source| EngineError::TaskConfiguration {
                    task_type: task_type.clone(),
                    source,
                })?;
        }

        let configuration = TaskConfiguration::new(task_type, discriminators);
        let context_id = configuration.context_id()?;

        let index = expansion.nodes.len();
        expansion.nodes.push(TaskNode {
            index,
            task: Arc::clone(task),
            configuration,
            context_id,
            dependencies,
        });
        expansion.visited.insert(key, index);

        Ok(index)
    }

    /// Check the graph is acyclic and summarize it as dependency levels
    pub fn create_execution_plan(&self) -> Result<ExecutionPlan> {
        toposort(&self.graph, None).map_err(|cycle| EngineError::CyclicDependency {
            path: vec![self.nodes[self.graph[cycle.node_id()]].task_type().to_string()],
        })?;

        Ok(ExecutionPlan {
            batches: self.create_execution_batches(),
            total_tasks: self.nodes.len(),
        })
    }

    /// Group nodes into levels whose dependencies all sit in earlier levels.
    /// Levels describe the graph's shape; execution does not wait on them.
    fn create_execution_batches(&self) -> Vec<Vec<usize>> {
        let mut batches = Vec::new();
        let mut completed: HashSet<NodeIndex> = HashSet::new();
        let mut remaining: Vec<usize> = (0..self.nodes.len()).collect();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<usize>, Vec<usize>) =
                remaining.into_iter().partition(|&index| {
                    self.graph
                        .neighbors_directed(self.node_indices[index], Direction::Incoming)
                        .all(|dep| completed.contains(&dep))
                });

            if ready.is_empty() {
                break;
            }

            completed.extend(ready.iter().map(|&index| self.node_indices[index]));
            batches.push(ready);
            remaining = blocked;
        }

        batches
    }

    pub fn node(&self, index: usize) -> &TaskNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that directly depend on the given node
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        let mut dependents: Vec<usize> = self
            .graph
            .neighbors_directed(self.node_indices[index], Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        dependents.sort_unstable();
        dependents
    }
}

impl ExecutionPlan {
    /// Get the maximum parallelism level (largest batch size)
    pub fn max_parallelism(&self) -> usize {
        self.batches.iter().map(|batch| batch.len()).max().unwrap_or(0)
    }

    /// Get the total number of execution phases
    pub fn execution_depth(&self) -> usize {
        self.batches.len()
    }
}
