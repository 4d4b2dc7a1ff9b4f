//! Dependency graph over atom names.
//!
//! An edge `a -> b` means `b` depends on `a`. Construction rejects unresolved
//! references and cycles, so every [`DependencyGraph`] is a valid DAG.

use crate::error::{Result, WorkflowError};
use crate::registry::AtomRegistry;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
    dependencies: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    /// Builds the graph from the registry's effective dependencies.
    pub fn build(registry: &AtomRegistry) -> Result<Self> {
        let mut graph = DiGraph::<String, ()>::new();
        let mut node_map = HashMap::new();
        let mut dependencies = HashMap::new();

        // Node indices follow registration order; the topological tie-break relies on it.
        for atom in registry.iter() {
            let node = graph.add_node(atom.name.clone());
            node_map.insert(atom.name.clone(), node);
        }

        for atom in registry.iter() {
            let deps = registry.dependencies_of(atom);
            for dep in &deps {
                let from = node_map
                    .get(dep)
                    .ok_or_else(|| WorkflowError::UnresolvedDependency {
                        atom: atom.name.clone(),
                        dependency: dep.clone(),
                    })?;
                graph.update_edge(*from, node_map[&atom.name], ());
            }
            dependencies.insert(atom.name.clone(), deps);
        }

        let mut dag = Self {
            graph,
            node_map,
            dependencies,
            order: Vec::new(),
        };
        dag.order = dag.sort()?;
        Ok(dag)
    }

    /// Deterministic execution order: among atoms that are ready, the one
    /// registered first goes first.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents of an atom, in registration order.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let Some(&node) = self.node_map.get(name) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every atom transitively depending on any atom of `changed`.
    /// Seeds are only included when another seed reaches them.
    pub fn downstream_of<'a, I>(&self, changed: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut reached = BTreeSet::new();
        for name in changed {
            let Some(&start) = self.node_map.get(name) else {
                continue;
            };
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node) = bfs.next(&self.graph) {
                if node != start {
                    reached.insert(self.graph[node].clone());
                }
            }
        }
        reached
    }

    /// Every atom the given atom transitively depends on.
    pub fn upstream_of(&self, name: &str) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let Some(&start) = self.node_map.get(name) else {
            return reached;
        };
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        while let Some(node) = bfs.next(reversed) {
            if node != start {
                reached.insert(self.graph[node].clone());
            }
        }
        reached
    }

    /// Groups the topological order by depth; atoms within a level have no
    /// dependency on each other.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut node_levels: HashMap<NodeIndex, usize> = HashMap::new();

        for name in &self.order {
            let node = self.node_map[name];
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|pred| node_levels.get(&pred))
                .max()
                .map(|&l| l + 1)
                .unwrap_or(0);

            node_levels.insert(node, level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(name.clone());
        }

        levels
    }

    // Kahn's algorithm with a min-heap on registration index.
    fn sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                let deps: HashSet<NodeIndex> =
                    self.graph.neighbors_directed(n, Direction::Incoming).collect();
                (n, deps.len())
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&n, _)| Reverse(n))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.graph[node].clone());

            let dependents: HashSet<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .collect();
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let processed: HashSet<&String> = order.iter().collect();
            let mut unprocessed: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|n| !processed.contains(&self.graph[*n]))
                .collect();
            unprocessed.sort();

            let cycle = self
                .find_cycle(&unprocessed)
                .unwrap_or_else(|| unprocessed.iter().map(|n| self.graph[*n].clone()).collect());
            return Err(WorkflowError::CyclicDependency { cycle });
        }

        Ok(order)
    }

    fn find_cycle(&self, start_nodes: &[NodeIndex]) -> Option<Vec<String>> {
        for &start in start_nodes {
            let mut visited = HashSet::new();
            let mut path = Vec::new();

            if let Some(cycle) = self.dfs_find_cycle(start, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_find_cycle(
        &self,
        node: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        if let Some(cycle_start) = path.iter().position(|&n| n == node) {
            let mut cycle: Vec<String> = path[cycle_start..]
                .iter()
                .map(|n| self.graph[*n].clone())
                .collect();
            cycle.push(self.graph[node].clone());
            return Some(cycle);
        }

        if !visited.insert(node) {
            return None;
        }

        path.push(node);
        let mut neighbors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        neighbors.sort();
        for neighbor in neighbors {
            if let Some(cycle) = self.dfs_find_cycle(neighbor, visited, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }
}
