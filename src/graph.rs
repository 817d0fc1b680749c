use std::collections::HashMap;
use std::io;

use crate::NodeId;

/// Execution status of a node. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    #[default]
    Pending,
    Success,
    Errored,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A vertex of the graph: one schedulable unit of work.
///
/// Neighbours are stored by id in insertion order; the owning [`Dag`] keeps
/// `incoming` and `outgoing` consistent across nodes.
#[derive(Debug, Clone)]
pub struct Node<T, R> {
    id: T,
    result: Option<R>,
    status: NodeStatus,
    incoming: Vec<T>,
    outgoing: Vec<T>,
    retry_attempts: u32,
}

impl<T: NodeId, R> Node<T, R> {
    pub fn new(id: T) -> Self {
        Self {
            id,
            result: None,
            status: NodeStatus::Pending,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            retry_attempts: 0,
        }
    }

    pub fn id(&self) -> &T {
        &self.id
    }

    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn incoming(&self) -> &[T] {
        &self.incoming
    }

    pub fn outgoing(&self) -> &[T] {
        &self.outgoing
    }

    /// Retries already spent on this node in the current run.
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn is_pending(&self) -> bool {
        self.status == NodeStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }

    pub fn is_errored(&self) -> bool {
        self.status == NodeStatus::Errored
    }

    pub fn is_skipped(&self) -> bool {
        self.status == NodeStatus::Skipped
    }

    pub(crate) fn set_success(&mut self, result: Option<R>) {
        self.result = result;
        self.status = NodeStatus::Success;
    }

    pub(crate) fn set_errored(&mut self) {
        self.status = NodeStatus::Errored;
    }

    pub(crate) fn set_skipped(&mut self) {
        self.status = NodeStatus::Skipped;
    }

    pub(crate) fn record_retry(&mut self) -> u32 {
        self.retry_attempts += 1;
        self.retry_attempts
    }

    fn add_incoming(&mut self, id: &T) {
        if !self.incoming.contains(id) {
            self.incoming.push(id.clone());
        }
    }

    fn add_outgoing(&mut self, id: &T) {
        if !self.outgoing.contains(id) {
            self.outgoing.push(id.clone());
        }
    }
}

impl<T: PartialEq, R> PartialEq for Node<T, R> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Eq, R> Eq for Node<T, R> {}

/// Directed graph of nodes keyed by id, enumerated in creation order.
///
/// Acyclicity is not enforced here; see [`crate::has_cycle`] for a check
/// callers can run themselves.
#[derive(Debug, Clone)]
pub struct Dag<T, R> {
    nodes: Vec<Node<T, R>>,
    index: HashMap<T, usize>,
}

impl<T: NodeId, R> Default for Dag<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NodeId, R> Dag<T, R> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn add_independent(&mut self, id: T) {
        self.add_or_get(id);
    }

    /// Declares that `first` must finish before `later` starts.
    ///
    /// Duplicate edges and self-dependencies are ignored.
    pub fn add_dependency(&mut self, first: T, later: T) {
        let first = self.add_or_get(first);
        let later = self.add_or_get(later);
        if first == later {
            return;
        }

        let later_id = self.nodes[later].id.clone();
        let first_id = self.nodes[first].id.clone();
        self.nodes[first].add_outgoing(&later_id);
        self.nodes[later].add_incoming(&first_id);
    }

    /// Makes `id` a predecessor of every node that currently has none.
    pub fn add_as_dependency_to_all_initial_nodes(&mut self, id: T) {
        if self.is_empty() {
            self.add_independent(id);
            return;
        }

        let initial: Vec<T> = self.initial_nodes().map(|n| n.id.clone()).collect();
        for node in initial {
            self.add_dependency(id.clone(), node);
        }
    }

    /// Makes `id` depend on every node that currently has no dependents.
    pub fn add_as_dependent_on_all_leaf_nodes(&mut self, id: T) {
        if self.is_empty() {
            self.add_independent(id);
            return;
        }

        let leaves: Vec<T> = self.leaf_nodes().map(|n| n.id.clone()).collect();
        for node in leaves {
            self.add_dependency(node, id.clone());
        }
    }

    pub fn initial_nodes(&self) -> impl Iterator<Item = &Node<T, R>> {
        self.nodes.iter().filter(|n| n.incoming.is_empty())
    }

    pub fn leaf_nodes(&self) -> impl Iterator<Item = &Node<T, R>> {
        self.nodes.iter().filter(|n| n.outgoing.is_empty())
    }

    pub fn get(&self, id: &T) -> Option<&Node<T, R>> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn get_mut(&mut self, id: &T) -> Option<&mut Node<T, R>> {
        self.index.get(id).map(|&i| &mut self.nodes[i])
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &Node<T, R>> {
        self.nodes.iter()
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Writes every path from an initial node to a leaf, one node per line
    /// with its direct predecessors in brackets.
    pub fn print<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let mut index = 0;
        for root in self.initial_nodes() {
            let mut path = vec![root.id.clone()];
            self.print_paths(&mut path, out, &mut index)?;
        }
        Ok(())
    }

    fn print_paths<W: io::Write>(
        &self,
        path: &mut Vec<T>,
        out: &mut W,
        index: &mut usize,
    ) -> io::Result<()> {
        let Some(node) = path.last().and_then(|id| self.get(id)) else {
            return Ok(());
        };

        let next: Vec<&T> = node.outgoing.iter().filter(|id| !path.contains(id)).collect();
        if next.is_empty() {
            writeln!(out, "Path #{}", index)?;
            for id in path.iter() {
                let preds = self
                    .get(id)
                    .map(|n| {
                        n.incoming
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                writeln!(out, "{}[{}] ", id, preds)?;
            }
            writeln!(out)?;
            *index += 1;
            return Ok(());
        }

        for id in next {
            path.push(id.clone());
            self.print_paths(path, out, index)?;
            path.pop();
        }
        Ok(())
    }

    fn add_or_get(&mut self, id: T) -> usize {
        if let Some(&i) = self.index.get(&id) {
            return i;
        }
        let i = self.nodes.len();
        self.index.insert(id.clone(), i);
        self.nodes.push(Node::new(id));
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<'a>(nodes: impl Iterator<Item = &'a Node<i32, i32>>) -> Vec<i32> {
        nodes.map(|n| *n.id()).collect()
    }

    fn sample() -> Dag<i32, i32> {
        let mut graph = Dag::new();
        graph.add_independent(1);
        graph.add_dependency(1, 2);
        graph.add_independent(3);
        graph.add_dependency(1, 3);
        graph
    }

    #[test]
    fn add_as_dependency_to_all_initial_nodes() {
        let mut graph: Dag<i32, i32> = Dag::new();
        graph.add_as_dependency_to_all_initial_nodes(1);
        assert_eq!(graph.size(), 1);

        graph.add_dependency(1, 2);
        graph.add_as_dependency_to_all_initial_nodes(1);
        assert_eq!(graph.size(), 2);
        assert!(graph.get(&1).unwrap().incoming().is_empty());

        graph.add_independent(3);
        graph.add_as_dependency_to_all_initial_nodes(0);
        assert_eq!(ids(graph.initial_nodes()), vec![0]);
        assert_eq!(graph.get(&0).unwrap().outgoing(), &[1, 3]);
    }

    #[test]
    fn add_as_dependent_on_all_leaf_nodes() {
        let mut graph: Dag<i32, i32> = Dag::new();
        graph.add_as_dependent_on_all_leaf_nodes(1);
        assert_eq!(graph.size(), 1);

        graph.add_dependency(1, 2);
        graph.add_as_dependent_on_all_leaf_nodes(1);
        assert_eq!(graph.size(), 2);

        let mut graph: Dag<i32, i32> = Dag::new();
        graph.add_dependency(1, 2);
        graph.add_independent(3);
        graph.add_as_dependent_on_all_leaf_nodes(4);
        assert_eq!(ids(graph.leaf_nodes()), vec![4]);
        assert_eq!(graph.get(&4).unwrap().incoming(), &[2, 3]);
    }

    #[test]
    fn only_pending_is_not_terminal() {
        assert!(!NodeStatus::Pending.is_terminal());
        assert!(NodeStatus::Success.is_terminal());
        assert!(NodeStatus::Errored.is_terminal());
        assert!(NodeStatus::Skipped.is_terminal());
        assert_eq!(NodeStatus::default(), NodeStatus::Pending);
    }

    #[test]
    fn node_equality_is_by_id() {
        let mut a: Node<i32, i32> = Node::new(1);
        a.set_success(Some(10));
        let b: Node<i32, i32> = Node::new(1);
        assert_eq!(a, b);
        assert_ne!(a, Node::new(2));
    }

    #[test]
    fn self_dependency_is_ignored() {
        let mut graph: Dag<i32, i32> = Dag::new();
        graph.add_independent(1);
        graph.add_dependency(1, 1);
        assert_eq!(graph.size(), 1);
        assert!(graph.get(&1).unwrap().outgoing().is_empty());

        graph.add_dependency(1, 3);
        assert_eq!(graph.size(), 2);
    }

    #[test]
    fn duplicate_dependency_is_idempotent() {
        let mut graph: Dag<i32, i32> = Dag::new();
        graph.add_dependency(1, 2);
        graph.add_dependency(1, 2);
        assert_eq!(graph.size(), 2);
        assert_eq!(graph.get(&1).unwrap().outgoing(), &[2]);
        assert_eq!(graph.get(&2).unwrap().incoming(), &[1]);
    }

    #[test]
    fn graph_size() {
        assert_eq!(sample().size(), 3);
    }

    #[test]
    fn initial_nodes() {
        assert_eq!(ids(sample().initial_nodes()), vec![1]);
    }

    #[test]
    fn all_nodes_in_creation_order() {
        assert_eq!(ids(sample().all_nodes()), vec![1, 2, 3]);
    }

    #[test]
    fn leaf_nodes() {
        assert_eq!(ids(sample().leaf_nodes()), vec![2, 3]);
    }

    #[test]
    fn edges_are_mirrored() {
        let mut graph: Dag<i32, i32> = Dag::new();
        for (a, b) in [(1, 2), (1, 3), (3, 4), (2, 4), (5, 4)] {
            graph.add_dependency(a, b);
        }
        for node in graph.all_nodes() {
            for out in node.outgoing() {
                assert!(graph.get(out).unwrap().incoming().contains(node.id()));
            }
            for inc in node.incoming() {
                assert!(graph.get(inc).unwrap().outgoing().contains(node.id()));
            }
        }
    }

    #[test]
    fn print_single_edge() {
        let mut graph: Dag<i32, i32> = Dag::new();
        graph.add_dependency(1, 2);
        let mut out = Vec::new();
        graph.print(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Path #0\n1[] \n2[1] \n\n");
    }

    #[test]
    fn print_every_root_to_leaf_path() {
        let mut graph: Dag<i32, i32> = Dag::new();
        graph.add_dependency(1, 3);
        graph.add_dependency(2, 3);
        graph.add_dependency(1, 4);
        let mut out = Vec::new();
        graph.print(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Path #0\n1[] \n3[1, 2] \n\n\
             Path #1\n1[] \n4[1] \n\n\
             Path #2\n2[] \n3[1, 2] \n\n"
        );
    }
}
