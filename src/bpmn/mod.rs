//! This module defines the data structures for BPMN process graphs.
//!
//! The graph is a flat, identifier-based structure: nodes are owned by the
//! [`Bpmn`] container and referenced everywhere else only by their string id.
//! Flows may form back-edges (loop bodies), so the flow set is not acyclic.

pub mod xml;

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Whether a gateway splits the control flow or joins it back together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayDirection {
    Diverging,
    Converging,
}

/// Gateway directions are written as they appear in the BPMN XML attribute.
impl Display for GatewayDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            GatewayDirection::Diverging => write!(f, "Diverging"),
            GatewayDirection::Converging => write!(f, "Converging"),
        }
    }
}

/// Supported BPMN node variants.
///
/// `SubProcess` exists in the model but is not emitted by the generator and
/// not supported by the serializer; rendering one is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    StartEvent,
    EndEvent,
    Task,
    ExclusiveGateway(GatewayDirection),
    ParallelGateway(GatewayDirection),
    SubProcess,
}

/// A BPMN node has a unique id, a display name, an owning process,
/// a variant type, and layout bounds for the diagram section.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    pub process: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Node {
    /// Create a node with the default bounds for its variant.
    /// No layout is computed here; positions stay at the origin until an
    /// external layouter moves them.
    pub fn new(node_type: NodeType, id: String, name: String, process: String) -> Self {
        let (width, height) = match node_type {
            NodeType::StartEvent | NodeType::EndEvent => (36.0, 36.0),
            NodeType::Task => (100.0, 80.0),
            NodeType::ExclusiveGateway(_) | NodeType::ParallelGateway(_) => (50.0, 50.0),
            NodeType::SubProcess => (350.0, 200.0),
        };
        Node {
            id,
            name,
            node_type,
            process,
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    /// The center of the node's bounds, used as a flow waypoint.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// An ID for a sequence flow.
/// This is a newtype around `usize` so flow ids cannot be mixed up with the
/// string ids of nodes, and so the decode path can allocate ids without a
/// random source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(usize);

/// Flow IDs are displayed as SequenceFlow_0, SequenceFlow_1, ...
impl Display for FlowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "SequenceFlow_{}", self.0)
    }
}

/// A directed sequence flow between two nodes of the same process.
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: FlowId,
    pub process: String,
    pub source: String,
    pub target: String,
    pub name: String,
    pub waypoints: Vec<(f64, f64)>,
}

/// A BPMN process graph: the owning container for nodes and flows.
///
/// Insertion is purely additive and unvalidated; well-formedness (unique ids,
/// existing endpoints, SESE structure) is the generator's responsibility.
#[derive(Debug, Clone, Default)]
pub struct Bpmn {
    nodes: Vec<Node>,
    flows: Vec<Flow>,
    node_index: HashMap<String, usize, ahash::RandomState>,
    next_flow_id: usize,
}

impl Bpmn {
    pub fn new() -> Self {
        Bpmn::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) {
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    /// Add a flow from `source` to `target` and return its freshly
    /// allocated id. Waypoints are seeded with the endpoint centers.
    pub fn add_flow(&mut self, process: &str, source: &str, target: &str) -> FlowId {
        let id = FlowId(self.next_flow_id);
        self.next_flow_id += 1;
        let waypoints = vec![
            self.node(source).map(Node::center).unwrap_or_default(),
            self.node(target).map(Node::center).unwrap_or_default(),
        ];
        self.flows.push(Flow {
            id,
            process: process.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            name: String::new(),
            waypoints,
        });
        id
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.iter()
    }

    /// All nodes belonging to the given process.
    pub fn nodes_of<'a>(&'a self, process: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| n.process == process)
    }

    /// All flows belonging to the given process.
    pub fn flows_of<'a>(&'a self, process: &'a str) -> impl Iterator<Item = &'a Flow> {
        self.flows.iter().filter(move |f| f.process == process)
    }

    /// The distinct process ids present in the graph, in first-seen order.
    /// The generator only ever produces one, but the serializer supports
    /// several.
    pub fn processes(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        let node_processes = self.nodes.iter().map(|n| n.process.as_str());
        let flow_processes = self.flows.iter().map(|f| f.process.as_str());
        for process in node_processes.chain(flow_processes) {
            if !seen.contains(&process) {
                seen.push(process);
            }
        }
        seen
    }

    /// Incoming flows of a node, in insertion order.
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Flow> {
        self.flows.iter().filter(move |f| f.target == node_id)
    }

    /// Outgoing flows of a node, in insertion order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Flow> {
        self.flows.iter().filter(move |f| f.source == node_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flow_ids_are_sequential() {
        let mut bpmn = Bpmn::new();
        bpmn.add_node(Node::new(
            NodeType::Task,
            "Task_a".into(),
            "Task_a".into(),
            "1".into(),
        ));
        bpmn.add_node(Node::new(
            NodeType::Task,
            "Task_b".into(),
            "Task_b".into(),
            "1".into(),
        ));
        let first = bpmn.add_flow("1", "Task_a", "Task_b");
        let second = bpmn.add_flow("1", "Task_b", "Task_a");
        assert_eq!(first.to_string(), "SequenceFlow_0");
        assert_eq!(second.to_string(), "SequenceFlow_1");
    }

    #[test]
    fn processes_are_reported_in_first_seen_order() {
        let mut bpmn = Bpmn::new();
        bpmn.add_node(Node::new(
            NodeType::Task,
            "Task_a".into(),
            "Task_a".into(),
            "2".into(),
        ));
        bpmn.add_node(Node::new(
            NodeType::Task,
            "Task_b".into(),
            "Task_b".into(),
            "1".into(),
        ));
        bpmn.add_node(Node::new(
            NodeType::Task,
            "Task_c".into(),
            "Task_c".into(),
            "2".into(),
        ));
        assert_eq!(bpmn.processes(), vec!["2", "1"]);
        assert_eq!(bpmn.nodes_of("2").count(), 2);
        assert_eq!(bpmn.flows_of("1").count(), 0);
    }

    #[test]
    fn processes_include_those_referenced_only_by_flows() {
        let mut bpmn = Bpmn::new();
        bpmn.add_node(Node::new(
            NodeType::Task,
            "Task_a".into(),
            "Task_a".into(),
            "1".into(),
        ));
        bpmn.add_node(Node::new(
            NodeType::Task,
            "Task_b".into(),
            "Task_b".into(),
            "1".into(),
        ));
        // A message-style flow filed under a process with no nodes of its own
        bpmn.add_flow("2", "Task_a", "Task_b");
        assert_eq!(bpmn.processes(), vec!["1", "2"]);
        assert_eq!(bpmn.flows_of("2").count(), 1);
    }
}
