pub mod bpmn;
pub mod complexity;
pub mod error;
pub mod generator;

pub use bpmn::xml::{render, write_all, write_to_file, BpmnXml};
pub use bpmn::{Bpmn, Flow, FlowId, GatewayDirection, Node, NodeType};
pub use complexity::cfc;
pub use error::{Error, Result};
pub use generator::seed::{GateKind, SeedToken};
pub use generator::{GenParams, Generator};
