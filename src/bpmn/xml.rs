//! This module serializes a process graph to a BPMN 2.0 XML document with
//! two sections: the process definitions and the diagram layout.
//!
//! The graph is first converted into serde shadow structs mirroring the XML
//! shape and then written with `quick_xml`; [`BpmnXml`] is that intermediate
//! representation.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::bpmn::{Bpmn, Flow, GatewayDirection, Node, NodeType};
use crate::error::{Error, Result};

const BPMN_NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";
const BPMNDI_NS: &str = "http://www.omg.org/spec/BPMN/20100524/DI";
const OMGDC_NS: &str = "http://www.omg.org/spec/DD/20100524/DC";
const OMGDI_NS: &str = "http://www.omg.org/spec/DD/20100524/DI";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
const TARGET_NS: &str = "http://www.signavio.com/bpmn20";
const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";

#[derive(Debug, Serialize)]
struct StartEventXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@isInterrupting")]
    is_interrupting: bool,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@parallelMultiple")]
    parallel_multiple: bool,
    #[serde(rename = "bpmn:incoming")]
    incoming: Vec<String>,
    #[serde(rename = "bpmn:outgoing")]
    outgoing: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EndEventXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "bpmn:incoming")]
    incoming: Vec<String>,
    #[serde(rename = "bpmn:outgoing")]
    outgoing: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TaskXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "bpmn:incoming")]
    incoming: Vec<String>,
    #[serde(rename = "bpmn:outgoing")]
    outgoing: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GatewayXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@gatewayDirection")]
    gateway_direction: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "bpmn:incoming")]
    incoming: Vec<String>,
    #[serde(rename = "bpmn:outgoing")]
    outgoing: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ConditionExpressionXml {
    #[serde(rename = "@xsi:type")]
    xsi_type: &'static str,
    #[serde(rename = "$text")]
    text: String,
}

#[derive(Debug, Serialize)]
struct SequenceFlowXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@sourceRef")]
    source_ref: String,
    #[serde(rename = "@targetRef")]
    target_ref: String,
    #[serde(
        rename = "bpmn:conditionExpression",
        skip_serializing_if = "Option::is_none"
    )]
    condition: Option<ConditionExpressionXml>,
}

#[derive(Debug, Serialize)]
struct ProcessXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@isClosed")]
    is_closed: bool,
    #[serde(rename = "@isExecutable")]
    is_executable: bool,
    #[serde(rename = "@processType")]
    process_type: &'static str,
    #[serde(rename = "bpmn:startEvent")]
    start_events: Vec<StartEventXml>,
    #[serde(rename = "bpmn:endEvent")]
    end_events: Vec<EndEventXml>,
    #[serde(rename = "bpmn:userTask")]
    user_tasks: Vec<TaskXml>,
    #[serde(rename = "bpmn:exclusiveGateway")]
    exclusive_gateways: Vec<GatewayXml>,
    #[serde(rename = "bpmn:parallelGateway")]
    parallel_gateways: Vec<GatewayXml>,
    #[serde(rename = "bpmn:sequenceFlow")]
    sequence_flows: Vec<SequenceFlowXml>,
}

impl ProcessXml {
    fn new(process: &str) -> Self {
        ProcessXml {
            id: format!("id{process}"),
            is_closed: false,
            is_executable: true,
            process_type: "None",
            start_events: Vec::new(),
            end_events: Vec::new(),
            user_tasks: Vec::new(),
            exclusive_gateways: Vec::new(),
            parallel_gateways: Vec::new(),
            sequence_flows: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct BoundsXml {
    #[serde(rename = "@height")]
    height: f64,
    #[serde(rename = "@width")]
    width: f64,
    #[serde(rename = "@x")]
    x: f64,
    #[serde(rename = "@y")]
    y: f64,
}

#[derive(Debug, Serialize)]
struct ShapeXml {
    #[serde(rename = "@bpmnElement")]
    bpmn_element: String,
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "omgdc:Bounds")]
    bounds: BoundsXml,
}

impl From<&Node> for ShapeXml {
    fn from(node: &Node) -> Self {
        ShapeXml {
            bpmn_element: node.id.clone(),
            id: format!("{}_gui", node.id),
            bounds: BoundsXml {
                height: node.height,
                width: node.width,
                x: node.x,
                y: node.y,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WaypointXml {
    #[serde(rename = "@x")]
    x: f64,
    #[serde(rename = "@y")]
    y: f64,
}

#[derive(Debug, Serialize)]
struct EdgeXml {
    #[serde(rename = "@bpmnElement")]
    bpmn_element: String,
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "omgdi:waypoint")]
    waypoints: Vec<WaypointXml>,
}

impl From<&Flow> for EdgeXml {
    fn from(flow: &Flow) -> Self {
        EdgeXml {
            bpmn_element: flow.id.to_string(),
            id: format!("{}_gui", flow.id),
            waypoints: flow
                .waypoints
                .iter()
                .map(|&(x, y)| WaypointXml { x, y })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PlaneXml {
    #[serde(rename = "@bpmnElement")]
    bpmn_element: String,
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "bpmndi:BPMNShape")]
    shapes: Vec<ShapeXml>,
    #[serde(rename = "bpmndi:BPMNEdge")]
    edges: Vec<EdgeXml>,
}

#[derive(Debug, Serialize)]
struct DiagramXml {
    #[serde(rename = "@id")]
    id: &'static str,
    #[serde(rename = "@name")]
    name: &'static str,
    #[serde(rename = "bpmndi:BPMNPlane")]
    planes: Vec<PlaneXml>,
}

/// Internal representation of the BPMN XML document.
/// This is the shape the graph is serialized into.
#[derive(Debug, Serialize)]
#[serde(rename = "bpmn:definitions")]
pub struct BpmnXml {
    #[serde(rename = "@xmlns:bpmn")]
    xmlns_bpmn: &'static str,
    #[serde(rename = "@xmlns:bpmndi")]
    xmlns_bpmndi: &'static str,
    #[serde(rename = "@xmlns:omgdc")]
    xmlns_omgdc: &'static str,
    #[serde(rename = "@xmlns:omgdi")]
    xmlns_omgdi: &'static str,
    #[serde(rename = "@xmlns:xsi")]
    xmlns_xsi: &'static str,
    #[serde(rename = "@xmlns:xsd")]
    xmlns_xsd: &'static str,
    #[serde(rename = "@targetNamespace")]
    target_namespace: &'static str,
    #[serde(rename = "@typeLanguage")]
    type_language: &'static str,
    #[serde(rename = "@expressionLanguage")]
    expression_language: &'static str,
    #[serde(rename = "bpmn:process")]
    processes: Vec<ProcessXml>,
    #[serde(rename = "bpmndi:BPMNDiagram")]
    diagram: DiagramXml,
}

/// Display a BpmnXml document as indented XML. Serialization errors on an
/// already validated document surface as `fmt::Error`.
impl Display for BpmnXml {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut ser = quick_xml::se::Serializer::new(f);
        ser.indent(' ', 2);
        self.serialize(ser).map(|_| ()).map_err(|_| std::fmt::Error)
    }
}

/// Convert a process graph into the XML document shape. Fails with
/// [`Error::UnsupportedNodeType`] on any node variant the serializer does
/// not know how to render.
impl TryFrom<&Bpmn> for BpmnXml {
    type Error = Error;

    fn try_from(bpmn: &Bpmn) -> Result<Self> {
        let mut processes = Vec::new();
        let mut planes = Vec::new();

        for process in bpmn.processes() {
            let mut process_xml = ProcessXml::new(process);
            let mut plane = PlaneXml {
                bpmn_element: format!("id{process}"),
                id: format!("BPMNPlane_{process}"),
                shapes: Vec::new(),
                edges: Vec::new(),
            };

            for node in bpmn.nodes_of(process) {
                let incoming: Vec<String> =
                    bpmn.incoming(&node.id).map(|f| f.id.to_string()).collect();
                let outgoing: Vec<String> =
                    bpmn.outgoing(&node.id).map(|f| f.id.to_string()).collect();
                match node.node_type {
                    NodeType::StartEvent => process_xml.start_events.push(StartEventXml {
                        id: node.id.clone(),
                        is_interrupting: true,
                        name: node.name.clone(),
                        parallel_multiple: false,
                        incoming,
                        outgoing,
                    }),
                    NodeType::EndEvent => process_xml.end_events.push(EndEventXml {
                        id: node.id.clone(),
                        name: node.name.clone(),
                        incoming,
                        outgoing,
                    }),
                    NodeType::Task => process_xml.user_tasks.push(TaskXml {
                        id: node.id.clone(),
                        name: node.name.clone(),
                        incoming,
                        outgoing,
                    }),
                    NodeType::ExclusiveGateway(direction) => {
                        process_xml.exclusive_gateways.push(GatewayXml {
                            id: node.id.clone(),
                            gateway_direction: direction.to_string(),
                            name: String::new(),
                            incoming,
                            outgoing,
                        })
                    }
                    NodeType::ParallelGateway(direction) => {
                        process_xml.parallel_gateways.push(GatewayXml {
                            id: node.id.clone(),
                            gateway_direction: direction.to_string(),
                            name: String::new(),
                            incoming,
                            outgoing,
                        })
                    }
                    NodeType::SubProcess => {
                        return Err(Error::UnsupportedNodeType(node.node_type))
                    }
                }
                plane.shapes.push(ShapeXml::from(node));
            }

            // The first outgoing flow of each diverging exclusive gateway is
            // annotated true, every later one false. Valid only for the
            // binary splits the generator produces.
            let mut marked_true: Vec<&str> = Vec::new();
            for flow in bpmn.flows_of(process) {
                let condition = match bpmn.node(&flow.source) {
                    Some(source)
                        if source.node_type
                            == NodeType::ExclusiveGateway(GatewayDirection::Diverging) =>
                    {
                        let value = if marked_true.contains(&flow.source.as_str()) {
                            "false"
                        } else {
                            marked_true.push(flow.source.as_str());
                            "true"
                        };
                        Some(ConditionExpressionXml {
                            xsi_type: "bpmn:tFormalExpression",
                            text: format!("=v{} = {value}", flow.source),
                        })
                    }
                    _ => None,
                };
                process_xml.sequence_flows.push(SequenceFlowXml {
                    id: flow.id.to_string(),
                    name: flow.name.clone(),
                    source_ref: flow.source.clone(),
                    target_ref: flow.target.clone(),
                    condition,
                });
                plane.edges.push(EdgeXml::from(flow));
            }

            processes.push(process_xml);
            planes.push(plane);
        }

        Ok(BpmnXml {
            xmlns_bpmn: BPMN_NS,
            xmlns_bpmndi: BPMNDI_NS,
            xmlns_omgdc: OMGDC_NS,
            xmlns_omgdi: OMGDI_NS,
            xmlns_xsi: XSI_NS,
            xmlns_xsd: XSD_NS,
            target_namespace: TARGET_NS,
            type_language: XSD_NS,
            expression_language: "http://www.w3.org/1999/XPath",
            processes,
            diagram: DiagramXml {
                id: "BPMNDiagram_1",
                name: "diagram",
                planes,
            },
        })
    }
}

/// Render a process graph to an XML string.
pub fn render(bpmn: &Bpmn) -> Result<String> {
    let document = BpmnXml::try_from(bpmn)?;
    let mut body = String::new();
    let mut ser = quick_xml::se::Serializer::new(&mut body);
    ser.indent(' ', 2);
    document.serialize(ser)?;
    Ok(format!("{XML_DECLARATION}\n{body}\n"))
}

/// Write a process graph to `path` as XML. The document is rendered fully
/// in memory and persisted through a rename, so a failed render never
/// leaves a truncated file behind.
pub fn write_to_file(bpmn: &Bpmn, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let xml = render(bpmn)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, xml)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write a batch of (graph, seed) pairs into `dir` as
/// `<prefix>_<index>.xml`.
pub fn write_all(
    models: &[(Bpmn, String)],
    dir: impl AsRef<Path>,
    prefix: &str,
) -> Result<()> {
    for (index, (bpmn, _)) in models.iter().enumerate() {
        let path = dir.as_ref().join(format!("{prefix}_{index}.xml"));
        write_to_file(bpmn, &path)?;
        info!(path = %path.display(), "wrote process model");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::generator::{GenParams, Generator};

    fn forced_xor_model() -> Bpmn {
        let generator = Generator::new(GenParams {
            num_nodes: 2,
            branch_ratio: 0.0,
            xor_ratio: 1.0,
            and_ratio: 0.0,
            loop_ratio: 0.0,
            fixed_naming: true,
            ..GenParams::default()
        });
        generator.generate().unwrap().0
    }

    #[test]
    fn every_node_and_flow_is_rendered_exactly_once() {
        let generator = Generator::new(GenParams {
            num_nodes: 12,
            fixed_naming: true,
            ..GenParams::default()
        });
        let (bpmn, _) = generator.generate().unwrap();
        let xml = render(&bpmn).unwrap();
        for node in bpmn.nodes() {
            assert_eq!(
                xml.matches(&format!("id=\"{}_gui\"", node.id)).count(),
                1,
                "node {} should produce exactly one shape",
                node.id
            );
        }
        assert_eq!(
            xml.matches("<bpmndi:BPMNShape").count(),
            bpmn.nodes().count()
        );
        assert_eq!(
            xml.matches("<bpmndi:BPMNEdge").count(),
            bpmn.flows().count()
        );
        assert_eq!(
            xml.matches("<bpmn:sequenceFlow").count(),
            bpmn.flows().count()
        );
    }

    #[test]
    fn diverging_exclusive_gateway_conditions_are_true_then_false() {
        let xml = render(&forced_xor_model()).unwrap();
        assert_eq!(xml.matches("= true</bpmn:conditionExpression>").count(), 1);
        assert_eq!(xml.matches("= false</bpmn:conditionExpression>").count(), 1);
        // the converging gateway's outgoing flow carries no condition
        assert_eq!(xml.matches("<bpmn:conditionExpression").count(), 2);
    }

    #[test]
    fn subprocess_nodes_fail_the_render() {
        let mut bpmn = Bpmn::new();
        bpmn.add_node(Node::new(
            NodeType::SubProcess,
            "SubProcess_1".into(),
            "SubProcess_1".into(),
            "1".into(),
        ));
        assert!(matches!(
            render(&bpmn),
            Err(Error::UnsupportedNodeType(NodeType::SubProcess))
        ));
    }

    #[test]
    fn files_are_persisted_without_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Generator::new(GenParams {
            num_nodes: 5,
            fixed_naming: true,
            ..GenParams::default()
        });
        let models = generator.generate_many(3).unwrap();
        write_all(&models, dir.path(), "BPMN").unwrap();
        for index in 0..3 {
            let path = dir.path().join(format!("BPMN_{index}.xml"));
            let contents = fs::read_to_string(&path).unwrap();
            assert!(contents.starts_with(XML_DECLARATION));
            assert!(contents.contains("<bpmn:definitions"));
        }
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
