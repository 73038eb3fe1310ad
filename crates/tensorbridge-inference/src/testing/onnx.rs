//! Tiny ONNX graphs built in memory for engine adapter tests.
//!
//! Only the protobuf fields these graphs need are declared. Dimensions
//! given as `-1` become named symbolic dimensions; output shapes are left
//! for the engine to infer.

use prost::Message;

pub const FLOAT: i32 = 1;
pub const UINT8: i32 = 2;
pub const INT32: i32 = 6;
pub const INT64: i32 = 7;
pub const BOOL: i32 = 9;

const ATTRIBUTE_INT: i32 = 2;

#[derive(Clone, PartialEq, Message)]
struct ModelProto {
    #[prost(int64, tag = "1")]
    ir_version: i64,
    #[prost(message, optional, tag = "7")]
    graph: Option<GraphProto>,
    #[prost(message, repeated, tag = "8")]
    opset_import: Vec<OperatorSetIdProto>,
}

#[derive(Clone, PartialEq, Message)]
struct OperatorSetIdProto {
    #[prost(string, tag = "1")]
    domain: String,
    #[prost(int64, tag = "2")]
    version: i64,
}

#[derive(Clone, PartialEq, Message)]
struct GraphProto {
    #[prost(message, repeated, tag = "1")]
    node: Vec<NodeProto>,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(message, repeated, tag = "5")]
    initializer: Vec<TensorProto>,
    #[prost(message, repeated, tag = "11")]
    input: Vec<ValueInfoProto>,
    #[prost(message, repeated, tag = "12")]
    output: Vec<ValueInfoProto>,
}

#[derive(Clone, PartialEq, Message)]
struct NodeProto {
    #[prost(string, repeated, tag = "1")]
    input: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    output: Vec<String>,
    #[prost(string, tag = "3")]
    name: String,
    #[prost(string, tag = "4")]
    op_type: String,
    #[prost(message, repeated, tag = "5")]
    attribute: Vec<AttributeProto>,
}

#[derive(Clone, PartialEq, Message)]
struct AttributeProto {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(int64, tag = "3")]
    i: i64,
    #[prost(int32, tag = "20")]
    r#type: i32,
}

#[derive(Clone, PartialEq, Message)]
struct ValueInfoProto {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(message, optional, tag = "2")]
    r#type: Option<TypeProto>,
}

#[derive(Clone, PartialEq, Message)]
struct TypeProto {
    #[prost(message, optional, tag = "1")]
    tensor_type: Option<TensorTypeProto>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorTypeProto {
    #[prost(int32, tag = "1")]
    elem_type: i32,
    #[prost(message, optional, tag = "2")]
    shape: Option<TensorShapeProto>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorShapeProto {
    #[prost(message, repeated, tag = "1")]
    dim: Vec<Dimension>,
}

#[derive(Clone, PartialEq, Message)]
struct Dimension {
    #[prost(int64, optional, tag = "1")]
    dim_value: Option<i64>,
    #[prost(string, optional, tag = "2")]
    dim_param: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorProto {
    #[prost(int64, repeated, tag = "1")]
    dims: Vec<i64>,
    #[prost(int32, tag = "2")]
    data_type: i32,
    #[prost(float, repeated, tag = "4")]
    float_data: Vec<f32>,
    #[prost(string, tag = "8")]
    name: String,
}

/// Builder for a single-graph ONNX model.
#[derive(Default)]
pub struct OnnxGraph {
    graph: GraphProto,
}

impl OnnxGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph input; `-1` dimensions are symbolic.
    pub fn input(mut self, name: &str, elem_type: i32, dims: &[i64]) -> Self {
        let dim = dims
            .iter()
            .enumerate()
            .map(|(axis, &d)| {
                if d < 0 {
                    Dimension {
                        dim_value: None,
                        dim_param: Some(format!("{name}_dim{axis}")),
                    }
                } else {
                    Dimension {
                        dim_value: Some(d),
                        dim_param: None,
                    }
                }
            })
            .collect();
        self.graph.input.push(ValueInfoProto {
            name: name.to_string(),
            r#type: Some(tensor_type(elem_type, Some(TensorShapeProto { dim }))),
        });
        self
    }

    pub fn output(mut self, name: &str, elem_type: i32) -> Self {
        self.graph.output.push(ValueInfoProto {
            name: name.to_string(),
            r#type: Some(tensor_type(elem_type, None)),
        });
        self
    }

    pub fn node(self, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        self.node_with_attributes(op_type, inputs, outputs, Vec::new())
    }

    pub fn cast(self, input: &str, output: &str, to: i32) -> Self {
        let to = AttributeProto {
            name: "to".to_string(),
            i: i64::from(to),
            r#type: ATTRIBUTE_INT,
        };
        self.node_with_attributes("Cast", &[input], &[output], vec![to])
    }

    /// Constant float tensor referenced by name from nodes.
    pub fn float_initializer(mut self, name: &str, dims: &[i64], values: &[f32]) -> Self {
        self.graph.initializer.push(TensorProto {
            dims: dims.to_vec(),
            data_type: FLOAT,
            float_data: values.to_vec(),
            name: name.to_string(),
        });
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        ModelProto {
            ir_version: 8,
            graph: Some(self.graph.clone()),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: 13,
            }],
        }
        .encode_to_vec()
    }

    fn node_with_attributes(
        mut self,
        op_type: &str,
        inputs: &[&str],
        outputs: &[&str],
        attribute: Vec<AttributeProto>,
    ) -> Self {
        let name = format!("{}_{}", op_type.to_lowercase(), self.graph.node.len());
        self.graph.node.push(NodeProto {
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: outputs.iter().map(|s| s.to_string()).collect(),
            name,
            op_type: op_type.to_string(),
            attribute,
        });
        self
    }
}

fn tensor_type(elem_type: i32, shape: Option<TensorShapeProto>) -> TypeProto {
    TypeProto {
        tensor_type: Some(TensorTypeProto { elem_type, shape }),
    }
}

/// Identity from each `(input, output)` pair, all of one element type.
pub fn identity(elem_type: i32, pairs: &[(&str, &str)], dims: &[i64]) -> Vec<u8> {
    pairs
        .iter()
        .fold(OnnxGraph::new(), |graph, (input, output)| {
            graph
                .input(input, elem_type, dims)
                .output(output, elem_type)
                .node("Identity", &[input], &[output])
        })
        .to_bytes()
}
