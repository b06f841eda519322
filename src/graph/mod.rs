pub mod dsl;
pub mod index;
pub mod shape;
pub mod verifier;

use crate::types::{DataFormat, FilterFormat};
use crate::{ChiselError, ChiselResult};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// Names of the external boundary tensors wired in by the layout and
/// buffer/image passes. A declared node `x` is reachable from outside the
/// model as `chisel_input_node_x` / `chisel_output_node_x`.
pub const INPUT_NODE_PREFIX: &str = "chisel_input_node";
pub const OUTPUT_NODE_PREFIX: &str = "chisel_output_node";

/// The closed argument-name vocabulary understood by the engine.
pub mod keys {
    pub const DATA_FORMAT: &str = "data_format";
    pub const FILTER_FORMAT: &str = "filter_format";
    pub const PADDING: &str = "padding";
    pub const PADDING_VALUES: &str = "padding_values";
    pub const STRIDES: &str = "strides";
    pub const DILATIONS: &str = "dilations";
    pub const KERNEL: &str = "kernel";
    pub const AXIS: &str = "axis";
    pub const PADDINGS: &str = "paddings";
    pub const SHAPE: &str = "shape";
    pub const GLOBAL_POOLING: &str = "global_pooling";
    pub const ELEMENT_TYPE: &str = "element_type";
    pub const ACTIVATION_TYPE: &str = "activation_type";
    pub const ACTIVATION_MAX_LIMIT: &str = "activation_max_limit";
    pub const WINOGRAD_FILTER_TRANSFORMED: &str = "winograd_filter_transformed";
    pub const BUFFER_TYPE: &str = "buffer_type";
    pub const MODE: &str = "mode";
    pub const DIMS: &str = "dims";
    pub const BATCH: &str = "batch";
    pub const HEIGHT: &str = "height";
    pub const WIDTH: &str = "width";
    pub const T: &str = "T";
}

/// Operator kind. Unknown kinds coming out of an importer are preserved
/// verbatim in `Other` so the IR stays extensible; no pass matches them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    Identity,
    Input,
    Pooling,
    Softmax,
    Reshape,
    Eltwise,
    Conv2D,
    Deconv2D,
    DepthwiseConv2d,
    FoldedBatchNorm,
    BiasAdd,
    Activation,
    FullyConnected,
    MatMul,
    WinogradTransform,
    WinogradInverseTransform,
    Transpose,
    BufferToImage,
    ImageToBuffer,
    Add,
    Concat,
    Slice,
    Pad,
    Other(String),
}

/// A typed argument value: a scalar or a homogeneous list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

impl ArgValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            ArgValue::Ints(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: ArgValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputShape {
    pub dims: Vec<usize>,
}

/// A constant tensor referenced by name from operator inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDef {
    pub name: String,
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
    pub data_type: Option<i64>,
}

impl TensorDef {
    pub fn new(name: &str, dims: &[usize], data: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            dims: dims.to_vec(),
            data,
            data_type: None,
        }
    }

    pub fn zeros(name: &str, dims: &[usize]) -> Self {
        let len = dims.iter().product();
        Self::new(name, dims, vec![0.0; len])
    }

    pub fn random(name: &str, dims: &[usize]) -> Self {
        use ndarray_rand::RandomExt;
        use rand::distributions::Uniform;
        let data = ArrayD::random(IxDyn(dims), Uniform::new(-1.0, 1.0));
        Self::new(name, dims, data.into_raw_vec())
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of the payload as a dimensioned array.
    pub fn to_array(&self) -> ChiselResult<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.dims), self.data.clone()).map_err(|_| {
            ChiselError::ShapeMismatch {
                name: self.name.clone(),
                len: self.data.len(),
                dims: self.dims.clone(),
            }
        })
    }

    /// Replace payload and dims from an array, flattening to standard
    /// (row-major) layout.
    pub fn assign(&mut self, array: ArrayD<f32>) {
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };
        self.dims = array.shape().to_vec();
        self.data = array.into_raw_vec();
    }

    /// Replace only the payload, keeping the recorded dims.
    pub fn assign_data(&mut self, array: ArrayD<f32>) {
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };
        self.data = array.into_raw_vec();
    }
}

/// One operator of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
    pub name: String,
    pub op_type: OpType,
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub output_shape: Vec<OutputShape>,
    pub arg: Vec<Argument>,
}

impl OperatorDef {
    pub fn new(name: &str, op_type: OpType) -> Self {
        Self {
            name: name.to_string(),
            op_type,
            input: Vec::new(),
            output: Vec::new(),
            output_shape: Vec::new(),
            arg: Vec::new(),
        }
    }

    pub fn get_arg(&self, name: &str) -> Option<&ArgValue> {
        self.arg.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn get_arg_mut(&mut self, name: &str) -> Option<&mut ArgValue> {
        self.arg
            .iter_mut()
            .find(|a| a.name == name)
            .map(|a| &mut a.value)
    }

    /// Append an argument without replacing an existing one of the same name.
    pub fn add_arg(&mut self, name: &str, value: ArgValue) {
        self.arg.push(Argument {
            name: name.to_string(),
            value,
        });
    }

    /// Replace the named argument, or append it if absent.
    pub fn set_arg(&mut self, name: &str, value: ArgValue) {
        match self.get_arg_mut(name) {
            Some(slot) => *slot = value,
            None => self.add_arg(name, value),
        }
    }

    pub fn arg_i(&self, name: &str) -> Option<i64> {
        self.get_arg(name).and_then(ArgValue::as_int)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.get_arg(name).and_then(ArgValue::as_str)
    }

    pub fn arg_ints(&self, name: &str) -> Option<&[i64]> {
        self.get_arg(name).and_then(ArgValue::as_ints)
    }

    pub fn data_format(&self) -> Option<DataFormat> {
        self.arg_i(keys::DATA_FORMAT).and_then(DataFormat::from_code)
    }

    pub fn set_data_format(&mut self, format: DataFormat) {
        self.set_arg(keys::DATA_FORMAT, ArgValue::Int(format.code()));
    }
}

/// The mutable model IR: an ordered operator list, a constant-tensor table
/// and the model-level argument list (carrying at least `filter_format`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub op: Vec<OperatorDef>,
    pub tensors: Vec<TensorDef>,
    pub arg: Vec<Argument>,
}

impl Graph {
    pub fn new(filter_format: FilterFormat) -> Self {
        let mut graph = Self {
            op: Vec::new(),
            tensors: Vec::new(),
            arg: Vec::new(),
        };
        graph.set_filter_format(filter_format);
        graph
    }

    pub fn get_arg(&self, name: &str) -> Option<&ArgValue> {
        self.arg.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn set_arg(&mut self, name: &str, value: ArgValue) {
        match self.arg.iter_mut().find(|a| a.name == name) {
            Some(slot) => slot.value = value,
            None => self.arg.push(Argument {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn arg_i(&self, name: &str) -> Option<i64> {
        self.get_arg(name).and_then(ArgValue::as_int)
    }

    pub fn filter_format(&self) -> ChiselResult<FilterFormat> {
        let code = self.arg_i(keys::FILTER_FORMAT).ok_or_else(|| {
            ChiselError::MalformedGraph("model carries no filter_format argument".to_string())
        })?;
        FilterFormat::from_code(code)
            .ok_or_else(|| ChiselError::UnsupportedFilterFormat(code.to_string()))
    }

    pub fn set_filter_format(&mut self, format: FilterFormat) {
        self.set_arg(keys::FILTER_FORMAT, ArgValue::Int(format.code()));
    }

    pub fn tensor(&self, name: &str) -> Option<&TensorDef> {
        self.tensors.iter().find(|t| t.name == name)
    }

    pub fn tensor_mut(&mut self, name: &str) -> Option<&mut TensorDef> {
        self.tensors.iter_mut().find(|t| t.name == name)
    }

    /// Remove a constant from the tensor table. Returns false when absent.
    pub fn remove_tensor(&mut self, name: &str) -> bool {
        match self.tensors.iter().position(|t| t.name == name) {
            Some(idx) => {
                self.tensors.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn find_op(&self, name: &str) -> Option<&OperatorDef> {
        self.op.iter().find(|o| o.name == name)
    }

    pub fn find_op_mut(&mut self, name: &str) -> Option<&mut OperatorDef> {
        self.op.iter_mut().find(|o| o.name == name)
    }

    /// Remove the first operator with the given name. Returns false when
    /// absent.
    pub fn remove_op(&mut self, name: &str) -> bool {
        match self.op.iter().position(|o| o.name == name) {
            Some(idx) => {
                self.op.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Importers may leave framework port suffixes (`name:0`) in node names;
/// operator names derived from them use `_` instead.
pub fn normalize_op_name(name: &str) -> String {
    name.replace(':', "_")
}
