use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Compilation target for the transformed model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Gpu,
}

/// Feature-map layout. Travels through the IR as an integer argument, so
/// every variant has a stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    Nhwc,
    Nchw,
}

impl DataFormat {
    pub fn code(self) -> i64 {
        match self {
            DataFormat::Nhwc => 0,
            DataFormat::Nchw => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DataFormat::Nhwc),
            1 => Some(DataFormat::Nchw),
            _ => None,
        }
    }
}

/// Convolution filter layout carried in the model-level `filter_format`
/// argument. HWIO is the importer's initial layout; the filter transpose
/// pass moves it to OIHW (CPU) or HWOI (GPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterFormat {
    Hwio,
    Oihw,
    Hwoi,
}

impl FilterFormat {
    pub fn code(self) -> i64 {
        match self {
            FilterFormat::Hwio => 0,
            FilterFormat::Oihw => 1,
            FilterFormat::Hwoi => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(FilterFormat::Hwio),
            1 => Some(FilterFormat::Oihw),
            2 => Some(FilterFormat::Hwoi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddingMode {
    Valid,
    Same,
    Full,
}

impl PaddingMode {
    pub fn code(self) -> i64 {
        match self {
            PaddingMode::Valid => 0,
            PaddingMode::Same => 1,
            PaddingMode::Full => 2,
        }
    }
}

/// Element-wise operator kind, stored in the `element_type` argument of an
/// Eltwise op. Only Sum and Prod participate in rewrites; the rest pass
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EltwiseType {
    Sum,
    Sub,
    Prod,
    Div,
    Min,
    Max,
    Neg,
    Abs,
    SqrDiff,
}

impl EltwiseType {
    pub fn code(self) -> i64 {
        match self {
            EltwiseType::Sum => 0,
            EltwiseType::Sub => 1,
            EltwiseType::Prod => 2,
            EltwiseType::Div => 3,
            EltwiseType::Min => 4,
            EltwiseType::Max => 5,
            EltwiseType::Neg => 6,
            EltwiseType::Abs => 7,
            EltwiseType::SqrDiff => 8,
        }
    }
}

/// Activation kinds. The `activation_type` argument carries the name as a
/// string, matching the importer convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationType {
    Noop,
    Relu,
    Relux,
    Prelu,
    Tanh,
    Sigmoid,
}

impl ActivationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationType::Noop => "NOOP",
            ActivationType::Relu => "RELU",
            ActivationType::Relux => "RELUX",
            ActivationType::Prelu => "PRELU",
            ActivationType::Tanh => "TANH",
            ActivationType::Sigmoid => "SIGMOID",
        }
    }
}

/// Image layouts understood by the GPU kernel family. Adapter ops inserted
/// by the buffer/image pass carry the code in their `buffer_type` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageBufferKind {
    Conv2dFilter,
    InOutChannel,
    Argument,
    InOutHeight,
    InOutWidth,
    WinogradFilter,
    DwConv2dFilter,
    WeightHeight,
    WeightWidth,
}

impl ImageBufferKind {
    pub fn code(self) -> i64 {
        match self {
            ImageBufferKind::Conv2dFilter => 0,
            ImageBufferKind::InOutChannel => 1,
            ImageBufferKind::Argument => 2,
            ImageBufferKind::InOutHeight => 3,
            ImageBufferKind::InOutWidth => 4,
            ImageBufferKind::WinogradFilter => 5,
            ImageBufferKind::DwConv2dFilter => 6,
            ImageBufferKind::WeightHeight => 7,
            ImageBufferKind::WeightWidth => 8,
        }
    }
}

/// User-supplied compilation request: the target device, the declared model
/// boundary, the scalar dtype tag propagated onto inserted ops, and whether
/// Winograd convolution may be used on GPU.
///
/// Input and output collections are ordered so that boundary-adapter
/// insertion is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileOption {
    pub device: Device,
    /// Declared model inputs, name to shape in NHWC order.
    pub input_nodes: BTreeMap<String, Vec<usize>>,
    /// Declared model output names.
    pub output_nodes: BTreeSet<String>,
    /// Opaque dtype tag copied into the `T` argument of inserted ops.
    pub data_type: i64,
    pub winograd_enabled: bool,
}

impl CompileOption {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            input_nodes: BTreeMap::new(),
            output_nodes: BTreeSet::new(),
            data_type: 1,
            winograd_enabled: false,
        }
    }

    pub fn input(mut self, name: &str, shape: &[usize]) -> Self {
        self.input_nodes.insert(name.to_string(), shape.to_vec());
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.output_nodes.insert(name.to_string());
        self
    }

    pub fn winograd(mut self, enabled: bool) -> Self {
        self.winograd_enabled = enabled;
        self
    }

    /// Layout every feature map must have once compilation finishes.
    pub fn target_data_format(&self) -> DataFormat {
        match self.device {
            Device::Cpu => DataFormat::Nchw,
            Device::Gpu => DataFormat::Nhwc,
        }
    }
}
