//! GPU storage adaptation: ops that expect certain inputs in image layout
//! get a BufferToImage adapter wired in front of them, and the model
//! boundary gets buffer/image converters in both directions.

use tracing::debug;

use super::Transformer;
use crate::graph::{
    keys, normalize_op_name, ArgValue, OpType, OperatorDef, OutputShape, INPUT_NODE_PREFIX,
    OUTPUT_NODE_PREFIX,
};
use crate::types::{Device, ImageBufferKind};
use crate::{ChiselError, ChiselResult};

impl Transformer {
    pub(super) fn transform_buffer_image(&mut self) -> ChiselResult<bool> {
        if self.option.device != Device::Gpu {
            return Ok(false);
        }
        debug!("transform buffer to image");

        let count = self.model.op.len();
        for idx in 0..count {
            let (op_type, inputs, winograd_filter, prelu) = {
                let op = &self.model.op[idx];
                (
                    op.op_type.clone(),
                    op.input.len(),
                    op.get_arg(keys::WINOGRAD_FILTER_TRANSFORMED).is_some(),
                    op.arg_str(keys::ACTIVATION_TYPE) == Some("PRELU"),
                )
            };
            match op_type {
                OpType::Conv2D | OpType::Deconv2D => {
                    self.buffer_to_image(idx, 1, ImageBufferKind::Conv2dFilter);
                    if inputs >= 3 {
                        self.buffer_to_image(idx, 2, ImageBufferKind::Argument);
                    }
                }
                OpType::DepthwiseConv2d => {
                    self.buffer_to_image(idx, 1, ImageBufferKind::DwConv2dFilter);
                    if inputs >= 3 {
                        self.buffer_to_image(idx, 2, ImageBufferKind::Argument);
                    }
                }
                OpType::BiasAdd => {
                    self.buffer_to_image(idx, 1, ImageBufferKind::Argument);
                }
                OpType::FoldedBatchNorm => {
                    self.buffer_to_image(idx, 1, ImageBufferKind::Argument);
                    self.buffer_to_image(idx, 2, ImageBufferKind::Argument);
                    if inputs >= 4 {
                        self.buffer_to_image(idx, 3, ImageBufferKind::Argument);
                    }
                }
                OpType::MatMul if winograd_filter => {
                    self.buffer_to_image(idx, 0, ImageBufferKind::WinogradFilter);
                }
                OpType::WinogradInverseTransform if inputs >= 2 => {
                    self.buffer_to_image(idx, 1, ImageBufferKind::Argument);
                }
                OpType::FullyConnected => {
                    self.buffer_to_image(idx, 1, ImageBufferKind::WeightWidth);
                    if inputs >= 3 {
                        self.buffer_to_image(idx, 2, ImageBufferKind::Argument);
                    }
                }
                OpType::Activation if prelu => {
                    self.buffer_to_image(idx, 1, ImageBufferKind::Argument);
                }
                _ => {}
            }
        }

        for (name, dims) in &self.option.input_nodes {
            let boundary = format!("{}_{}", INPUT_NODE_PREFIX, name);
            let mut adapter = OperatorDef::new(&normalize_op_name(name), OpType::BufferToImage);
            adapter.input.push(boundary);
            adapter.output.push(name.clone());
            adapter.output_shape.push(OutputShape { dims: dims.clone() });
            adapter.add_arg(
                keys::BUFFER_TYPE,
                ArgValue::Int(ImageBufferKind::InOutChannel.code()),
            );
            adapter.add_arg(keys::T, ArgValue::Int(self.option.data_type));
            self.model.op.push(adapter);
        }

        let mut outputs = Vec::new();
        for name in &self.option.output_nodes {
            let dims = self
                .producer_op(name)
                .map(|producer| producer.output_shape[0].dims.clone())
                .ok_or_else(|| {
                    ChiselError::MalformedGraph(format!(
                        "declared output {} has no producer",
                        name
                    ))
                })?;
            outputs.push((name.clone(), dims));
        }
        for (name, dims) in outputs {
            let boundary = format!("{}_{}", OUTPUT_NODE_PREFIX, name);
            let mut adapter =
                OperatorDef::new(&normalize_op_name(&boundary), OpType::ImageToBuffer);
            adapter.input.push(name);
            adapter.output.push(boundary);
            adapter.output_shape.push(OutputShape { dims });
            adapter.add_arg(
                keys::BUFFER_TYPE,
                ArgValue::Int(ImageBufferKind::InOutChannel.code()),
            );
            adapter.add_arg(keys::T, ArgValue::Int(self.option.data_type));
            self.model.op.push(adapter);
        }
        Ok(false)
    }

    /// Wire a BufferToImage adapter in front of one input slot of an op.
    fn buffer_to_image(&mut self, op_idx: usize, input_idx: usize, kind: ImageBufferKind) {
        let input_name = self.model.op[op_idx].input[input_idx].clone();
        let adapter_name = format!("{}_b2i", normalize_op_name(&input_name));
        let mut adapter = OperatorDef::new(&adapter_name, OpType::BufferToImage);
        adapter.input.push(input_name);
        adapter.output.push(adapter_name.clone());
        adapter.add_arg(keys::BUFFER_TYPE, ArgValue::Int(kind.code()));
        adapter.add_arg(keys::MODE, ArgValue::Int(0));
        adapter.add_arg(keys::T, ArgValue::Int(self.option.data_type));
        self.model.op[op_idx].input[input_idx] = adapter_name;
        self.model.op.push(adapter);
    }
}
