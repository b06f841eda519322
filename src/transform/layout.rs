//! Device layout specialization: filter re-layout, feature-map format
//! transposition with axis-sensitive argument fixups, and the CPU
//! global-conv-to-fully-connected rewrite.

use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use super::Transformer;
use crate::graph::shape::{
    feature_map_nhwc, filter_hwio, transpose_in_place, transpose_pairs_in_place, NCHW_TO_NHWC,
    NHWC_TO_NCHW,
};
use crate::graph::{
    keys, normalize_op_name, ArgValue, OpType, OperatorDef, OutputShape, INPUT_NODE_PREFIX,
    OUTPUT_NODE_PREFIX,
};
use crate::types::{DataFormat, Device, FilterFormat, PaddingMode};
use crate::{ChiselError, ChiselResult};

impl Transformer {
    /// Re-layouts every convolution filter for the target device: OIHW on
    /// CPU, HWOI on GPU (fully-connected weights become OHWC on GPU). The
    /// model-level filter format is updated afterwards.
    pub(super) fn transpose_filters(&mut self) -> ChiselResult<bool> {
        let filter_format = self.model.filter_format()?;
        match self.option.device {
            Device::Cpu => {
                if filter_format == FilterFormat::Hwio {
                    debug!("transpose filters to OIHW");
                    let filters: Vec<String> = self
                        .model
                        .op
                        .iter()
                        .filter(|op| {
                            matches!(
                                op.op_type,
                                OpType::Conv2D | OpType::Deconv2D | OpType::DepthwiseConv2d
                            ) && op.get_arg(keys::WINOGRAD_FILTER_TRANSFORMED).is_none()
                        })
                        .map(|op| op.input[1].clone())
                        .collect();
                    for name in filters {
                        self.permute_filter(&name, &[3, 2, 0, 1])?;
                    }
                }
                self.model.set_filter_format(FilterFormat::Oihw);
            }
            Device::Gpu => {
                debug!("transpose filters to HWOI");
                let mut permutes: Vec<(String, [usize; 4])> = Vec::new();
                let mut weights: Vec<(String, String)> = Vec::new();
                for op in &self.model.op {
                    match op.op_type {
                        OpType::Conv2D | OpType::Deconv2D => match filter_format {
                            FilterFormat::Hwio => {
                                permutes.push((op.input[1].clone(), [0, 1, 3, 2]))
                            }
                            FilterFormat::Oihw => {
                                permutes.push((op.input[1].clone(), [2, 3, 0, 1]))
                            }
                            FilterFormat::Hwoi => {}
                        },
                        OpType::DepthwiseConv2d => {
                            if filter_format == FilterFormat::Oihw {
                                permutes.push((op.input[1].clone(), [2, 3, 1, 0]));
                            }
                        }
                        OpType::FullyConnected => {
                            weights.push((op.input[1].clone(), op.input[0].clone()))
                        }
                        _ => {}
                    }
                }
                for (name, perm) in permutes {
                    self.permute_filter(&name, &perm)?;
                }
                for (weight_name, input_name) in weights {
                    self.transpose_fc_weight(&weight_name, &input_name)?;
                }
                self.model.set_filter_format(FilterFormat::Hwoi);
            }
        }
        Ok(false)
    }

    fn permute_filter(&mut self, name: &str, perm: &[usize]) -> ChiselResult<()> {
        let filter = self.model.tensor_mut(name).ok_or_else(|| {
            ChiselError::MalformedGraph(format!("filter constant {} not found", name))
        })?;
        let array = filter.to_array()?;
        filter.assign(array.permuted_axes(IxDyn(perm)));
        Ok(())
    }

    /// GPU fully-connected weights: view the flat (O, C*H*W) payload through
    /// the producer's feature-map shape and reorder it to OHWC. The recorded
    /// 2-D dims stay as they are; only the payload moves.
    fn transpose_fc_weight(&mut self, weight_name: &str, input_name: &str) -> ChiselResult<()> {
        let (height, width, channels) = {
            let producer = self.producer_op(input_name).ok_or_else(|| {
                ChiselError::MalformedGraph(format!(
                    "fully-connected input {} has no producer",
                    input_name
                ))
            })?;
            let format = producer.data_format().unwrap_or(DataFormat::Nchw);
            let (_, height, width, channels) =
                feature_map_nhwc(&producer.output_shape[0].dims, format);
            (height, width, channels)
        };
        let weight = self.model.tensor_mut(weight_name).ok_or_else(|| {
            ChiselError::MalformedGraph(format!("weight constant {} not found", weight_name))
        })?;
        let out_features = weight.dims[0];
        let shape = [out_features, channels, height, width];
        let array = ArrayD::from_shape_vec(IxDyn(&shape), weight.data.clone()).map_err(|_| {
            ChiselError::ShapeMismatch {
                name: weight.name.clone(),
                len: weight.data.len(),
                dims: shape.to_vec(),
            }
        })?;
        weight.assign_data(array.permuted_axes(IxDyn(&[0, 2, 3, 1])));
        Ok(())
    }

    /// Moves every tagged op to the target feature-map layout: permutes
    /// 4-D output shapes and retags. Pad paddings and Concat/Slice axes are
    /// fixed up first; inserting boundary Transpose ops wires the NCHW model
    /// back to its NHWC-facing callers.
    pub(super) fn transpose_data_format(&mut self) -> ChiselResult<bool> {
        let target = self.target_data_format;

        for op in &mut self.model.op {
            let source = op.data_format();
            match op.op_type {
                OpType::Pad => {
                    let perm: Option<&[usize; 4]> = match (source, target) {
                        (Some(DataFormat::Nhwc), DataFormat::Nchw) => Some(&NHWC_TO_NCHW),
                        (Some(DataFormat::Nchw), DataFormat::Nhwc) => Some(&NCHW_TO_NHWC),
                        _ => None,
                    };
                    if let Some(perm) = perm {
                        debug!(op = %op.name, "transpose pad paddings");
                        if let Some(ArgValue::Ints(values)) = op.get_arg_mut(keys::PADDINGS) {
                            match values.len() {
                                4 => transpose_in_place(values, perm),
                                8 => transpose_pairs_in_place(values, perm),
                                _ => {}
                            }
                        }
                    }
                }
                OpType::Concat | OpType::Slice => {
                    let remap = match (source, target) {
                        (Some(DataFormat::Nhwc), DataFormat::Nchw) => Some((3, 1)),
                        (Some(DataFormat::Nchw), DataFormat::Nhwc) => Some((1, 3)),
                        _ => None,
                    };
                    if let Some((channel_axis, mapped)) = remap {
                        debug!(op = %op.name, "transpose concat/slice axis");
                        if let Some(ArgValue::Int(axis)) = op.get_arg_mut(keys::AXIS) {
                            if *axis != channel_axis {
                                return Err(ChiselError::UnsupportedAxis(*axis));
                            }
                            *axis = mapped;
                        }
                    }
                }
                _ => {}
            }

            if let Some(source) = source {
                if source != target {
                    debug!(op = %op.name, "transpose output shapes");
                    for shape in &mut op.output_shape {
                        if shape.dims.len() == 4 {
                            match target {
                                DataFormat::Nhwc => {
                                    transpose_in_place(&mut shape.dims, &NCHW_TO_NHWC)
                                }
                                DataFormat::Nchw => {
                                    transpose_in_place(&mut shape.dims, &NHWC_TO_NCHW)
                                }
                            }
                        }
                    }
                    op.set_data_format(target);
                }
            }
        }

        // An NCHW model still faces NHWC callers: adapt at the boundary.
        if target == DataFormat::Nchw {
            debug!("transpose model inputs/outputs to NCHW");
            for (name, dims) in &self.option.input_nodes {
                let boundary = format!("{}_{}", INPUT_NODE_PREFIX, name);
                let mut op = OperatorDef::new(&normalize_op_name(name), OpType::Transpose);
                op.input.push(boundary);
                op.output.push(name.clone());
                op.output_shape.push(OutputShape { dims: dims.clone() });
                op.add_arg(
                    keys::DIMS,
                    ArgValue::Ints(NHWC_TO_NCHW.iter().map(|&d| d as i64).collect()),
                );
                op.add_arg(keys::T, ArgValue::Int(self.option.data_type));
                self.model.op.push(op);
            }

            let mut outputs = Vec::new();
            for name in &self.option.output_nodes {
                let producer = self.producer_op(name).ok_or_else(|| {
                    ChiselError::MalformedGraph(format!(
                        "declared output {} has no producer",
                        name
                    ))
                })?;
                let mut dims = producer.output_shape[0].dims.clone();
                transpose_in_place(&mut dims, &NCHW_TO_NHWC);
                outputs.push((name.clone(), dims));
            }
            for (name, dims) in outputs {
                let boundary = format!("{}_{}", OUTPUT_NODE_PREFIX, name);
                let mut op = OperatorDef::new(&normalize_op_name(&boundary), OpType::Transpose);
                op.input.push(name);
                op.output.push(boundary);
                op.output_shape.push(OutputShape { dims });
                op.add_arg(
                    keys::DIMS,
                    ArgValue::Ints(NCHW_TO_NHWC.iter().map(|&d| d as i64).collect()),
                );
                op.add_arg(keys::T, ArgValue::Int(self.option.data_type));
                self.model.op.push(op);
            }
        }
        Ok(false)
    }

    /// A convolution covering its whole input feature map with no padding is
    /// a matrix product: retype it and flatten the filter dims. Runs after
    /// the filter and data-format transposes, so the payload order already
    /// matches; only the dims change.
    pub(super) fn transform_global_conv_to_fc(&mut self) -> ChiselResult<bool> {
        if self.option.device == Device::Gpu {
            return Ok(false);
        }
        let filter_format = self.model.filter_format()?;

        for idx in 0..self.model.op.len() {
            let plan = {
                let op = &self.model.op[idx];
                if op.op_type != OpType::Conv2D {
                    None
                } else {
                    let producer = self.producer_op(&op.input[0]).ok_or_else(|| {
                        ChiselError::MalformedGraph(format!(
                            "conv input {} has no producer",
                            op.input[0]
                        ))
                    })?;
                    let format = producer.data_format().unwrap_or(DataFormat::Nchw);
                    let (_, height, width, _) =
                        feature_map_nhwc(&producer.output_shape[0].dims, format);
                    let filter_name = op.input[1].clone();
                    let tensor = *self.index.consts.get(&filter_name).ok_or_else(|| {
                        ChiselError::MalformedGraph(format!(
                            "filter constant {} not found",
                            filter_name
                        ))
                    })?;
                    let (filter_height, filter_width, in_channels, out_channels) =
                        filter_hwio(&self.model.tensors[tensor].dims, filter_format);
                    let zero_padding = if let Some(mode) = op.arg_i(keys::PADDING) {
                        mode == PaddingMode::Valid.code()
                    } else if let Some(values) = op.arg_ints(keys::PADDING_VALUES) {
                        values.iter().all(|&v| v == 0)
                    } else {
                        true
                    };
                    if height == filter_height && width == filter_width && zero_padding {
                        Some((
                            filter_name,
                            out_channels,
                            in_channels * filter_width * filter_height,
                        ))
                    } else {
                        None
                    }
                }
            };
            if let Some((filter_name, out_channels, flattened)) = plan {
                debug!(op = %self.model.op[idx].name, "transform global conv to fc");
                self.model.op[idx].op_type = OpType::FullyConnected;
                if let Some(filter) = self.model.tensor_mut(&filter_name) {
                    filter.dims = vec![out_channels, flattened];
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::dsl::GraphBuilder;
    use crate::graph::Graph;
    use crate::types::CompileOption;

    #[test]
    fn transpose_filters_twice_is_a_dims_noop() {
        let mut graph = Graph::new(FilterFormat::Hwio);
        let mut builder = GraphBuilder::new(&mut graph);
        builder.random_constant("w", &[3, 5, 2, 8]);
        builder.conv2d("conv", "data", "w", &[1, 10, 10, 8]);

        let option = CompileOption::new(Device::Cpu)
            .input("data", &[1, 12, 14, 2])
            .output("conv");
        let mut transformer = Transformer::new(graph, option);
        transformer.rebuild_index();
        transformer.transpose_filters().unwrap();
        assert_eq!(
            transformer.model.tensor("w").unwrap().dims,
            vec![8, 2, 3, 5]
        );
        let data = transformer.model.tensor("w").unwrap().data.clone();

        transformer.rebuild_index();
        transformer.transpose_filters().unwrap();
        let filter = transformer.model.tensor("w").unwrap();
        assert_eq!(filter.dims, vec![8, 2, 3, 5]);
        assert_eq!(filter.data, data);
    }

    #[test]
    fn gpu_filters_move_to_hwoi() {
        let mut graph = Graph::new(FilterFormat::Hwio);
        let mut builder = GraphBuilder::new(&mut graph);
        builder.random_constant("w", &[3, 3, 2, 8]);
        builder.conv2d("conv", "data", "w", &[1, 10, 10, 8]);

        let option = CompileOption::new(Device::Gpu)
            .input("data", &[1, 12, 12, 2])
            .output("conv");
        let mut transformer = Transformer::new(graph, option);
        transformer.rebuild_index();
        transformer.transpose_filters().unwrap();

        assert_eq!(
            transformer.model.filter_format().unwrap(),
            FilterFormat::Hwoi
        );
        assert_eq!(
            transformer.model.tensor("w").unwrap().dims,
            vec![3, 3, 8, 2]
        );
    }
}
