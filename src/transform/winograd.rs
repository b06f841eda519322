//! Winograd F(2x2, 3x3) expansion for eligible GPU convolutions: the Conv2D
//! becomes an (input transform, matmul, inverse transform) triple operating
//! on 4x4 tiles, with the filter permuted to OIHW in place.

use ndarray::IxDyn;
use tracing::debug;

use super::Transformer;
use crate::graph::shape::{feature_map_nhwc, filter_hwio};
use crate::graph::{keys, ArgValue, OpType, OperatorDef, OutputShape};
use crate::types::{DataFormat, Device, FilterFormat};
use crate::{ChiselError, ChiselResult};

/// Hard cap on any GPU image dimension.
const GPU_IMAGE_MAX_SIZE: usize = 16384;

impl Transformer {
    /// A convolution qualifies when it is a 3x3 stride-1 dilation-1 Conv2D
    /// and the transformed tensors fit the GPU image size limits.
    fn uses_winograd(&self, op: &OperatorDef) -> ChiselResult<bool> {
        if !self.option.winograd_enabled || op.op_type != OpType::Conv2D {
            return Ok(false);
        }
        let Some(&tensor) = self.index.consts.get(&op.input[1]) else {
            return Ok(false);
        };
        let strides = op.arg_ints(keys::STRIDES).ok_or_else(|| {
            ChiselError::MalformedGraph(format!("conv {} carries no strides argument", op.name))
        })?;
        let dilations: &[i64] = op.arg_ints(keys::DILATIONS).unwrap_or(&[1, 1]);
        let (filter_height, filter_width, in_channels, out_channels) = filter_hwio(
            &self.model.tensors[tensor].dims,
            self.model.filter_format()?,
        );
        let format = op.data_format().unwrap_or(DataFormat::Nchw);
        let (batch, out_height, out_width, _) =
            feature_map_nhwc(&op.output_shape[0].dims, format);

        if filter_height != 3
            || filter_width != 3
            || strides[0] > 1
            || strides[1] > 1
            || dilations[0] > 1
            || dilations[1] > 1
        {
            return Ok(false);
        }
        let tile_width = batch * ((out_height + 1) / 2) * ((out_width + 1) / 2);
        Ok(16 * in_channels < GPU_IMAGE_MAX_SIZE
            && 16 * out_channels < GPU_IMAGE_MAX_SIZE
            && tile_width < GPU_IMAGE_MAX_SIZE)
    }

    pub(super) fn transform_gpu_winograd(&mut self) -> ChiselResult<bool> {
        if self.option.device != Device::Gpu {
            return Ok(false);
        }
        let filter_format = self.model.filter_format()?;

        let mut eligible = Vec::new();
        for op in &self.model.op {
            if op.op_type == OpType::Conv2D && self.uses_winograd(op)? {
                eligible.push(op.name.clone());
            }
        }

        for name in eligible {
            let Some(original) = self.model.find_op(&name).cloned() else {
                continue;
            };
            debug!(op = %name, "transform gpu winograd");

            let filter_name = original.input[1].clone();
            let (_, _, in_channels, out_channels) = {
                let filter = self.model.tensor(&filter_name).ok_or_else(|| {
                    ChiselError::MalformedGraph(format!(
                        "filter constant {} not found",
                        filter_name
                    ))
                })?;
                filter_hwio(&filter.dims, filter_format)
            };
            let format = original.data_format();
            let (batch, out_height, out_width, _) = feature_map_nhwc(
                &original.output_shape[0].dims,
                format.unwrap_or(DataFormat::Nchw),
            );
            let tile_width = batch * ((out_height + 1) / 2) * ((out_width + 1) / 2);

            // Input transform over 4x4 tiles.
            let wt_name = format!("{}_input_transform", name);
            let mut wt = OperatorDef::new(&wt_name, OpType::WinogradTransform);
            wt.input.push(original.input[0].clone());
            wt.output.push(wt_name.clone());
            wt.output_shape.push(OutputShape {
                dims: vec![16, in_channels, tile_width, 1],
            });
            wt.add_arg(keys::T, ArgValue::Int(self.option.data_type));
            if let Some(padding) = original.get_arg(keys::PADDING) {
                wt.add_arg(keys::PADDING, padding.clone());
            } else if let Some(values) = original.get_arg(keys::PADDING_VALUES) {
                wt.add_arg(keys::PADDING_VALUES, values.clone());
            }

            // Batched matmul against the transformed filter.
            let matmul_name = format!("{}_matmul", name);
            let mut matmul = OperatorDef::new(&matmul_name, OpType::MatMul);
            matmul.input.push(filter_name.clone());
            matmul.input.push(wt_name.clone());
            matmul.output.push(matmul_name.clone());
            matmul.output_shape.push(OutputShape {
                dims: vec![16, out_channels, tile_width, 1],
            });
            matmul.add_arg(keys::T, ArgValue::Int(self.option.data_type));
            matmul.add_arg(keys::WINOGRAD_FILTER_TRANSFORMED, ArgValue::Int(1));

            // Inverse transform adopts the convolution's outputs (and bias).
            let iwt_name = format!("{}_inverse_transform", name);
            let mut iwt = OperatorDef::new(&iwt_name, OpType::WinogradInverseTransform);
            iwt.input.push(matmul_name);
            if original.input.len() >= 3 {
                iwt.input.push(original.input[2].clone());
            }
            iwt.output = original.output.clone();
            iwt.output_shape.push(OutputShape {
                dims: original.output_shape[0].dims.clone(),
            });
            iwt.add_arg(keys::T, ArgValue::Int(self.option.data_type));
            iwt.add_arg(keys::BATCH, ArgValue::Int(batch as i64));
            iwt.add_arg(keys::HEIGHT, ArgValue::Int(out_height as i64));
            iwt.add_arg(keys::WIDTH, ArgValue::Int(out_width as i64));
            if let Some(format) = format {
                iwt.set_data_format(format);
            }

            if let Some(filter) = self.model.tensor_mut(&filter_name) {
                let array = filter.to_array()?;
                let permuted = match filter_format {
                    FilterFormat::Hwio => array.permuted_axes(IxDyn(&[3, 2, 0, 1])),
                    FilterFormat::Hwoi => array.permuted_axes(IxDyn(&[2, 3, 0, 1])),
                    FilterFormat::Oihw => array,
                };
                filter.assign(permuted);
            }

            self.model.op.push(wt);
            self.model.op.push(matmul);
            self.model.op.push(iwt);
            self.model.remove_op(&name);
        }
        Ok(false)
    }
}
