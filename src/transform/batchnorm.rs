//! Batch-norm folding: a PROD/SUM constant pair collapses into a
//! FoldedBatchNorm, whose scale is then folded into the upstream
//! convolution filter, leaving a plain BiasAdd behind.

use ndarray::Axis;
use tracing::debug;

use super::Transformer;
use crate::graph::{keys, OpType};
use crate::types::{EltwiseType, FilterFormat};
use crate::{ChiselError, ChiselResult};

impl Transformer {
    /// Matches `x * scale` followed by `+ offset` (as a SUM-Eltwise or a
    /// BiasAdd) with constant 1-D operands and rewrites the pair into one
    /// FoldedBatchNorm. The scale and offset constants stay in the table for
    /// the conv folding passes to absorb.
    pub(super) fn fold_batchnorm(&mut self) -> ChiselResult<bool> {
        let mut plan = None;
        for (idx, op) in self.model.op.iter().enumerate() {
            if op.op_type != OpType::Eltwise
                || op.arg_i(keys::ELEMENT_TYPE) != Some(EltwiseType::Prod.code())
                || op.input.len() != 2
                || !self.index.consts.contains_key(&op.input[1])
                || self.consumer_count(&op.output[0]) != 1
                || self.is_output_node(op)
            {
                continue;
            }
            let consumer_idx = self.index.consumers[&op.output[0]][0];
            let consumer = &self.model.op[consumer_idx];
            let sums = consumer.op_type == OpType::Eltwise
                && consumer.arg_i(keys::ELEMENT_TYPE) == Some(EltwiseType::Sum.code());
            if !(sums || consumer.op_type == OpType::BiasAdd) || consumer.input.len() != 2 {
                continue;
            }
            let Some(&offset) = self.index.consts.get(&consumer.input[1]) else {
                continue;
            };
            if self.model.tensors[offset].dims.len() != 1 {
                continue;
            }
            plan = Some((idx, consumer_idx));
            break;
        }

        let Some((idx, consumer_idx)) = plan else {
            return Ok(false);
        };
        let prod_name = self.model.op[idx].name.clone();
        let x = self.model.op[idx].input[0].clone();
        let scale = self.model.op[idx].input[1].clone();
        debug!(op = %prod_name, "fold batchnorm");

        let consumer = &mut self.model.op[consumer_idx];
        let offset = consumer.input[1].clone();
        consumer.op_type = OpType::FoldedBatchNorm;
        consumer.input = vec![x, scale, offset];
        self.model.remove_op(&prod_name);
        Ok(true)
    }

    /// Folds the scale of a trailing FoldedBatchNorm into the convolution
    /// filter, multiplying along the output-channel axis of the current
    /// filter layout, then demotes the batch norm to a BiasAdd.
    pub(super) fn fold_conv_and_bn(&mut self) -> ChiselResult<bool> {
        let Some((idx, consumer_idx)) =
            self.find_bn_consumer(|op_type| matches!(op_type, OpType::Conv2D | OpType::Deconv2D))
        else {
            return Ok(false);
        };
        debug!(op = %self.model.op[idx].name, "fold conv and bn");

        let filter_name = self.model.op[idx].input[1].clone();
        let scale_name = self.model.op[consumer_idx].input[1].clone();
        let scale = self.lookup_scale(&scale_name)?;

        let axis = match self.model.filter_format()? {
            FilterFormat::Hwio => Axis(3),
            FilterFormat::Oihw => Axis(0),
            FilterFormat::Hwoi => {
                return Err(ChiselError::UnsupportedFilterFormat("HWOI".to_string()))
            }
        };
        let filter = self.model.tensor_mut(&filter_name).ok_or_else(|| {
            ChiselError::MalformedGraph(format!("filter constant {} not found", filter_name))
        })?;
        let mut array = filter.to_array()?;
        if array.len_of(axis) != scale.len() {
            return Err(ChiselError::ShapeMismatch {
                name: scale_name,
                len: scale.len(),
                dims: filter.dims.clone(),
            });
        }
        for (mut lane, s) in array.axis_iter_mut(axis).zip(scale.iter()) {
            lane *= *s;
        }
        filter.assign(array);

        self.demote_bn_to_biasadd(consumer_idx, &scale_name);
        Ok(true)
    }

    /// Depthwise variant: the scale vector is indexed per
    /// (in-channel, multiplier) pair.
    pub(super) fn fold_depthwise_conv_and_bn(&mut self) -> ChiselResult<bool> {
        let Some((idx, consumer_idx)) =
            self.find_bn_consumer(|op_type| *op_type == OpType::DepthwiseConv2d)
        else {
            return Ok(false);
        };
        debug!(op = %self.model.op[idx].name, "fold depthwise conv and bn");

        let filter_name = self.model.op[idx].input[1].clone();
        let scale_name = self.model.op[consumer_idx].input[1].clone();
        let scale = self.lookup_scale(&scale_name)?;

        let filter_format = self.model.filter_format()?;
        let filter = self.model.tensor_mut(&filter_name).ok_or_else(|| {
            ChiselError::MalformedGraph(format!("filter constant {} not found", filter_name))
        })?;
        let (multiplier, in_channels) = match filter_format {
            // (H, W, I, M)
            FilterFormat::Hwio => (filter.dims[3], filter.dims[2]),
            // (M, I, H, W)
            FilterFormat::Oihw => (filter.dims[0], filter.dims[1]),
            FilterFormat::Hwoi => {
                return Err(ChiselError::UnsupportedFilterFormat("HWOI".to_string()))
            }
        };
        if scale.len() != multiplier * in_channels {
            return Err(ChiselError::ShapeMismatch {
                name: scale_name,
                len: scale.len(),
                dims: filter.dims.clone(),
            });
        }
        let mut array = filter.to_array()?;
        match filter_format {
            FilterFormat::Hwio => {
                for (ix, value) in array.indexed_iter_mut() {
                    *value *= scale[ix[2] * multiplier + ix[3]];
                }
            }
            FilterFormat::Oihw => {
                for (ix, value) in array.indexed_iter_mut() {
                    *value *= scale[ix[1] * multiplier + ix[0]];
                }
            }
            FilterFormat::Hwoi => unreachable!(),
        }
        filter.assign(array);

        self.demote_bn_to_biasadd(consumer_idx, &scale_name);
        Ok(true)
    }

    fn find_bn_consumer(&self, matches: impl Fn(&OpType) -> bool) -> Option<(usize, usize)> {
        for (idx, op) in self.model.op.iter().enumerate() {
            if !matches(&op.op_type) || self.consumer_count(&op.output[0]) != 1 {
                continue;
            }
            let consumer_idx = self.index.consumers[&op.output[0]][0];
            if self.model.op[consumer_idx].op_type == OpType::FoldedBatchNorm {
                return Some((idx, consumer_idx));
            }
        }
        None
    }

    fn lookup_scale(&self, name: &str) -> ChiselResult<Vec<f32>> {
        self.model
            .tensor(name)
            .map(|t| t.data.clone())
            .ok_or_else(|| {
                ChiselError::MalformedGraph(format!("scale constant {} not found", name))
            })
    }

    /// The batch norm keeps only (x, offset) and becomes a BiasAdd; the
    /// absorbed scale constant leaves the tensor table.
    fn demote_bn_to_biasadd(&mut self, consumer_idx: usize, scale_name: &str) {
        let consumer = &mut self.model.op[consumer_idx];
        consumer.op_type = OpType::BiasAdd;
        consumer.input.remove(1);
        self.model.remove_tensor(scale_name);
    }
}
