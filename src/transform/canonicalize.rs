//! Early canonicalization rewrites: identity elimination, global-pooling
//! kernel materialization, raw Add promotion and Softmax/Reshape folding.

use tracing::debug;

use super::{replace_in_list, Transformer};
use crate::graph::{keys, ArgValue, OpType};
use crate::types::DataFormat;
use crate::{ChiselError, ChiselResult};

impl Transformer {
    pub(super) fn remove_identity(&mut self) -> ChiselResult<bool> {
        let Some(idx) = self
            .model
            .op
            .iter()
            .position(|op| op.op_type == OpType::Identity)
        else {
            return Ok(false);
        };

        let name = self.model.op[idx].name.clone();
        let old_output = self.model.op[idx].output[0].clone();
        let new_input = self.model.op[idx].input[0].clone();
        debug!(op = %name, "remove identity");

        let consumers = self
            .index
            .consumers
            .get(&old_output)
            .cloned()
            .unwrap_or_default();
        for consumer in consumers {
            replace_in_list(&mut self.model.op[consumer].input, &old_output, &new_input);
        }
        self.replace_output_node(&name);
        self.model.remove_op(&name);
        Ok(true)
    }

    /// Pins the kernel of global pooling ops to the full spatial extent of
    /// their input feature map.
    pub(super) fn transform_global_pooling(&mut self) -> ChiselResult<bool> {
        for idx in 0..self.model.op.len() {
            let op = &self.model.op[idx];
            if op.op_type != OpType::Pooling || op.get_arg(keys::GLOBAL_POOLING).is_none() {
                continue;
            }
            let kernel = {
                let format = op.data_format().unwrap_or(DataFormat::Nchw);
                let producer = self.producer_op(&op.input[0]).ok_or_else(|| {
                    ChiselError::MalformedGraph(format!(
                        "pooling input {} has no producer",
                        op.input[0]
                    ))
                })?;
                let dims = &producer.output_shape[0].dims;
                let spatial = if format == DataFormat::Nhwc {
                    &dims[1..3]
                } else {
                    &dims[2..4]
                };
                spatial.iter().map(|&d| d as i64).collect::<Vec<i64>>()
            };
            debug!(op = %self.model.op[idx].name, ?kernel, "transform global pooling");
            self.model.op[idx].set_arg(keys::KERNEL, ArgValue::Ints(kernel));
        }
        Ok(false)
    }

    /// Promotes a raw two-input Add with a 1-D constant addend to BiasAdd so
    /// the fusion passes can match it.
    pub(super) fn transform_add_to_biasadd(&mut self) -> ChiselResult<bool> {
        for idx in 0..self.model.op.len() {
            let op = &self.model.op[idx];
            if op.op_type != OpType::Add || op.input.len() != 2 {
                continue;
            }
            let Some(&tensor) = self.index.consts.get(&op.input[1]) else {
                continue;
            };
            if self.model.tensors[tensor].dims.len() != 1 {
                continue;
            }
            debug!(op = %op.name, "transform add to biasadd");
            self.model.op[idx].op_type = OpType::BiasAdd;
            return Ok(true);
        }
        Ok(false)
    }

    /// Absorbs Reshape ops adjacent to a Softmax and pads its output shape
    /// to rank 4.
    pub(super) fn fold_softmax(&mut self) -> ChiselResult<bool> {
        for idx in 0..self.model.op.len() {
            if self.model.op[idx].op_type != OpType::Softmax {
                continue;
            }

            let name = self.model.op[idx].name.clone();
            let output0 = self.model.op[idx].output[0].clone();
            let input0 = self.model.op[idx].input[0].clone();
            let mut changed = false;

            if self.consumer_count(&output0) == 1 {
                let consumer_idx = self.index.consumers[&output0][0];
                let consumer_fold = {
                    let consumer = &self.model.op[consumer_idx];
                    if consumer.op_type == OpType::Reshape {
                        let shape = consumer.arg_ints(keys::SHAPE).ok_or_else(|| {
                            ChiselError::MalformedGraph(format!(
                                "reshape {} carries no shape argument",
                                consumer.name
                            ))
                        })?;
                        let dims = shape.iter().map(|&d| d as usize).collect::<Vec<usize>>();
                        Some((consumer.name.clone(), dims))
                    } else {
                        None
                    }
                };
                let producer_fold = {
                    let producer = self.producer_op(&input0).ok_or_else(|| {
                        ChiselError::MalformedGraph(format!(
                            "softmax input {} has no producer",
                            input0
                        ))
                    })?;
                    if producer.op_type == OpType::Reshape {
                        Some((producer.name.clone(), producer.input[0].clone()))
                    } else {
                        None
                    }
                };

                if let Some((consumer_name, dims)) = consumer_fold {
                    debug!(op = %name, "fold softmax: absorb trailing reshape");
                    if let Some(softmax) = self.model.find_op_mut(&name) {
                        softmax.output_shape[0].dims = dims;
                    }
                    self.replace_output_node(&consumer_name);
                    self.model.remove_op(&consumer_name);
                    changed = true;
                }
                if let Some((producer_name, producer_input)) = producer_fold {
                    debug!(op = %name, "fold softmax: bypass leading reshape");
                    if let Some(softmax) = self.model.find_op_mut(&name) {
                        softmax.input[0] = producer_input;
                    }
                    self.replace_output_node(&producer_name);
                    self.model.remove_op(&producer_name);
                    changed = true;
                }
            }

            if let Some(softmax) = self.model.find_op_mut(&name) {
                let rank = softmax.output_shape[0].dims.len();
                if rank < 4 {
                    let mut padded = vec![1usize; 4 - rank];
                    padded.extend(softmax.output_shape[0].dims.iter().copied());
                    softmax.output_shape[0].dims = padded;
                    changed = true;
                }
            }

            if changed {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
