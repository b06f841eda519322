//! Fusion of trailing BiasAdd and Activation ops into their producer. The
//! producer adopts the consumer's name and output so downstream references
//! and declared output names stay valid.

use tracing::debug;

use super::Transformer;
use crate::graph::{keys, OpType};
use crate::ChiselResult;

fn takes_bias(op_type: &OpType) -> bool {
    matches!(
        op_type,
        OpType::Conv2D
            | OpType::Deconv2D
            | OpType::DepthwiseConv2d
            | OpType::FullyConnected
            | OpType::WinogradInverseTransform
    )
}

fn takes_activation(op_type: &OpType) -> bool {
    takes_bias(op_type) || *op_type == OpType::FoldedBatchNorm
}

impl Transformer {
    pub(super) fn fold_biasadd(&mut self) -> ChiselResult<bool> {
        let mut plan = None;
        for (idx, op) in self.model.op.iter().enumerate() {
            if !takes_bias(&op.op_type) || op.input.len() != 2 {
                continue;
            }
            if self.consumer_count(&op.output[0]) != 1 {
                continue;
            }
            let consumer_idx = self.index.consumers[&op.output[0]][0];
            if self.model.op[consumer_idx].op_type == OpType::BiasAdd {
                plan = Some((idx, consumer_idx));
                break;
            }
        }
        let Some((idx, consumer_idx)) = plan else {
            return Ok(false);
        };
        debug!(op = %self.model.op[idx].name, "fold biasadd");

        let consumer = self.model.op.remove(consumer_idx);
        let idx = if idx > consumer_idx { idx - 1 } else { idx };
        let op = &mut self.model.op[idx];
        op.name = consumer.name.clone();
        op.input.push(consumer.input[1].clone());
        op.output[0] = consumer.output[0].clone();
        Ok(true)
    }

    /// PRELU is excluded: its alpha tensor makes it a real op on every
    /// backend rather than a fused epilogue.
    pub(super) fn fold_activation(&mut self) -> ChiselResult<bool> {
        let mut plan = None;
        for (idx, op) in self.model.op.iter().enumerate() {
            if !takes_activation(&op.op_type) || self.consumer_count(&op.output[0]) != 1 {
                continue;
            }
            let consumer_idx = self.index.consumers[&op.output[0]][0];
            let consumer = &self.model.op[consumer_idx];
            if consumer.op_type == OpType::Activation
                && consumer.arg_str(keys::ACTIVATION_TYPE) != Some("PRELU")
            {
                plan = Some((idx, consumer_idx));
                break;
            }
        }
        let Some((idx, consumer_idx)) = plan else {
            return Ok(false);
        };
        debug!(op = %self.model.op[idx].name, "fold activation");

        let consumer = self.model.op.remove(consumer_idx);
        let idx = if idx > consumer_idx { idx - 1 } else { idx };
        let op = &mut self.model.op[idx];
        op.name = consumer.name.clone();
        op.output[0] = consumer.output[0].clone();
        for arg in &consumer.arg {
            if arg.name == keys::ACTIVATION_TYPE || arg.name == keys::ACTIVATION_MAX_LIMIT {
                op.arg.push(arg.clone());
            }
        }
        Ok(true)
    }
}
