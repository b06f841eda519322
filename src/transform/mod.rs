//! The transformation pipeline: a fixed-order list of graph rewrites driven
//! to fixpoint over a mutable model IR.

mod batchnorm;
mod canonicalize;
mod fuse;
mod image;
mod layout;
mod sort;
mod winograd;

use crate::graph::index::GraphIndex;
use crate::graph::{Graph, OperatorDef};
use crate::types::{CompileOption, DataFormat};
use crate::ChiselResult;
use tracing::debug;

type Pass = fn(&mut Transformer) -> ChiselResult<bool>;

/// Rewrites a naive imported model into an optimized, device-specialized
/// one. Holds the model, the compile option and the name-keyed index maps
/// that are rebuilt before every pass invocation.
pub struct Transformer {
    model: Graph,
    option: CompileOption,
    index: GraphIndex,
    target_data_format: DataFormat,
}

impl Transformer {
    // DO NOT reorder: earlier passes expose the structure later ones match.
    const PASSES: &'static [(&'static str, Pass)] = &[
        ("remove_identity", Self::remove_identity),
        ("transform_global_pooling", Self::transform_global_pooling),
        ("fold_softmax", Self::fold_softmax),
        ("fold_batchnorm", Self::fold_batchnorm),
        ("fold_conv_and_bn", Self::fold_conv_and_bn),
        ("fold_depthwise_conv_and_bn", Self::fold_depthwise_conv_and_bn),
        ("transform_gpu_winograd", Self::transform_gpu_winograd),
        ("transform_add_to_biasadd", Self::transform_add_to_biasadd),
        ("fold_biasadd", Self::fold_biasadd),
        ("fold_activation", Self::fold_activation),
        ("transpose_filters", Self::transpose_filters),
        ("transpose_data_format", Self::transpose_data_format),
        ("transform_global_conv_to_fc", Self::transform_global_conv_to_fc),
        ("transform_buffer_image", Self::transform_buffer_image),
        ("sort_by_execution", Self::sort_by_execution),
    ];

    pub fn new(model: Graph, option: CompileOption) -> Self {
        let target_data_format = option.target_data_format();
        Self {
            model,
            option,
            index: GraphIndex::default(),
            target_data_format,
        }
    }

    /// Drives every pass to fixpoint in the declared order, then returns
    /// the transformed model.
    #[tracing::instrument(skip(self), fields(device = ?self.option.device))]
    pub fn run(mut self) -> ChiselResult<Graph> {
        for &(name, pass) in Self::PASSES {
            loop {
                self.rebuild_index();
                let changed = pass(&mut self)?;
                if !changed {
                    break;
                }
                debug!(pass = name, "pass reported a change, re-running");
            }
        }
        Ok(self.model)
    }

    fn rebuild_index(&mut self) {
        self.index = GraphIndex::build(&self.model, &self.option);
    }

    fn consumer_count(&self, tensor: &str) -> usize {
        self.index.consumer_count(tensor)
    }

    fn producer_op(&self, tensor: &str) -> Option<&OperatorDef> {
        self.index.producer_op(&self.model, tensor)
    }

    fn is_output_node(&self, op: &OperatorDef) -> bool {
        op.output
            .iter()
            .any(|out| self.option.output_nodes.contains(out))
    }

    /// When removing an op whose output is a declared model output, rename
    /// the upstream producer's output so the external name survives. Must be
    /// called while the doomed op is still in the list.
    fn replace_output_node(&mut self, name: &str) {
        let Some(idx) = self.model.op.iter().position(|op| op.name == name) else {
            return;
        };
        let is_output = self.model.op[idx]
            .output
            .iter()
            .any(|out| self.option.output_nodes.contains(out));
        if !is_output {
            return;
        }
        let input0 = self.model.op[idx].input[0].clone();
        let output0 = self.model.op[idx].output[0].clone();
        for j in 0..self.model.op.len() {
            if j == idx {
                continue;
            }
            if self.model.op[j].output.iter().any(|out| out == &input0) {
                replace_in_list(&mut self.model.op[j].output, &input0, &output0);
                debug!(
                    producer = %self.model.op[j].name,
                    output = %output0,
                    "rewired graph output onto upstream producer"
                );
                return;
            }
        }
    }
}

/// Rewrite every occurrence of `from` in the list to `to`.
pub(crate) fn replace_in_list(list: &mut [String], from: &str, to: &str) {
    for item in list.iter_mut() {
        if item.as_str() == from {
            *item = to.to_string();
        }
    }
}

/// Convenience entry point: transform `model` for `option` in one call.
pub fn run(model: Graph, option: CompileOption) -> ChiselResult<Graph> {
    Transformer::new(model, option).run()
}
