//! Name-keyed index structures over the graph, rebuilt before every pass
//! invocation. The maps hold indices into the op and tensor lists, so any
//! structural mutation invalidates them.

use std::collections::HashMap;

use crate::graph::shape::{transpose_in_place, NHWC_TO_NCHW};
use crate::graph::{normalize_op_name, Graph, OpType, OperatorDef, OutputShape};
use crate::types::{CompileOption, DataFormat, Device};

/// Who produces a tensor: a real operator of the graph, or one of the
/// synthesized `Input` pseudo-ops standing in for a declared model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerRef {
    Node(usize),
    Synthetic(usize),
}

#[derive(Debug, Default)]
pub struct GraphIndex {
    /// Operator name to index in `graph.op`.
    pub ops: HashMap<String, usize>,
    /// Constant name to index in `graph.tensors`.
    pub consts: HashMap<String, usize>,
    /// Tensor name to its producer.
    pub producer: HashMap<String, ProducerRef>,
    /// Tensor name to the ops consuming it, one entry per input occurrence.
    pub consumers: HashMap<String, Vec<usize>>,
    /// Pseudo-ops backing producer lookups on declared model inputs. These
    /// are index-level only and never enter the operator list.
    pub synthetic_inputs: Vec<OperatorDef>,
}

impl GraphIndex {
    pub fn build(graph: &Graph, option: &CompileOption) -> Self {
        let mut index = GraphIndex::default();

        for (i, op) in graph.op.iter().enumerate() {
            index.ops.insert(op.name.clone(), i);
            for input in &op.input {
                index.consumers.entry(input.clone()).or_default().push(i);
            }
            for output in &op.output {
                index.producer.insert(output.clone(), ProducerRef::Node(i));
            }
        }
        for (i, tensor) in graph.tensors.iter().enumerate() {
            index.consts.insert(tensor.name.clone(), i);
        }

        for (name, shape) in &option.input_nodes {
            let mut op = OperatorDef::new(&normalize_op_name(name), OpType::Input);
            op.output.push(name.clone());
            let mut dims = shape.clone();
            if option.device == Device::Cpu {
                transpose_in_place(&mut dims, &NHWC_TO_NCHW);
                op.set_data_format(DataFormat::Nchw);
            } else {
                op.set_data_format(DataFormat::Nhwc);
            }
            op.output_shape.push(OutputShape { dims });

            let slot = index.synthetic_inputs.len();
            // A real op producing the same name keeps precedence: once a
            // boundary adapter exists it is the input's actual producer.
            index
                .producer
                .entry(name.clone())
                .or_insert(ProducerRef::Synthetic(slot));
            index.synthetic_inputs.push(op);
        }

        index
    }

    pub fn producer_op<'a>(&'a self, graph: &'a Graph, tensor: &str) -> Option<&'a OperatorDef> {
        match self.producer.get(tensor)? {
            ProducerRef::Node(i) => graph.op.get(*i),
            ProducerRef::Synthetic(i) => self.synthetic_inputs.get(*i),
        }
    }

    pub fn consumer_count(&self, tensor: &str) -> usize {
        self.consumers.get(tensor).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::keys;
    use crate::graph::ArgValue;
    use crate::types::FilterFormat;

    fn sample_graph() -> Graph {
        let mut graph = Graph::new(FilterFormat::Hwio);
        let mut conv = OperatorDef::new("conv", OpType::Conv2D);
        conv.input = vec!["data".to_string(), "w".to_string()];
        conv.output = vec!["conv".to_string()];
        conv.output_shape.push(OutputShape {
            dims: vec![1, 4, 4, 8],
        });
        graph.op.push(conv);
        let mut relu = OperatorDef::new("relu", OpType::Activation);
        relu.input = vec!["conv".to_string()];
        relu.output = vec!["relu".to_string()];
        relu.add_arg(keys::ACTIVATION_TYPE, ArgValue::Str("RELU".to_string()));
        graph.op.push(relu);
        graph
            .tensors
            .push(crate::graph::TensorDef::zeros("w", &[3, 3, 2, 8]));
        graph
    }

    #[test]
    fn builds_producer_and_consumer_maps() {
        let graph = sample_graph();
        let option = CompileOption::new(Device::Gpu).input("data", &[1, 6, 6, 2]);
        let index = GraphIndex::build(&graph, &option);

        assert_eq!(index.producer.get("conv"), Some(&ProducerRef::Node(0)));
        assert_eq!(index.producer.get("relu"), Some(&ProducerRef::Node(1)));
        assert_eq!(index.consumer_count("conv"), 1);
        assert_eq!(index.consumer_count("w"), 1);
        assert!(index.consts.contains_key("w"));
    }

    #[test]
    fn synthesizes_input_pseudo_op_per_device() {
        let graph = sample_graph();

        let gpu = CompileOption::new(Device::Gpu).input("data", &[1, 6, 6, 2]);
        let index = GraphIndex::build(&graph, &gpu);
        let input = index.producer_op(&graph, "data").unwrap();
        assert_eq!(input.op_type, OpType::Input);
        assert_eq!(input.output_shape[0].dims, vec![1, 6, 6, 2]);
        assert_eq!(input.data_format(), Some(DataFormat::Nhwc));

        let cpu = CompileOption::new(Device::Cpu).input("data", &[1, 6, 6, 2]);
        let index = GraphIndex::build(&graph, &cpu);
        let input = index.producer_op(&graph, "data").unwrap();
        assert_eq!(input.output_shape[0].dims, vec![1, 2, 6, 6]);
        assert_eq!(input.data_format(), Some(DataFormat::Nchw));
    }

    #[test]
    fn real_producer_keeps_precedence_over_synthetic() {
        let mut graph = sample_graph();
        let mut adapter = OperatorDef::new("data", OpType::Transpose);
        adapter.input.push("chisel_input_node_data".to_string());
        adapter.output.push("data".to_string());
        graph.op.push(adapter);

        let option = CompileOption::new(Device::Cpu).input("data", &[1, 6, 6, 2]);
        let index = GraphIndex::build(&graph, &option);
        let producer = index.producer_op(&graph, "data").unwrap();
        assert_eq!(producer.op_type, OpType::Transpose);
    }
}
