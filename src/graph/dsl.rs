//! Fluent construction of graphs, used by importer glue and tests.
//!
//! Every op built here follows the importer conventions: one output named
//! after the op, and an NHWC data-format tag (constants excepted). Callers
//! adjust arguments on the returned op where the defaults do not fit.

use crate::graph::{keys, ArgValue, Graph, OpType, OperatorDef, OutputShape, TensorDef};
use crate::types::{DataFormat, EltwiseType, PaddingMode};

pub struct GraphBuilder<'a> {
    graph: &'a mut Graph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(graph: &'a mut Graph) -> Self {
        Self { graph }
    }

    pub fn constant(&mut self, name: &str, dims: &[usize], data: Vec<f32>) {
        self.graph.tensors.push(TensorDef::new(name, dims, data));
    }

    pub fn random_constant(&mut self, name: &str, dims: &[usize]) {
        self.graph.tensors.push(TensorDef::random(name, dims));
    }

    /// Raw op with no implied arguments.
    pub fn op(
        &mut self,
        name: &str,
        op_type: OpType,
        inputs: &[&str],
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let mut op = OperatorDef::new(name, op_type);
        op.input = inputs.iter().map(|s| s.to_string()).collect();
        op.output.push(name.to_string());
        op.output_shape.push(OutputShape {
            dims: out_shape.to_vec(),
        });
        self.graph.op.push(op);
        let idx = self.graph.op.len() - 1;
        &mut self.graph.op[idx]
    }

    fn tagged_op(
        &mut self,
        name: &str,
        op_type: OpType,
        inputs: &[&str],
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.op(name, op_type, inputs, out_shape);
        op.set_data_format(DataFormat::Nhwc);
        op
    }

    pub fn conv2d(
        &mut self,
        name: &str,
        input: &str,
        filter: &str,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::Conv2D, &[input, filter], out_shape);
        op.add_arg(keys::STRIDES, ArgValue::Ints(vec![1, 1]));
        op.add_arg(keys::PADDING, ArgValue::Int(PaddingMode::Valid.code()));
        op
    }

    pub fn depthwise_conv2d(
        &mut self,
        name: &str,
        input: &str,
        filter: &str,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::DepthwiseConv2d, &[input, filter], out_shape);
        op.add_arg(keys::STRIDES, ArgValue::Ints(vec![1, 1]));
        op.add_arg(keys::PADDING, ArgValue::Int(PaddingMode::Valid.code()));
        op
    }

    pub fn eltwise(
        &mut self,
        name: &str,
        a: &str,
        b: &str,
        kind: EltwiseType,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::Eltwise, &[a, b], out_shape);
        op.add_arg(keys::ELEMENT_TYPE, ArgValue::Int(kind.code()));
        op
    }

    pub fn biasadd(
        &mut self,
        name: &str,
        input: &str,
        bias: &str,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        self.tagged_op(name, OpType::BiasAdd, &[input, bias], out_shape)
    }

    /// Raw two-input Add, the pre-canonical form emitted by importers.
    pub fn add(&mut self, name: &str, a: &str, b: &str, out_shape: &[usize]) -> &mut OperatorDef {
        self.tagged_op(name, OpType::Add, &[a, b], out_shape)
    }

    pub fn activation(
        &mut self,
        name: &str,
        input: &str,
        kind: &str,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::Activation, &[input], out_shape);
        op.add_arg(keys::ACTIVATION_TYPE, ArgValue::Str(kind.to_string()));
        op
    }

    pub fn softmax(&mut self, name: &str, input: &str, out_shape: &[usize]) -> &mut OperatorDef {
        self.tagged_op(name, OpType::Softmax, &[input], out_shape)
    }

    pub fn reshape(
        &mut self,
        name: &str,
        input: &str,
        shape: &[i64],
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::Reshape, &[input], out_shape);
        op.add_arg(keys::SHAPE, ArgValue::Ints(shape.to_vec()));
        op
    }

    pub fn identity(&mut self, name: &str, input: &str, out_shape: &[usize]) -> &mut OperatorDef {
        self.tagged_op(name, OpType::Identity, &[input], out_shape)
    }

    pub fn pooling(
        &mut self,
        name: &str,
        input: &str,
        kernel: &[i64],
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::Pooling, &[input], out_shape);
        op.add_arg(keys::KERNEL, ArgValue::Ints(kernel.to_vec()));
        op.add_arg(keys::STRIDES, ArgValue::Ints(vec![1, 1]));
        op
    }

    pub fn global_pooling(
        &mut self,
        name: &str,
        input: &str,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.pooling(name, input, &[1, 1], out_shape);
        op.add_arg(keys::GLOBAL_POOLING, ArgValue::Int(1));
        op
    }

    pub fn concat(
        &mut self,
        name: &str,
        inputs: &[&str],
        axis: i64,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::Concat, inputs, out_shape);
        op.add_arg(keys::AXIS, ArgValue::Int(axis));
        op
    }

    pub fn pad(
        &mut self,
        name: &str,
        input: &str,
        paddings: &[i64],
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        let op = self.tagged_op(name, OpType::Pad, &[input], out_shape);
        op.add_arg(keys::PADDINGS, ArgValue::Ints(paddings.to_vec()));
        op
    }

    pub fn fully_connected(
        &mut self,
        name: &str,
        input: &str,
        weight: &str,
        out_shape: &[usize],
    ) -> &mut OperatorDef {
        self.tagged_op(name, OpType::FullyConnected, &[input, weight], out_shape)
    }
}
