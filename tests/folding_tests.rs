use chisel::graph::dsl::GraphBuilder;
use chisel::graph::{keys, Graph, OpType};
use chisel::transform;
use chisel::types::{CompileOption, Device, EltwiseType, FilterFormat};

use ndarray::{ArrayD, IxDyn};

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Conv -> Eltwise(PROD, scale) -> Eltwise(SUM, offset) -> ReLU, the shape
/// a batch norm takes after import.
fn bn_chain_graph() -> Graph {
    let mut graph = Graph::new(FilterFormat::Hwio);
    let mut builder = GraphBuilder::new(&mut graph);
    builder.constant("w", &[3, 3, 2, 5], (0..90).map(|v| v as f32).collect());
    builder.constant("scale", &[5], vec![0.5, 1.5, 2.0, -1.0, 3.0]);
    builder.constant("offset", &[5], vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    builder.conv2d("conv", "data", "w", &[1, 4, 4, 5]);
    builder.eltwise("bn_mul", "conv", "scale", EltwiseType::Prod, &[1, 4, 4, 5]);
    builder.eltwise("bn_add", "bn_mul", "offset", EltwiseType::Sum, &[1, 4, 4, 5]);
    builder.activation("relu", "bn_add", "RELU", &[1, 4, 4, 5]);
    graph
}

#[test]
fn batchnorm_chain_collapses_into_one_convolution() {
    init_logs();
    let option = CompileOption::new(Device::Cpu)
        .input("data", &[1, 6, 6, 2])
        .output("relu");
    let graph = transform::run(bn_chain_graph(), option).unwrap();

    // input transpose, the fused conv, output transpose
    assert_eq!(graph.op.len(), 3);
    let conv = &graph.op[1];
    assert_eq!(conv.op_type, OpType::Conv2D);
    assert_eq!(conv.name, "relu");
    assert_eq!(conv.input, vec!["data", "w", "offset"]);
    assert_eq!(conv.output, vec!["relu"]);
    assert_eq!(conv.arg_str(keys::ACTIVATION_TYPE), Some("RELU"));
    assert_eq!(conv.output_shape[0].dims, vec![1, 5, 4, 4]);

    // weights scaled along the output channel, then permuted HWIO -> OIHW
    let original =
        ArrayD::from_shape_vec(IxDyn(&[3, 3, 2, 5]), (0..90).map(|v| v as f32).collect())
            .unwrap();
    let scale =
        ArrayD::from_shape_vec(IxDyn(&[5]), vec![0.5, 1.5, 2.0, -1.0, 3.0]).unwrap();
    let expected = (&original * &scale).permuted_axes(IxDyn(&[3, 2, 0, 1]));
    let expected: Vec<f32> = expected.as_standard_layout().iter().copied().collect();

    let filter = graph.tensor("w").unwrap();
    assert_eq!(filter.dims, vec![5, 2, 3, 3]);
    assert_eq!(filter.data, expected);

    // the scale constant is absorbed, the offset survives as the bias
    assert!(graph.tensor("scale").is_none());
    assert!(graph.tensor("offset").is_some());
    assert_eq!(graph.filter_format().unwrap(), FilterFormat::Oihw);
}

#[test]
fn batchnorm_without_conv_stays_folded() {
    init_logs();
    let mut input = Graph::new(FilterFormat::Hwio);
    let mut builder = GraphBuilder::new(&mut input);
    builder.constant("scale", &[2], vec![2.0, 3.0]);
    builder.constant("offset", &[2], vec![0.5, -0.5]);
    builder.eltwise("scale_mul", "data", "scale", EltwiseType::Prod, &[1, 4, 4, 2]);
    builder.eltwise("offset_add", "scale_mul", "offset", EltwiseType::Sum, &[1, 4, 4, 2]);

    let option = CompileOption::new(Device::Cpu)
        .input("data", &[1, 4, 4, 2])
        .output("offset_add");
    let graph = transform::run(input, option).unwrap();

    let bn = graph.find_op("offset_add").unwrap();
    assert_eq!(bn.op_type, OpType::FoldedBatchNorm);
    assert_eq!(bn.input, vec!["data", "scale", "offset"]);
    // nothing absorbed the scale, so it stays in the table
    assert!(graph.tensor("scale").is_some());
}

#[test]
fn raw_add_becomes_bias_and_fuses_into_conv() {
    init_logs();
    let mut input = Graph::new(FilterFormat::Hwio);
    let mut builder = GraphBuilder::new(&mut input);
    builder.random_constant("w", &[3, 3, 2, 5]);
    builder.constant("bias", &[5], vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    builder.conv2d("conv", "data", "w", &[1, 4, 4, 5]);
    builder.add("badd", "conv", "bias", &[1, 4, 4, 5]);

    let option = CompileOption::new(Device::Cpu)
        .input("data", &[1, 6, 6, 2])
        .output("badd");
    let graph = transform::run(input, option).unwrap();

    let conv = graph.find_op("badd").unwrap();
    assert_eq!(conv.op_type, OpType::Conv2D);
    assert_eq!(conv.input, vec!["data", "w", "bias"]);
    assert_eq!(conv.output, vec!["badd"]);
}

#[test]
fn prelu_is_not_fused() {
    init_logs();
    let mut input = Graph::new(FilterFormat::Hwio);
    let mut builder = GraphBuilder::new(&mut input);
    builder.random_constant("w", &[3, 3, 2, 5]);
    builder.constant("alpha", &[5], vec![0.1; 5]);
    builder.conv2d("conv", "data", "w", &[1, 4, 4, 5]);
    let prelu = builder.activation("prelu", "conv", "PRELU", &[1, 4, 4, 5]);
    prelu.input.push("alpha".to_string());

    let option = CompileOption::new(Device::Cpu)
        .input("data", &[1, 6, 6, 2])
        .output("prelu");
    let graph = transform::run(input, option).unwrap();

    let prelu = graph.find_op("prelu").unwrap();
    assert_eq!(prelu.op_type, OpType::Activation);
    assert!(graph.find_op("conv").is_some());
}
