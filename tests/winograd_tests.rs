use chisel::graph::dsl::GraphBuilder;
use chisel::graph::{keys, ArgValue, Graph, OpType};
use chisel::transform;
use chisel::types::{CompileOption, Device, FilterFormat, ImageBufferKind};

use ndarray::{ArrayD, IxDyn};

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn conv_graph(strides: &[i64]) -> Graph {
    let mut graph = Graph::new(FilterFormat::Hwio);
    let mut builder = GraphBuilder::new(&mut graph);
    builder.random_constant("w", &[3, 3, 32, 64]);
    let out_spatial = 56 / strides[0] as usize;
    let conv = builder.conv2d("conv", "data", "w", &[1, out_spatial, out_spatial, 64]);
    conv.set_arg(keys::STRIDES, ArgValue::Ints(strides.to_vec()));
    graph
}

fn gpu_option() -> CompileOption {
    CompileOption::new(Device::Gpu)
        .input("data", &[1, 58, 58, 32])
        .output("conv")
        .winograd(true)
}

#[test]
fn eligible_conv_expands_and_lifts_the_filter_to_an_image() {
    init_logs();
    let input = conv_graph(&[1, 1]);
    let original_filter = input.tensor("w").unwrap().data.clone();
    let graph = transform::run(input, gpu_option()).unwrap();

    let names: Vec<&str> = graph.op.iter().map(|op| op.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "w_b2i",
            "data",
            "conv_input_transform",
            "conv_matmul",
            "conv_inverse_transform",
            "chisel_output_node_conv",
        ]
    );

    let filter_lift = graph.find_op("w_b2i").unwrap();
    assert_eq!(filter_lift.op_type, OpType::BufferToImage);
    assert_eq!(
        filter_lift.arg_i(keys::BUFFER_TYPE),
        Some(ImageBufferKind::WinogradFilter.code())
    );

    let matmul = graph.find_op("conv_matmul").unwrap();
    assert_eq!(matmul.input, vec!["w_b2i", "conv_input_transform"]);
    assert_eq!(matmul.arg_i(keys::WINOGRAD_FILTER_TRANSFORMED), Some(1));
    assert_eq!(matmul.output_shape[0].dims, vec![16, 64, 784, 1]);

    let inverse = graph.find_op("conv_inverse_transform").unwrap();
    assert_eq!(inverse.output, vec!["conv"]);
    assert_eq!(inverse.output_shape[0].dims, vec![1, 56, 56, 64]);

    // the filter payload was permuted HWIO -> OIHW in place
    let expected = ArrayD::from_shape_vec(IxDyn(&[3, 3, 32, 64]), original_filter)
        .unwrap()
        .permuted_axes(IxDyn(&[3, 2, 0, 1]));
    let expected: Vec<f32> = expected.as_standard_layout().iter().copied().collect();
    let filter = graph.tensor("w").unwrap();
    assert_eq!(filter.dims, vec![64, 32, 3, 3]);
    assert_eq!(filter.data, expected);
}

#[test]
fn strided_conv_is_left_alone() {
    init_logs();
    let graph = transform::run(conv_graph(&[2, 2]), gpu_option()).unwrap();

    assert!(graph
        .op
        .iter()
        .all(|op| op.op_type != OpType::WinogradTransform));
    let conv = graph.find_op("conv").unwrap();
    assert_eq!(conv.op_type, OpType::Conv2D);
    // the ordinary GPU filter re-layout still applies
    assert_eq!(graph.tensor("w").unwrap().dims, vec![3, 3, 64, 32]);
}

#[test]
fn winograd_respects_the_option_flag() {
    init_logs();
    let option = gpu_option().winograd(false);
    let graph = transform::run(conv_graph(&[1, 1]), option).unwrap();
    assert!(graph
        .op
        .iter()
        .all(|op| op.op_type != OpType::WinogradTransform));
}
