use chisel::graph::dsl::GraphBuilder;
use chisel::graph::verifier::Verifier;
use chisel::graph::{Graph, OpType};
use chisel::transform;
use chisel::types::{CompileOption, Device, EltwiseType, FilterFormat, ImageBufferKind};
use chisel::ChiselError;

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A small conv net exercising most of the pipeline: identity, batch norm
/// folding, bias/activation fusion and an unreachable branch.
fn sample_net() -> Graph {
    let mut graph = Graph::new(FilterFormat::Hwio);
    let mut builder = GraphBuilder::new(&mut graph);
    builder.random_constant("w0", &[3, 3, 2, 4]);
    builder.random_constant("w1", &[3, 3, 4, 8]);
    builder.random_constant("w_dead", &[3, 3, 2, 4]);
    builder.constant("scale", &[4], vec![0.5, 1.5, 2.0, 2.5]);
    builder.constant("offset", &[4], vec![0.1, 0.2, 0.3, 0.4]);
    builder.conv2d("conv0", "data", "w0", &[1, 8, 8, 4]);
    builder.eltwise("bn_mul", "conv0", "scale", EltwiseType::Prod, &[1, 8, 8, 4]);
    builder.eltwise("bn_add", "bn_mul", "offset", EltwiseType::Sum, &[1, 8, 8, 4]);
    builder.activation("relu0", "bn_add", "RELU", &[1, 8, 8, 4]);
    builder.identity("id", "relu0", &[1, 8, 8, 4]);
    builder.conv2d("conv1", "id", "w1", &[1, 6, 6, 8]);
    // never feeds an output, must be dropped by the final sort
    builder.conv2d("orphan", "data", "w_dead", &[1, 8, 8, 4]);
    graph
}

fn sample_option(device: Device) -> CompileOption {
    CompileOption::new(device)
        .input("data", &[1, 10, 10, 2])
        .output("conv1")
}

#[test]
fn cpu_pipeline_satisfies_the_post_run_contract() {
    init_logs();
    let option = sample_option(Device::Cpu);
    let graph = transform::run(sample_net(), option.clone()).unwrap();

    Verifier::verify(&graph, &option).unwrap();
    assert!(graph.find_op("orphan").is_none());
    assert!(graph.op.iter().all(|op| op.op_type != OpType::Identity));
    assert!(graph.op.iter().all(|op| op.op_type != OpType::Eltwise));

    // the fused first conv carries bias and activation
    let conv0 = graph.find_op("relu0").unwrap();
    assert_eq!(conv0.op_type, OpType::Conv2D);
    assert_eq!(conv0.input.len(), 3);
}

#[test]
fn gpu_pipeline_satisfies_the_post_run_contract() {
    init_logs();
    let option = sample_option(Device::Gpu);
    let graph = transform::run(sample_net(), option.clone()).unwrap();

    Verifier::verify(&graph, &option).unwrap();
    assert!(graph.find_op("orphan").is_none());

    // conv filters were lifted into image space
    assert!(graph
        .op
        .iter()
        .any(|op| op.op_type == OpType::BufferToImage));
    assert!(graph
        .op
        .iter()
        .any(|op| op.op_type == OpType::ImageToBuffer));
}

#[test]
fn the_engine_is_deterministic() {
    init_logs();
    let net = sample_net();
    let option = sample_option(Device::Cpu);
    let first = transform::run(net.clone(), option.clone()).unwrap();
    let second = transform::run(net, option).unwrap();
    assert_eq!(first, second);
}

#[test]
fn folded_batchnorm_arguments_become_images_on_gpu() {
    init_logs();
    let mut input = Graph::new(FilterFormat::Hwio);
    {
        let mut builder = GraphBuilder::new(&mut input);
        builder.constant("scale", &[2], vec![2.0, 3.0]);
        builder.constant("offset", &[2], vec![0.5, -0.5]);
        builder.eltwise("scale_mul", "data", "scale", EltwiseType::Prod, &[1, 4, 4, 2]);
        builder.eltwise("offset_add", "scale_mul", "offset", EltwiseType::Sum, &[1, 4, 4, 2]);
    }

    let option = CompileOption::new(Device::Gpu)
        .input("data", &[1, 4, 4, 2])
        .output("offset_add");
    let graph = transform::run(input, option).unwrap();

    let bn = graph.find_op("offset_add").unwrap();
    assert_eq!(bn.op_type, OpType::FoldedBatchNorm);
    assert_eq!(bn.input, vec!["data", "scale_b2i", "offset_b2i"]);
    let lift = graph.find_op("scale_b2i").unwrap();
    assert_eq!(
        lift.arg_i(chisel::graph::keys::BUFFER_TYPE),
        Some(ImageBufferKind::Argument.code())
    );
}

#[test]
fn an_unproduced_output_fails_compilation() {
    init_logs();
    let option = CompileOption::new(Device::Cpu)
        .input("data", &[1, 10, 10, 2])
        .output("missing");
    let err = transform::run(sample_net(), option).unwrap_err();
    assert!(matches!(err, ChiselError::MalformedGraph(_)));
}
