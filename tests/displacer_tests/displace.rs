use crate::displacer_tests::{binary, dequantize_transpose_matmul, lt, quant, unary};
use partition_displacer::backends::ndarray_backend::NDArrayNumericTensor;
use partition_displacer::displacer::filling::{FillOutcome, quantize_filling};
use partition_displacer::dtype::DType;
use partition_displacer::graph::{ArgKind, DeserializedAttr, DeserializedGraph, OpKind};
use partition_displacer::memory::{Memory, MemoryDesc};
use partition_displacer::{
    DisplaceError, DisplaceStatus, DisplacerConfig, EvalBackend, PartitionDataDisplacer,
};

fn generated_input(
    backend: &mut EvalBackend,
    graph: &DeserializedGraph,
    main_op_id: usize,
    dtype: DType,
) -> Memory {
    let main_op = graph.op(graph.find_op(main_op_id).unwrap());
    match quantize_filling(backend, &DisplacerConfig::default(), main_op, ArgKind::Src, dtype)
        .unwrap()
    {
        FillOutcome::Filled(mem) => mem,
        FillOutcome::Skipped(reason) => panic!("unexpected skip: {reason}"),
    }
}

pub fn test_untouched_tensor_keeps_bytes(backend: &mut EvalBackend) {
    let graph = dequantize_transpose_matmul();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2], DisplacerConfig::default()).unwrap();
    let data = NDArrayNumericTensor::from_vec_shape(vec![1.5f32; 15], &[3, 5]).unwrap();
    let mut buffer = Memory::from_tensor(data);
    let before = buffer.to_bytes();

    let status = displacer.displace(backend, 3, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Untouched);
    assert_eq!(buffer.to_bytes(), before);

    let status = displacer.displace(backend, 42, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Untouched);
    assert_eq!(buffer.to_bytes(), before);
}

pub fn test_unbound_displacer_fails(backend: &mut EvalBackend) {
    let displacer = PartitionDataDisplacer::default();
    let mut buffer = Memory::new(MemoryDesc::new(DType::U8, &[3, 4]));
    let result = displacer.displace(backend, 0, &mut buffer);
    assert!(matches!(result, Err(DisplaceError::Unbound)));
}

pub fn test_unknown_partition_op_is_rejected(_backend: &mut EvalBackend) {
    let graph = dequantize_transpose_matmul();
    let result = PartitionDataDisplacer::new(&graph, &[0, 99], DisplacerConfig::default());
    assert!(matches!(result, Err(DisplaceError::UnknownPartitionOp(99))));
}

pub fn test_chain_matches_manual_quantize_and_transpose(backend: &mut EvalBackend) {
    let graph = dequantize_transpose_matmul();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2], DisplacerConfig::default()).unwrap();
    let mut buffer = Memory::new(MemoryDesc::new(DType::U8, &[3, 4]));
    let status = displacer.displace(backend, 0, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Displaced);

    let generated = generated_input(backend, &graph, 2, DType::U8);
    assert_eq!(generated.desc(), &MemoryDesc::new(DType::U8, &[4, 3]));
    let values: Vec<u8> = generated.data().try_to_vec().unwrap();

    // quantize(x) = x / 0.5 + 2, applied after undoing the [1, 0] transpose
    let mut expected = vec![0u8; 12];
    for r in 0..3 {
        for c in 0..4 {
            expected[r * 4 + c] = values[c * 3 + r] * 2 + 2;
        }
    }
    assert_eq!(buffer.to_bytes(), expected);
}

pub fn test_displace_is_deterministic(backend: &mut EvalBackend) {
    let graph = dequantize_transpose_matmul();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2], DisplacerConfig::default()).unwrap();
    let mut first = Memory::new(MemoryDesc::new(DType::U8, &[3, 4]));
    let mut second = Memory::new(MemoryDesc::new(DType::U8, &[3, 4]));
    let a = displacer.displace(backend, 0, &mut first).unwrap();
    let b = displacer.displace(backend, 0, &mut second).unwrap();
    assert_eq!(a, b);
    assert_eq!(first, second);
}

pub fn test_conv_transpose_is_displaced(backend: &mut EvalBackend) {
    let graph = DeserializedGraph::new(vec![
        quant(
            0,
            OpKind::Dequantize,
            lt(0, DType::U8, &[1, 4, 4, 2]),
            lt(1, DType::F32, &[1, 4, 4, 2]),
            0.5,
            0,
        ),
        binary(
            1,
            OpKind::ConvTranspose,
            lt(1, DType::F32, &[1, 4, 4, 2]),
            lt(2, DType::F32, &[3, 3, 2, 2]),
            lt(3, DType::F32, &[1, 6, 6, 2]),
        ),
    ])
    .unwrap();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1], DisplacerConfig::default()).unwrap();
    let mut buffer = Memory::new(MemoryDesc::new(DType::U8, &[1, 4, 4, 2]));
    let status = displacer.displace(backend, 0, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Displaced);

    let generated = generated_input(backend, &graph, 1, DType::U8);
    let values: Vec<u8> = generated.data().try_to_vec().unwrap();
    let expected: Vec<u8> = values.iter().map(|v| v * 2).collect();
    assert_eq!(buffer.to_bytes(), expected);
}

pub fn test_conv_1d_is_displaced(backend: &mut EvalBackend) {
    let graph = DeserializedGraph::new(vec![
        quant(
            0,
            OpKind::Dequantize,
            lt(0, DType::U8, &[1, 8, 2]),
            lt(1, DType::F32, &[1, 8, 2]),
            0.5,
            0,
        ),
        binary(
            1,
            OpKind::Convolution,
            lt(1, DType::F32, &[1, 8, 2]),
            lt(2, DType::F32, &[3, 2, 2]),
            lt(3, DType::F32, &[1, 6, 2]),
        ),
    ])
    .unwrap();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1], DisplacerConfig::default()).unwrap();
    let mut buffer = Memory::new(MemoryDesc::new(DType::U8, &[1, 8, 2]));
    let status = displacer.displace(backend, 0, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Displaced);

    let generated = generated_input(backend, &graph, 1, DType::U8);
    let values: Vec<u8> = generated.data().try_to_vec().unwrap();
    let expected: Vec<u8> = values.iter().map(|v| v * 2).collect();
    assert_eq!(buffer.to_bytes(), expected);
}

pub fn test_pool_keeps_int8_output(backend: &mut EvalBackend) {
    let graph = DeserializedGraph::new(vec![
        quant(
            0,
            OpKind::Dequantize,
            lt(0, DType::I8, &[1, 2, 2, 1]),
            lt(1, DType::F32, &[1, 2, 2, 1]),
            1.0,
            0,
        ),
        unary(
            1,
            OpKind::MaxPool,
            lt(1, DType::F32, &[1, 2, 2, 1]),
            lt(2, DType::F32, &[1, 1, 1, 1]),
        )
        .with_attr("kernel", DeserializedAttr::S64Vec(vec![2, 2]))
        .with_attr("strides", DeserializedAttr::S64Vec(vec![2, 2])),
    ])
    .unwrap();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1], DisplacerConfig::default()).unwrap();
    let mut buffer = Memory::new(MemoryDesc::new(DType::I8, &[1, 2, 2, 1]));
    let status = displacer.displace(backend, 0, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Displaced);

    let generated = generated_input(backend, &graph, 1, DType::I8);
    assert_eq!(generated.desc().dtype, DType::I8);
    assert_eq!(buffer.to_bytes(), generated.to_bytes());
}

pub fn test_reshape_and_typecast_chain(backend: &mut EvalBackend) {
    let graph = DeserializedGraph::new(vec![
        quant(
            0,
            OpKind::Dequantize,
            lt(0, DType::U8, &[2, 6]),
            lt(1, DType::F32, &[2, 6]),
            0.25,
            0,
        ),
        unary(1, OpKind::TypeCast, lt(1, DType::F32, &[2, 6]), lt(2, DType::BF16, &[2, 6])),
        unary(2, OpKind::StaticReshape, lt(2, DType::BF16, &[2, 6]), lt(3, DType::BF16, &[3, 4]))
            .with_attr("shape", DeserializedAttr::S64Vec(vec![3, 4])),
        binary(
            3,
            OpKind::MatMul,
            lt(3, DType::BF16, &[3, 4]),
            lt(4, DType::BF16, &[4, 2]),
            lt(5, DType::F32, &[3, 2]),
        ),
    ])
    .unwrap();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2, 3], DisplacerConfig::default()).unwrap();
    let mut buffer = Memory::new(MemoryDesc::new(DType::U8, &[2, 6]));
    let status = displacer.displace(backend, 0, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Displaced);

    let generated = generated_input(backend, &graph, 3, DType::U8);
    let values: Vec<u8> = generated.data().try_to_vec().unwrap();
    let expected: Vec<u8> = values.iter().map(|v| v * 4).collect();
    assert_eq!(buffer.to_bytes(), expected);
}
