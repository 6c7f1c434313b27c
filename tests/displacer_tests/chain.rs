use crate::displacer_tests::{binary, dequantize_transpose_matmul, lt, quant, unary};
use partition_displacer::displacer::filling::{FillOutcome, quantize_filling};
use partition_displacer::dtype::DType;
use partition_displacer::graph::{ArgKind, DeserializedGraph, OpKind};
use partition_displacer::memory::{Memory, MemoryDesc};
use partition_displacer::{DisplaceStatus, DisplacerConfig, EvalBackend, PartitionDataDisplacer};

pub fn test_locates_dequantize_through_transpose(_backend: &mut EvalBackend) {
    let graph = dequantize_transpose_matmul();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2], DisplacerConfig::default()).unwrap();
    assert_eq!(displacer.entries().len(), 1);
    let entry = displacer.entry(0).unwrap();
    assert_eq!(graph.op(entry.main_op).id, 2);
    assert_eq!(entry.port, 0);
    assert_eq!(entry.tensor.id, 0);
    assert_eq!(entry.tensor.data_type, DType::U8);
    assert!(displacer.entry(3).is_none());
}

fn filled(
    backend: &mut EvalBackend,
    graph: &DeserializedGraph,
    op_id: usize,
    arg: ArgKind,
) -> Memory {
    let op = graph.op(graph.find_op(op_id).unwrap());
    match quantize_filling(backend, &DisplacerConfig::default(), op, arg, DType::I8).unwrap() {
        FillOutcome::Filled(mem) => mem,
        FillOutcome::Skipped(reason) => panic!("unexpected skip: {reason}"),
    }
}

pub fn test_first_chain_keeps_shared_boundary(backend: &mut EvalBackend) {
    // t0 reaches MatMul (op 1) on port 0 and Add (op 2) on port 1.
    let graph = DeserializedGraph::new(vec![
        quant(0, OpKind::Dequantize, lt(0, DType::I8, &[2, 2]), lt(1, DType::F32, &[2, 2]), 1.0, 0),
        binary(
            1,
            OpKind::MatMul,
            lt(1, DType::F32, &[2, 2]),
            lt(2, DType::F32, &[2, 2]),
            lt(3, DType::F32, &[2, 2]),
        ),
        binary(
            2,
            OpKind::Add,
            lt(3, DType::F32, &[2, 2]),
            lt(1, DType::F32, &[2, 2]),
            lt(4, DType::F32, &[2, 2]),
        ),
    ])
    .unwrap();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2], DisplacerConfig::default()).unwrap();
    let entry = displacer.entry(0).unwrap();
    assert_eq!(graph.op(entry.main_op).id, 1);
    assert_eq!(entry.port, 0);
    assert_eq!(displacer.entries().len(), 1);

    let mut buffer = Memory::new(MemoryDesc::new(DType::I8, &[2, 2]));
    let status = displacer.displace(backend, 0, &mut buffer).unwrap();
    assert_eq!(status, DisplaceStatus::Displaced);
    let matmul_src = filled(backend, &graph, 1, ArgKind::Src);
    let add_src1 = filled(backend, &graph, 2, ArgKind::Src1);
    assert_eq!(buffer.to_bytes(), matmul_src.to_bytes());
    assert_ne!(buffer.to_bytes(), add_src1.to_bytes());
}

pub fn test_dequantize_fed_from_inside_is_not_recorded(_backend: &mut EvalBackend) {
    let graph = DeserializedGraph::new(vec![
        quant(0, OpKind::Quantize, lt(0, DType::F32, &[2, 2]), lt(1, DType::U8, &[2, 2]), 0.5, 0),
        quant(1, OpKind::Dequantize, lt(1, DType::U8, &[2, 2]), lt(2, DType::F32, &[2, 2]), 0.5, 0),
        binary(
            2,
            OpKind::MatMul,
            lt(2, DType::F32, &[2, 2]),
            lt(3, DType::F32, &[2, 2]),
            lt(4, DType::F32, &[2, 2]),
        ),
    ])
    .unwrap();

    let whole =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2], DisplacerConfig::default()).unwrap();
    assert!(whole.entries().is_empty());

    let tail =
        PartitionDataDisplacer::new(&graph, &[1, 2], DisplacerConfig::default()).unwrap();
    assert_eq!(tail.entry(1).map(|e| e.tensor.data_type), Some(DType::U8));
}

pub fn test_non_pass_through_producer_stops_chain(_backend: &mut EvalBackend) {
    let graph = DeserializedGraph::new(vec![
        quant(0, OpKind::Dequantize, lt(0, DType::U8, &[2, 2]), lt(1, DType::F32, &[2, 2]), 0.5, 0),
        unary(1, OpKind::ReLU, lt(1, DType::F32, &[2, 2]), lt(2, DType::F32, &[2, 2])),
        binary(
            2,
            OpKind::MatMul,
            lt(2, DType::F32, &[2, 2]),
            lt(3, DType::F32, &[2, 2]),
            lt(4, DType::F32, &[2, 2]),
        ),
    ])
    .unwrap();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2], DisplacerConfig::default()).unwrap();
    assert!(displacer.entries().is_empty());
}

pub fn test_main_op_outside_partition_is_ignored(_backend: &mut EvalBackend) {
    let graph = dequantize_transpose_matmul();
    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1], DisplacerConfig::default()).unwrap();
    assert!(displacer.entries().is_empty());
}
