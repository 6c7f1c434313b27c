use partition_displacer::dtype::DType;
use partition_displacer::graph::{DeserializedGraph, OpKind};
use partition_displacer::memory::{Memory, MemoryDesc};
use partition_displacer::{DisplaceStatus, DisplacerConfig, EvalBackend, PartitionDataDisplacer};
use std::io::Write;
use std::path::Path;

const OUT_OF_ORDER_GRAPH: &str = r#"{
  "version": "3.5.0",
  "engine_kind": "cpu",
  "fpmath_mode": "strict",
  "graph": [
    {
      "id": 9, "name": "tanh", "kind": "Tanh", "attrs": {},
      "inputs": [{"id": 1, "dtype": "f32", "shape": [4]}],
      "outputs": [{"id": 2, "dtype": "f32", "shape": [4]}]
    },
    {
      "id": 4, "name": "dq", "kind": "Dequantize",
      "attrs": {
        "scales": {"type": "f32[]", "value": [0.1]},
        "zps": {"type": "s64[]", "value": [0]},
        "qtype": {"type": "string", "value": "per_tensor"}
      },
      "inputs": [{"id": 0, "dtype": "s8", "shape": [4]}],
      "outputs": [{"id": 1, "dtype": "f32", "shape": [4]}]
    },
    {
      "id": 5, "name": "custom", "kind": "SomeVendorOp", "attrs": {},
      "inputs": [{"id": 2, "dtype": "f32", "shape": [4]}],
      "outputs": [{"id": 3, "dtype": "f32", "shape": [4]}]
    }
  ]
}"#;

pub fn test_load_graph_from_file(_backend: &mut EvalBackend) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(OUT_OF_ORDER_GRAPH.as_bytes()).unwrap();
    let graph = DeserializedGraph::load(file.path()).unwrap();

    let ids: Vec<usize> = graph.ops().iter().map(|op| op.id).collect();
    assert_eq!(ids, vec![4, 9, 5]);
    assert_eq!(graph.version.as_deref(), Some("3.5.0"));
    assert_eq!(graph.input_ports(), &[0]);
    assert_eq!(graph.output_ports(), &[3]);
    assert_eq!(graph.producer_of(2), graph.find_op(9));
    assert_eq!(
        graph.op(graph.find_op(5).unwrap()).kind,
        OpKind::Unknown("SomeVendorOp".to_string())
    );
    assert_eq!(graph.logical_tensor(0).map(|lt| lt.data_type), Some(DType::I8));
}

pub fn test_demo_graph_displaces_every_entry(backend: &mut EvalBackend) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/graphs/int8_matmul.json");
    let graph = DeserializedGraph::load(&path).unwrap();
    assert_eq!(graph.input_ports(), &[0, 2]);

    let displacer =
        PartitionDataDisplacer::new(&graph, &[0, 1, 2, 3], DisplacerConfig::default()).unwrap();
    let mut tensors: Vec<usize> = displacer.entries().keys().copied().collect();
    tensors.sort_unstable();
    assert_eq!(tensors, vec![0, 2]);
    assert_eq!(displacer.entry(2).map(|e| e.port), Some(1));

    for tensor_id in tensors {
        let lt = graph.logical_tensor(tensor_id).unwrap();
        let mut buffer = Memory::new(MemoryDesc::from_logical_tensor(lt).unwrap());
        let status = displacer.displace(backend, tensor_id, &mut buffer).unwrap();
        assert_eq!(status, DisplaceStatus::Displaced);
        assert_eq!(buffer.desc().dtype, lt.data_type);
    }
}
