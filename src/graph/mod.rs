pub mod op;
pub mod op_kind;

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::io::Read;
use std::path::Path;

pub use op::{DeserializedAttr, DeserializedOp, LogicalTensor};
pub use op_kind::{ArgKind, DriverFamily, OpKind};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Tensor {tensor} is produced by both op {first} and op {second}")]
    MultipleProducers {
        tensor: usize,
        first: usize,
        second: usize,
    },
    #[error("Op id {0} appears more than once")]
    DuplicateOpId(usize),
    #[error("Graph has a cycle through op {0}")]
    Cycle(usize),
}

/// Position of an op in [`DeserializedGraph::ops`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpIndex(usize);

impl OpIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    engine_kind: Option<String>,
    #[serde(default)]
    fpmath_mode: Option<String>,
    #[serde(default)]
    input_ports: Option<Vec<usize>>,
    #[serde(default)]
    output_ports: Option<Vec<usize>>,
    graph: Vec<DeserializedOp>,
}

/// A loaded graph: ops in chronological order plus producer lookup.
///
/// The op arena is fixed at construction, so [`OpIndex`] values stay valid for
/// the lifetime of the graph.
#[derive(Debug, Clone)]
pub struct DeserializedGraph {
    ops: Box<[DeserializedOp]>,
    producers: HashMap<usize, OpIndex>,
    index_by_op_id: HashMap<usize, OpIndex>,
    input_ports: Vec<usize>,
    output_ports: Vec<usize>,
    pub version: Option<String>,
    pub engine_kind: Option<String>,
    pub fpmath_mode: Option<String>,
}

impl DeserializedGraph {
    /// Build from ops in any order; they are sorted so every producer comes
    /// before its consumers, ties kept in the given order.
    pub fn new(ops: Vec<DeserializedOp>) -> Result<Self, GraphError> {
        let ops = Self::sort_chronologically(ops)?;

        let mut producers = HashMap::new();
        let mut index_by_op_id = HashMap::new();
        for (i, op) in ops.iter().enumerate() {
            index_by_op_id.insert(op.id, OpIndex(i));
            for lt in &op.out_lts {
                producers.insert(lt.id, OpIndex(i));
            }
        }

        let produced: HashSet<usize> = producers.keys().copied().collect();
        let mut consumed = HashSet::new();
        let mut input_ports = vec![];
        for op in ops.iter() {
            for lt in &op.in_lts {
                if !produced.contains(&lt.id) && consumed.insert(lt.id) {
                    input_ports.push(lt.id);
                }
            }
        }
        let all_inputs: HashSet<usize> = ops
            .iter()
            .flat_map(|op| op.in_lts.iter().map(|lt| lt.id))
            .collect();
        let output_ports = ops
            .iter()
            .flat_map(|op| op.out_lts.iter().map(|lt| lt.id))
            .filter(|id| !all_inputs.contains(id))
            .collect();

        Ok(Self {
            ops: ops.into_boxed_slice(),
            producers,
            index_by_op_id,
            input_ports,
            output_ports,
            version: None,
            engine_kind: None,
            fpmath_mode: None,
        })
    }

    fn sort_chronologically(ops: Vec<DeserializedOp>) -> Result<Vec<DeserializedOp>, GraphError> {
        let mut producer_pos: HashMap<usize, usize> = HashMap::new();
        let mut seen_ids = HashSet::new();
        for (i, op) in ops.iter().enumerate() {
            if !seen_ids.insert(op.id) {
                return Err(GraphError::DuplicateOpId(op.id));
            }
            for lt in &op.out_lts {
                if let Some(prev) = producer_pos.insert(lt.id, i) {
                    return Err(GraphError::MultipleProducers {
                        tensor: lt.id,
                        first: ops[prev].id,
                        second: op.id,
                    });
                }
            }
        }

        // Kahn's algorithm, always releasing the lowest original position first.
        let mut pending = vec![0usize; ops.len()];
        let mut consumers: Vec<Vec<usize>> = vec![vec![]; ops.len()];
        for (i, op) in ops.iter().enumerate() {
            let mut deps = HashSet::new();
            for lt in &op.in_lts {
                if let Some(&p) = producer_pos.get(&lt.id) {
                    if deps.insert(p) {
                        consumers[p].push(i);
                    }
                }
            }
            pending[i] = deps.len();
        }
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(ops.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &c in &consumers[i] {
                pending[c] -= 1;
                if pending[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }
        if order.len() != ops.len() {
            let stuck = pending
                .iter()
                .position(|n| *n > 0)
                .map(|i| ops[i].id)
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        let mut slots: Vec<Option<DeserializedOp>> = ops.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    pub fn from_json_str(json: &str) -> Result<Self, GraphError> {
        Self::from_file(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GraphError> {
        Self::from_file(serde_json::from_reader(reader)?)
    }

    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    fn from_file(file: GraphFile) -> Result<Self, GraphError> {
        let mut graph = Self::new(file.graph)?;
        graph.version = file.version;
        graph.engine_kind = file.engine_kind;
        graph.fpmath_mode = file.fpmath_mode;
        if let Some(ports) = file.input_ports {
            graph.input_ports = ports;
        }
        if let Some(ports) = file.output_ports {
            graph.output_ports = ports;
        }
        log::debug!(
            "Loaded graph with {} ops, inputs {:?}, outputs {:?}",
            graph.ops.len(),
            graph.input_ports,
            graph.output_ports
        );
        Ok(graph)
    }

    pub fn ops(&self) -> &[DeserializedOp] {
        &self.ops
    }

    pub fn op(&self, index: OpIndex) -> &DeserializedOp {
        &self.ops[index.0]
    }

    pub fn iter_ops(&self) -> impl Iterator<Item = (OpIndex, &DeserializedOp)> {
        self.ops.iter().enumerate().map(|(i, op)| (OpIndex(i), op))
    }

    pub fn find_op(&self, op_id: usize) -> Option<OpIndex> {
        self.index_by_op_id.get(&op_id).copied()
    }

    pub fn producer_of(&self, tensor_id: usize) -> Option<OpIndex> {
        self.producers.get(&tensor_id).copied()
    }

    /// The description of a tensor, taken from its producer if it has one.
    pub fn logical_tensor(&self, tensor_id: usize) -> Option<&LogicalTensor> {
        if let Some(producer) = self.producer_of(tensor_id) {
            return self
                .op(producer)
                .out_lts
                .iter()
                .find(|lt| lt.id == tensor_id);
        }
        self.ops
            .iter()
            .flat_map(|op| op.in_lts.iter())
            .find(|lt| lt.id == tensor_id)
    }

    pub fn input_ports(&self) -> &[usize] {
        &self.input_ports
    }

    pub fn output_ports(&self) -> &[usize] {
        &self.output_ports
    }
}
