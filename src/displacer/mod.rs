//! Synthetic input generation for partitions with quantized inputs.
//!
//! A partition input that reaches a main op (conv, matmul, pooling, binary)
//! only through a Dequantize and some layout/type changes has to carry data
//! the main op can consume without precision surprises. The displacer
//! generates such data for the main op on the reference engine and then
//! undoes every op between the main op and the partition boundary, so the
//! result can be written into the boundary tensor's buffer.

mod chain;
pub mod filling;
pub mod reverse;

use crate::backends::eval_backend::EvalBackend;
use crate::config::DisplacerConfig;
use crate::graph::{DeserializedGraph, LogicalTensor, OpIndex, OpKind};
use crate::memory::{Memory, MemoryError};
use crate::ref_primitive::RefPrimitiveError;
use filling::FillOutcome;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum DisplaceError {
    #[error("Displacer is not bound to a graph")]
    Unbound,
    #[error("Partition op {0} is not in the graph")]
    UnknownPartitionOp(usize),
    #[error("Input port {port} of {kind} op {op} has no primitive argument")]
    UnmappedPort { op: usize, kind: OpKind, port: usize },
    #[error("No inverse for {kind} op {op}")]
    Uninvertible { op: usize, kind: OpKind },
    #[error("Invalid transpose order {0:?}")]
    InvalidPermutation(Vec<i64>),
    #[error(transparent)]
    RefPrimitive(#[from] RefPrimitiveError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisplaceStatus {
    /// The tensor needs no displacement; the buffer was not touched.
    Untouched,
    Displaced,
    /// The reference engine cannot generate data for this case.
    Skipped(String),
}

/// Where the data for one boundary tensor comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplacementEntry {
    pub main_op: OpIndex,
    pub port: usize,
    pub tensor: LogicalTensor,
}

#[derive(Debug, Default)]
pub struct PartitionDataDisplacer<'g> {
    graph: Option<&'g DeserializedGraph>,
    partition: HashSet<usize>,
    entries: HashMap<usize, DisplacementEntry>,
    config: DisplacerConfig,
}

impl<'g> PartitionDataDisplacer<'g> {
    pub fn new(
        graph: &'g DeserializedGraph,
        partition_op_ids: &[usize],
        config: DisplacerConfig,
    ) -> Result<Self, DisplaceError> {
        let partition: HashSet<usize> = partition_op_ids.iter().copied().collect();
        if let Some(missing) = partition_op_ids
            .iter()
            .find(|id| graph.find_op(**id).is_none())
        {
            return Err(DisplaceError::UnknownPartitionOp(*missing));
        }
        let entries = chain::locate(graph, &partition);
        log::debug!(
            "Partition of {} ops has {} displaceable inputs",
            partition.len(),
            entries.len()
        );
        Ok(Self {
            graph: Some(graph),
            partition,
            entries,
            config,
        })
    }

    pub fn entry(&self, tensor_id: usize) -> Option<&DisplacementEntry> {
        self.entries.get(&tensor_id)
    }

    pub fn entries(&self) -> &HashMap<usize, DisplacementEntry> {
        &self.entries
    }

    pub fn config(&self) -> &DisplacerConfig {
        &self.config
    }

    /// Overwrite `buffer` with generated data if `tensor_id` is a displaced
    /// partition input.
    pub fn displace(
        &self,
        backend: &mut EvalBackend,
        tensor_id: usize,
        buffer: &mut Memory,
    ) -> Result<DisplaceStatus, DisplaceError> {
        let graph = self.graph.ok_or(DisplaceError::Unbound)?;
        let Some(entry) = self.entries.get(&tensor_id) else {
            return Ok(DisplaceStatus::Untouched);
        };
        let main_op = graph.op(entry.main_op);
        let arg = main_op
            .kind
            .arg_for_input(entry.port)
            .ok_or_else(|| DisplaceError::UnmappedPort {
                op: main_op.id,
                kind: main_op.kind.clone(),
                port: entry.port,
            })?;

        let generated = match filling::quantize_filling(
            backend,
            &self.config,
            main_op,
            arg,
            entry.tensor.data_type,
        )? {
            FillOutcome::Filled(mem) => mem,
            FillOutcome::Skipped(reason) => return Ok(DisplaceStatus::Skipped(reason)),
        };

        let start = main_op.in_lts[entry.port].id;
        let propagated = reverse::propagate(graph, &self.partition, backend, start, generated)?;
        if propagated.tensor_id != tensor_id {
            log::warn!(
                "Reverse walk from tensor {start} ended at tensor {} instead of {tensor_id}",
                propagated.tensor_id
            );
        }

        let result = propagated.memory.redescribe(&buffer.desc().dims)?;
        buffer.reorder_from(&result)?;
        log::info!(
            "Displaced tensor {tensor_id} with data generated for {arg} of {} op {}",
            main_op.kind,
            main_op.id
        );
        Ok(DisplaceStatus::Displaced)
    }
}
