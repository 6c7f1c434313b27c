use super::DisplacementEntry;
use crate::graph::{DeserializedGraph, LogicalTensor, OpKind};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Build the displacement table for the partition made of `partition` op ids.
///
/// Ops are visited in graph order and ports in port order; when two chains end
/// on the same boundary tensor the first one found keeps it.
pub(crate) fn locate(
    graph: &DeserializedGraph,
    partition: &HashSet<usize>,
) -> HashMap<usize, DisplacementEntry> {
    let mut entries = HashMap::new();
    for (index, op) in graph.iter_ops() {
        if !partition.contains(&op.id) || !op.kind.is_main() {
            continue;
        }
        for (port, lt) in op.in_lts.iter().enumerate() {
            let Some(boundary) = find_boundary(graph, partition, lt.id) else {
                continue;
            };
            match entries.entry(boundary.id) {
                Entry::Vacant(slot) => {
                    log::debug!(
                        "Tensor {} feeds port {port} of {} op {}",
                        boundary.id,
                        op.kind,
                        op.id
                    );
                    slot.insert(DisplacementEntry {
                        main_op: index,
                        port,
                        tensor: boundary.clone(),
                    });
                }
                Entry::Occupied(existing) => {
                    log::debug!(
                        "Tensor {} already claimed by op {}, ignoring port {port} of op {}",
                        boundary.id,
                        graph.op(existing.get().main_op).id,
                        op.id
                    );
                }
            }
        }
    }
    entries
}

/// Walk up from `tensor_id` through pass-through producers looking for a
/// Dequantize whose input comes from outside the partition.
fn find_boundary<'g>(
    graph: &'g DeserializedGraph,
    partition: &HashSet<usize>,
    tensor_id: usize,
) -> Option<&'g LogicalTensor> {
    let mut current = tensor_id;
    while let Some(producer) = graph.producer_of(current) {
        let op = graph.op(producer);
        let input = op.in_lts.first()?;
        if op.kind == OpKind::Dequantize {
            let inside = graph
                .producer_of(input.id)
                .is_some_and(|p| partition.contains(&graph.op(p).id));
            return (!inside).then_some(input);
        }
        if !op.kind.is_pass_through() {
            return None;
        }
        current = input.id;
    }
    None
}
