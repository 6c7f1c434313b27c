use super::DisplaceError;
use crate::backends::eval_backend::EvalBackend;
use crate::graph::{ArgKind, DeserializedAttr, DeserializedGraph, DeserializedOp, OpKind};
use crate::memory::Memory;
use crate::ref_primitive::{RefPrimitive, RefPrimitiveError};
use std::collections::HashSet;

/// Op kinds that have an exact inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvertibleKind {
    Quantize,
    Dequantize,
    StaticTranspose,
    TypeCast,
    StaticReshape,
}

impl TryFrom<&OpKind> for InvertibleKind {
    type Error = OpKind;

    fn try_from(kind: &OpKind) -> Result<Self, Self::Error> {
        Ok(match kind {
            OpKind::Quantize => InvertibleKind::Quantize,
            OpKind::Dequantize => InvertibleKind::Dequantize,
            OpKind::StaticTranspose => InvertibleKind::StaticTranspose,
            OpKind::TypeCast => InvertibleKind::TypeCast,
            OpKind::StaticReshape => InvertibleKind::StaticReshape,
            other => return Err(other.clone()),
        })
    }
}

/// `inverse[order[i]] == i`, with negative entries counted from the back.
pub fn inverse_permutation(order: &[i64]) -> Result<Vec<i64>, DisplaceError> {
    let n = order.len() as i64;
    let mut inverse = vec![-1i64; order.len()];
    for (i, &axis) in order.iter().enumerate() {
        if axis < -n || axis >= n {
            return Err(DisplaceError::InvalidPermutation(order.to_vec()));
        }
        let slot = &mut inverse[(axis + n).rem_euclid(n) as usize];
        if *slot >= 0 {
            return Err(DisplaceError::InvalidPermutation(order.to_vec()));
        }
        *slot = i as i64;
    }
    Ok(inverse)
}

/// Build the op that undoes `op`: inputs and outputs swap, then each kind
/// gets its own fix-up.
pub fn invert(op: &DeserializedOp) -> Result<DeserializedOp, DisplaceError> {
    let kind = InvertibleKind::try_from(&op.kind).map_err(|kind| DisplaceError::Uninvertible {
        op: op.id,
        kind,
    })?;
    let mut inverse = op.clone();
    std::mem::swap(&mut inverse.in_lts, &mut inverse.out_lts);
    match kind {
        InvertibleKind::Quantize => inverse.kind = OpKind::Dequantize,
        InvertibleKind::Dequantize => inverse.kind = OpKind::Quantize,
        InvertibleKind::StaticTranspose => {
            let order = op.attr_s64_vec("order").ok_or_else(|| {
                RefPrimitiveError::InvalidArguments {
                    op: op.id,
                    reason: "StaticTranspose has no order".to_string(),
                }
            })?;
            inverse.set_attr(
                "order",
                DeserializedAttr::S64Vec(inverse_permutation(order)?),
            );
        }
        InvertibleKind::StaticReshape => {
            if let (Some(_), Some(dst)) = (op.attr_s64_vec("shape"), inverse.out_lts.first()) {
                let shape = dst.shape.clone();
                inverse.set_attr("shape", DeserializedAttr::S64Vec(shape));
            }
        }
        InvertibleKind::TypeCast => {}
    }
    Ok(inverse)
}

/// Where a reverse walk ended.
#[derive(Debug)]
pub struct Propagated {
    pub tensor_id: usize,
    pub memory: Memory,
}

/// Push `data`, which holds the value of tensor `start`, backwards through
/// every in-partition producer until the walk leaves the partition.
pub fn propagate(
    graph: &DeserializedGraph,
    partition: &HashSet<usize>,
    backend: &mut EvalBackend,
    start: usize,
    data: Memory,
) -> Result<Propagated, DisplaceError> {
    let mut tensor_id = start;
    let mut current = data;
    while let Some(producer) = graph.producer_of(tensor_id) {
        let op = graph.op(producer);
        if !partition.contains(&op.id) {
            break;
        }
        let inverse = invert(op)?;
        let mut prim = RefPrimitive::instantiate(&inverse, backend)?;
        let src_desc = prim
            .arg(ArgKind::Src)
            .ok_or(RefPrimitiveError::MissingArg(inverse.id, ArgKind::Src))?
            .desc()
            .clone();
        let mut src = Memory::new(src_desc);
        src.reorder_from(&current)?;
        prim.replace_arg(ArgKind::Src, src)?;
        prim.execute(backend)?;
        current = prim
            .take_arg(ArgKind::Dst)
            .ok_or(RefPrimitiveError::MissingArg(inverse.id, ArgKind::Dst))?;
        let next = inverse.out_lts.first().map(|lt| lt.id).unwrap_or(tensor_id);
        log::debug!(
            "Reversed {} op {}: tensor {tensor_id} -> {next}",
            op.kind,
            op.id
        );
        tensor_id = next;
    }
    Ok(Propagated {
        tensor_id,
        memory: current,
    })
}
