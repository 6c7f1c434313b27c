use super::DisplaceError;
use crate::backends::eval_backend::EvalBackend;
use crate::config::DisplacerConfig;
use crate::dtype::DType;
use crate::graph::{ArgKind, DeserializedOp, DriverFamily};
use crate::memory::Memory;
use crate::ref_primitive::{RefPrimitive, RefPrimitiveError};

#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Filled(Memory),
    Skipped(String),
}

/// Clone of `main_op` retyped so that its inputs take `dtype` and its output
/// is something the reference engine accepts for that input type.
pub fn retype_for_filling(main_op: &DeserializedOp, dtype: DType) -> DeserializedOp {
    let mut op = main_op.clone();
    if let Some(src) = op.in_lts.get_mut(0) {
        src.data_type = dtype;
    }
    if let Some(wei) = op.in_lts.get_mut(1) {
        // no u8 x u8 for weight-bearing ops
        wei.data_type = if op.kind.has_weights() && dtype == DType::U8 {
            DType::I8
        } else {
            dtype
        };
    }
    let driver = op.kind.driver();
    if let Some(dst) = op.out_lts.get_mut(0) {
        if matches!(driver, DriverFamily::Pool | DriverFamily::Binary) {
            dst.data_type = dtype;
        } else if dst.data_type != DType::BF16 {
            dst.data_type = DType::F32;
        }
    }
    op
}

fn prepare(
    prim: &mut RefPrimitive,
    backend: &mut EvalBackend,
    config: &DisplacerConfig,
) -> Result<(), RefPrimitiveError> {
    prim.init_prim(backend)?;
    prim.init_memory_args()?;
    prim.init_ref_memory_args(backend, config)
}

/// Generate the reference-engine input bound to `arg` of `main_op` when its
/// inputs carry `dtype`.
pub fn quantize_filling(
    backend: &mut EvalBackend,
    config: &DisplacerConfig,
    main_op: &DeserializedOp,
    arg: ArgKind,
    dtype: DType,
) -> Result<FillOutcome, DisplaceError> {
    let op = retype_for_filling(main_op, dtype);
    let mut prim = RefPrimitive::new(&op);
    prim.init_prb()?;
    match prepare(&mut prim, backend, config) {
        Ok(()) => {}
        Err(err) if err.is_skip() => {
            log::warn!("Skipping filling for {} op {}: {err}", op.kind, op.id);
            return Ok(FillOutcome::Skipped(err.to_string()));
        }
        Err(err) => return Err(err.into()),
    }
    let mem = prim
        .take_arg(arg)
        .ok_or(RefPrimitiveError::MissingArg(op.id, arg))?;
    Ok(FillOutcome::Filled(mem))
}
