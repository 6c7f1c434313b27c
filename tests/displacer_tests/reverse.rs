use crate::displacer_tests::{binary, lt, quant, transpose, unary};
use partition_displacer::backends::ndarray_backend::NDArrayNumericTensor;
use partition_displacer::displacer::reverse::invert;
use partition_displacer::dtype::DType;
use partition_displacer::graph::{ArgKind, DeserializedAttr, DeserializedOp, OpKind};
use partition_displacer::memory::Memory;
use partition_displacer::ref_primitive::{RefPrimitive, RefPrimitiveError};
use partition_displacer::{DisplaceError, EvalBackend};

fn run(
    backend: &mut EvalBackend,
    op: &DeserializedOp,
    src: NDArrayNumericTensor,
) -> NDArrayNumericTensor {
    let mut prim = RefPrimitive::instantiate(op, backend).unwrap();
    prim.replace_arg(ArgKind::Src, Memory::from_tensor(src)).unwrap();
    prim.execute(backend).unwrap();
    prim.take_arg(ArgKind::Dst).unwrap().into_data()
}

pub fn test_quantize_round_trip_through_inverse(backend: &mut EvalBackend) {
    let quantize = quant(
        0,
        OpKind::Quantize,
        lt(0, DType::F32, &[2, 3]),
        lt(1, DType::U8, &[2, 3]),
        0.25,
        3,
    );
    let dequantize = invert(&quantize).unwrap();
    assert_eq!(dequantize.kind, OpKind::Dequantize);
    assert_eq!(dequantize.in_lts[0].id, 1);
    assert_eq!(dequantize.out_lts[0].id, 0);
    assert_eq!(dequantize.attr_f32_vec("scales"), Some(&[0.25f32][..]));
    assert_eq!(dequantize.attr_s64_vec("zps"), Some(&[3i64][..]));

    let q = NDArrayNumericTensor::from_vec_shape(vec![3u8, 4, 7, 10, 200, 255], &[2, 3]).unwrap();
    let x = run(backend, &dequantize, q.clone());
    let x_values: Vec<f32> = x.try_to_vec().unwrap();
    assert_eq!(x_values, vec![0.0, 0.25, 1.0, 1.75, 49.25, 63.0]);
    assert_eq!(run(backend, &quantize, x), q);

    let requantize = invert(&dequantize).unwrap();
    assert_eq!(requantize, quantize);
}

pub fn test_transpose_inverse_restores_data(backend: &mut EvalBackend) {
    let op = transpose(0, lt(0, DType::I32, &[2, 3, 4]), lt(1, DType::I32, &[4, 2, 3]), &[2, 0, 1]);
    let inverse = invert(&op).unwrap();
    assert_eq!(inverse.attr_s64_vec("order"), Some(&[1i64, 2, 0][..]));

    let data =
        NDArrayNumericTensor::from_vec_shape((0..24).collect::<Vec<i32>>(), &[2, 3, 4]).unwrap();
    let forward = run(backend, &op, data.clone());
    assert_eq!(forward.shape(), vec![4, 2, 3]);
    assert_eq!(run(backend, &inverse, forward), data);
}

pub fn test_reshape_inverse_restores_shape(backend: &mut EvalBackend) {
    let op = unary(0, OpKind::StaticReshape, lt(0, DType::F32, &[2, 6]), lt(1, DType::F32, &[3, 4]))
        .with_attr("shape", DeserializedAttr::S64Vec(vec![3, 4]));
    let inverse = invert(&op).unwrap();
    assert_eq!(inverse.attr_s64_vec("shape"), Some(&[2i64, 6][..]));

    let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let data = NDArrayNumericTensor::from_vec_shape(values, &[3, 4]).unwrap();
    let restored = run(backend, &inverse, data.clone());
    assert_eq!(restored.shape(), vec![2, 6]);
    assert_eq!(restored.to_bytes(), data.to_bytes());

    let cast = unary(1, OpKind::TypeCast, lt(0, DType::F32, &[2]), lt(1, DType::BF16, &[2]));
    let uncast = invert(&cast).unwrap();
    assert_eq!(uncast.kind, OpKind::TypeCast);
    assert_eq!(uncast.in_lts[0].data_type, DType::BF16);
    assert_eq!(uncast.out_lts[0].data_type, DType::F32);
}

pub fn test_transpose_without_order_is_invalid(_backend: &mut EvalBackend) {
    let op = unary(
        4,
        OpKind::StaticTranspose,
        lt(0, DType::F32, &[2, 3]),
        lt(1, DType::F32, &[3, 2]),
    );
    let err = invert(&op).unwrap_err();
    assert!(matches!(
        err,
        DisplaceError::RefPrimitive(RefPrimitiveError::InvalidArguments { op: 4, .. })
    ));
}

pub fn test_matmul_is_uninvertible(_backend: &mut EvalBackend) {
    let op = binary(
        5,
        OpKind::MatMul,
        lt(0, DType::F32, &[2, 2]),
        lt(1, DType::F32, &[2, 2]),
        lt(2, DType::F32, &[2, 2]),
    );
    let err = invert(&op).unwrap_err();
    assert!(matches!(
        err,
        DisplaceError::Uninvertible { op: 5, kind: OpKind::MatMul }
    ));
}
