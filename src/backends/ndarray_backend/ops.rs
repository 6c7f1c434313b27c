use ndarray::linalg::general_mat_mul;
use ndarray::{
    ArcArray, Array, ArrayD, ArrayView2, ArrayViewD, ArrayViewMut2, Axis, Dimension, Ix4, IxDyn,
    ShapeError, Zip, s,
};

#[derive(Debug, thiserror::Error)]
pub enum NDArrayOperationError {
    #[error(transparent)]
    ShapeError(#[from] ShapeError),
    #[error("out of bounds")]
    OutOfBounds,
    #[error("incompatible shape")]
    IncompatibleShape,
    #[error("shape mismatch: {0}")]
    IncompatibleShapes(String),
    #[error("broadcast error: {0}")]
    BroadcastError(String),
    #[error("Internal error")]
    Internal,
}

pub(crate) fn reshape<T>(
    input: ArcArray<T, IxDyn>,
    shape: &[usize],
) -> Result<ArcArray<T, IxDyn>, ShapeError>
where
    T: Clone,
{
    Ok(input.to_shape(IxDyn(shape))?.to_shared())
}

/// Permute axes so that output axis `i` is input axis `perm[i]`.
/// Negative entries count from the back, as in the graph `order` attribute.
pub(crate) fn transpose<T>(
    tensor: ArcArray<T, IxDyn>,
    perm: &[i64],
) -> Result<ArcArray<T, IxDyn>, NDArrayOperationError>
where
    T: Clone,
{
    let rank = tensor.ndim();
    if perm.len() != rank {
        return Err(NDArrayOperationError::IncompatibleShapes(format!(
            "order of length {} for rank {rank}",
            perm.len()
        )));
    }
    let axes: Vec<usize> = perm
        .iter()
        .map(|&x| {
            let idx = if x < 0 { x + rank as i64 } else { x };
            if idx < 0 || idx >= rank as i64 {
                return Err(NDArrayOperationError::OutOfBounds);
            }
            Ok(idx as usize)
        })
        .collect::<Result<_, _>>()?;

    // Must be a true permutation of [0..rank)
    let mut sorted = axes.clone();
    sorted.sort_unstable();
    if sorted != (0..rank).collect::<Vec<_>>() {
        return Err(NDArrayOperationError::IncompatibleShape);
    }

    Ok(tensor
        .permuted_axes(IxDyn(&axes))
        .as_standard_layout()
        .to_shared())
}

/// Numpy-style batched matmul on f32 data. Batch axes broadcast; both operands
/// must be at least rank 2.
pub(crate) fn matmul(
    a: ArrayViewD<'_, f32>,
    b: ArrayViewD<'_, f32>,
) -> Result<ArrayD<f32>, NDArrayOperationError> {
    let mut a_view = a;
    let mut b_view = b;
    if a_view.ndim() < 2 || b_view.ndim() < 2 {
        return Err(NDArrayOperationError::IncompatibleShapes(format!(
            "matmul needs rank >= 2, got {:?} and {:?}",
            a_view.shape(),
            b_view.shape()
        )));
    }

    // Pre-pend 1-sized axes so both tensors have the same rank.
    let rank = a_view.ndim().max(b_view.ndim());
    while a_view.ndim() < rank {
        a_view = a_view.insert_axis(Axis(0));
    }
    while b_view.ndim() < rank {
        b_view = b_view.insert_axis(Axis(0));
    }

    let a_shape = a_view.shape().to_vec();
    let b_shape = b_view.shape().to_vec();

    let mut batch_shape = Vec::with_capacity(rank - 2);
    for d in 0..rank - 2 {
        let (ad, bd) = (a_shape[d], b_shape[d]);
        if ad != bd && ad != 1 && bd != 1 {
            return Err(NDArrayOperationError::BroadcastError(format!(
                "{a_shape:?} x {b_shape:?}"
            )));
        }
        batch_shape.push(ad.max(bd));
    }

    let (m, k_left) = (a_shape[rank - 2], a_shape[rank - 1]);
    let (k_right, p) = (b_shape[rank - 2], b_shape[rank - 1]);
    if k_left != k_right {
        return Err(NDArrayOperationError::IncompatibleShapes(format!(
            "{a_shape:?} x {b_shape:?}"
        )));
    }
    let batch: usize = batch_shape.iter().product();

    let mut a_bcast_shape = batch_shape.clone();
    a_bcast_shape.extend([m, k_left]);
    let mut b_bcast_shape = batch_shape.clone();
    b_bcast_shape.extend([k_left, p]);

    let a_b = a_view
        .broadcast(IxDyn(&a_bcast_shape))
        .ok_or(NDArrayOperationError::IncompatibleShape)?;
    let a_b = a_b
        .to_shape((batch, m, k_left))
        .map_err(|_| NDArrayOperationError::Internal)?;
    let b_b = b_view
        .broadcast(IxDyn(&b_bcast_shape))
        .ok_or(NDArrayOperationError::IncompatibleShape)?;
    let b_b = b_b
        .to_shape((batch, k_left, p))
        .map_err(|_| NDArrayOperationError::Internal)?;

    let mut out = Array::<f32, _>::zeros((batch, m, p));
    for i in 0..batch {
        let (a_mat, b_mat): (ArrayView2<'_, f32>, ArrayView2<'_, f32>) =
            (a_b.slice(s![i, .., ..]), b_b.slice(s![i, .., ..]));
        let mut c: ArrayViewMut2<'_, f32> = out.slice_mut(s![i, .., ..]);
        general_mat_mul(1.0, &a_mat, &b_mat, 0.0, &mut c);
    }

    let mut final_shape = batch_shape;
    final_shape.extend([m, p]);
    Ok(out.into_shape_with_order(IxDyn(&final_shape))?)
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, NDArrayOperationError> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let ad = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let bd = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        out[i] = match (ad, bd) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(NDArrayOperationError::BroadcastError(format!("{a:?} vs {b:?}")));
            }
        };
    }
    Ok(out)
}

/// Elementwise binary op with numpy broadcasting.
pub(crate) fn binary(
    a: ArrayViewD<'_, f32>,
    b: ArrayViewD<'_, f32>,
    f: impl Fn(f32, f32) -> f32,
) -> Result<ArrayD<f32>, NDArrayOperationError> {
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let a_b = a
        .broadcast(IxDyn(&shape))
        .ok_or(NDArrayOperationError::IncompatibleShape)?;
    let b_b = b
        .broadcast(IxDyn(&shape))
        .ok_or(NDArrayOperationError::IncompatibleShape)?;
    Ok(Zip::from(&a_b).and(&b_b).map_collect(|x, y| f(*x, *y)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolKind {
    Max,
    Avg { exclude_pad: bool },
}

/// Spatial parameters shared by the 2D window kernels (pooling and conv).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Window2d {
    pub kernel: [usize; 2],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub pads_begin: [usize; 2],
    pub out_spatial: [usize; 2],
}

impl Window2d {
    // Input coordinate touched by output `o` at kernel offset `k`, if in bounds.
    fn input_index(&self, dim: usize, o: usize, k: usize, extent: usize) -> Option<usize> {
        let pos = (o * self.strides[dim] + k * self.dilations[dim]) as i64
            - self.pads_begin[dim] as i64;
        if pos < 0 || pos >= extent as i64 {
            None
        } else {
            Some(pos as usize)
        }
    }
}

/// 2D pooling over an NCHW tensor.
pub(crate) fn pool2d(
    src: ArrayViewD<'_, f32>,
    kind: PoolKind,
    window: &Window2d,
) -> Result<ArrayD<f32>, NDArrayOperationError> {
    let src = src.into_dimensionality::<Ix4>()?;
    let (n, c, ih, iw) = src.dim();
    let [oh, ow] = window.out_spatial;
    let mut out = Array::<f32, _>::zeros((n, c, oh, ow));
    for ((b, ch, y, x), value) in out.indexed_iter_mut() {
        let mut acc = match kind {
            PoolKind::Max => f32::NEG_INFINITY,
            PoolKind::Avg { .. } => 0.0,
        };
        let mut count = 0usize;
        for ky in 0..window.kernel[0] {
            let Some(sy) = window.input_index(0, y, ky, ih) else {
                continue;
            };
            for kx in 0..window.kernel[1] {
                let Some(sx) = window.input_index(1, x, kx, iw) else {
                    continue;
                };
                let v = src[[b, ch, sy, sx]];
                acc = match kind {
                    PoolKind::Max => acc.max(v),
                    PoolKind::Avg { .. } => acc + v,
                };
                count += 1;
            }
        }
        *value = match kind {
            PoolKind::Max => acc,
            PoolKind::Avg { exclude_pad: true } => acc / count.max(1) as f32,
            PoolKind::Avg { exclude_pad: false } => {
                acc / (window.kernel[0] * window.kernel[1]) as f32
            }
        };
    }
    Ok(out.into_dyn())
}

/// Direct 2D convolution. `src` is NCHW, `weights` is OIHW with
/// `I = C / groups`.
pub(crate) fn conv2d(
    src: ArrayViewD<'_, f32>,
    weights: ArrayViewD<'_, f32>,
    groups: usize,
    window: &Window2d,
) -> Result<ArrayD<f32>, NDArrayOperationError> {
    let src = src.into_dimensionality::<Ix4>()?;
    let weights = weights.into_dimensionality::<Ix4>()?;
    let (n, c, ih, iw) = src.dim();
    let (oc, icg, kh, kw) = weights.dim();
    if groups == 0 || c % groups != 0 || oc % groups != 0 || c / groups != icg {
        return Err(NDArrayOperationError::IncompatibleShapes(format!(
            "src {:?}, weights {:?}, groups {groups}",
            src.shape(),
            weights.shape()
        )));
    }
    if [kh, kw] != window.kernel {
        return Err(NDArrayOperationError::IncompatibleShape);
    }
    let ocg = oc / groups;
    let [oh, ow] = window.out_spatial;
    let mut out = Array::<f32, _>::zeros((n, oc, oh, ow));
    for ((b, o, y, x), value) in out.indexed_iter_mut() {
        let g = o / ocg;
        let mut acc = 0.0f32;
        for i in 0..icg {
            let ch = g * icg + i;
            for ky in 0..kh {
                let Some(sy) = window.input_index(0, y, ky, ih) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(sx) = window.input_index(1, x, kx, iw) else {
                        continue;
                    };
                    acc += src[[b, ch, sy, sx]] * weights[[o, i, ky, kx]];
                }
            }
        }
        *value = acc;
    }
    Ok(out.into_dyn())
}

/// Affine quantization parameters. A single scale means per-tensor;
/// otherwise one scale (and zero point) per index along `axis`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QuantParams<'a> {
    pub scales: &'a [f32],
    pub zps: &'a [i64],
    pub axis: usize,
}

impl QuantParams<'_> {
    fn at(&self, index: &[usize]) -> Result<(f64, f64), NDArrayOperationError> {
        let channel = if self.scales.len() == 1 {
            0
        } else {
            *index.get(self.axis).ok_or(NDArrayOperationError::OutOfBounds)?
        };
        let scale = *self
            .scales
            .get(channel)
            .ok_or(NDArrayOperationError::OutOfBounds)?;
        let zp = match self.zps.len() {
            0 => 0,
            1 => self.zps[0],
            _ => *self.zps.get(channel).ok_or(NDArrayOperationError::OutOfBounds)?,
        };
        Ok((scale as f64, zp as f64))
    }

    fn check(&self, shape: &[usize]) -> Result<(), NDArrayOperationError> {
        if self.scales.is_empty() {
            return Err(NDArrayOperationError::IncompatibleShapes(
                "no scales".to_string(),
            ));
        }
        if self.scales.len() > 1 && shape.get(self.axis) != Some(&self.scales.len()) {
            return Err(NDArrayOperationError::IncompatibleShapes(format!(
                "{} scales along axis {} of {shape:?}",
                self.scales.len(),
                self.axis
            )));
        }
        Ok(())
    }
}

/// `q = round_half_even(x / scale) + zp`, before saturation to the target type.
pub(crate) fn quantize(
    x: ArrayViewD<'_, f64>,
    params: &QuantParams<'_>,
) -> Result<ArrayD<f64>, NDArrayOperationError> {
    params.check(x.shape())?;
    let mut out = ArrayD::<f64>::zeros(x.raw_dim());
    for (index, value) in x.indexed_iter() {
        let (scale, zp) = params.at(index.slice())?;
        out[index.slice()] = (value / scale).round_ties_even() + zp;
    }
    Ok(out)
}

/// `x = (q - zp) * scale`.
pub(crate) fn dequantize(
    q: ArrayViewD<'_, f64>,
    params: &QuantParams<'_>,
) -> Result<ArrayD<f64>, NDArrayOperationError> {
    params.check(q.shape())?;
    let mut out = ArrayD::<f64>::zeros(q.raw_dim());
    for (index, value) in q.indexed_iter() {
        let (scale, zp) = params.at(index.slice())?;
        out[index.slice()] = (value - zp) * scale;
    }
    Ok(out)
}
