use crate::backends::eval_backend::EvalBackend;
use crate::backends::ndarray_backend::ops::{
    self, NDArrayOperationError, PoolKind, QuantParams, Window2d,
};
use crate::backends::ndarray_backend::{NDArrayNumericTensor, NDArrayNumericTensorError};
use crate::config::DisplacerConfig;
use crate::dtype::{DType, DTypeError};
use crate::graph::{ArgKind, DeserializedOp, DriverFamily, OpKind};
use crate::memory::{Memory, MemoryDesc, MemoryError};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

#[derive(Debug, thiserror::Error)]
pub enum RefPrimitiveError {
    #[error("Invalid arguments for op {op}: {reason}")]
    InvalidArguments { op: usize, reason: String },
    #[error("Op kind {0} is not implemented by the reference engine")]
    Unimplemented(OpKind),
    #[error("Unsupported configuration for op {op}: {reason}")]
    Unsupported { op: usize, reason: String },
    #[error("Op {0} has no {1} argument")]
    MissingArg(usize, ArgKind),
    #[error("Primitive for op {0} is not initialized")]
    NotInitialized(usize),
    #[error(transparent)]
    MemoryError(#[from] MemoryError),
    #[error(transparent)]
    NDArrayNumericTensorError(#[from] NDArrayNumericTensorError),
    #[error(transparent)]
    NDArrayOperationError(#[from] NDArrayOperationError),
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
    #[error(transparent)]
    DTypeError(#[from] DTypeError),
}

impl RefPrimitiveError {
    /// Conditions that mean "the reference engine cannot test this", as
    /// opposed to a malformed op or an internal failure.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            RefPrimitiveError::Unimplemented(_)
                | RefPrimitiveError::Unsupported { .. }
                | RefPrimitiveError::DTypeError(DTypeError::DTypeNotSupportedByBackend(_))
        )
    }
}

/// One graph op instantiated on the reference engine, with its argument
/// buffers.
///
/// Lifecycle: [`RefPrimitive::new`] → [`RefPrimitive::init_prb`] →
/// [`RefPrimitive::init_prim`] → [`RefPrimitive::init_memory_args`] →
/// optionally [`RefPrimitive::init_ref_memory_args`] → [`RefPrimitive::execute`].
#[derive(Debug, Clone)]
pub struct RefPrimitive {
    op: DeserializedOp,
    args: BTreeMap<ArgKind, Memory>,
    initialized: bool,
}

impl RefPrimitive {
    pub fn new(op: &DeserializedOp) -> Self {
        Self {
            op: op.clone(),
            args: BTreeMap::new(),
            initialized: false,
        }
    }

    /// Runs every init stage short of filling.
    pub fn instantiate(
        op: &DeserializedOp,
        backend: &EvalBackend,
    ) -> Result<Self, RefPrimitiveError> {
        let mut prim = Self::new(op);
        prim.init_prb()?;
        prim.init_prim(backend)?;
        prim.init_memory_args()?;
        Ok(prim)
    }

    pub fn op(&self) -> &DeserializedOp {
        &self.op
    }

    fn invalid(&self, reason: impl Into<String>) -> RefPrimitiveError {
        RefPrimitiveError::InvalidArguments {
            op: self.op.id,
            reason: reason.into(),
        }
    }

    fn unsupported(&self, reason: impl Into<String>) -> RefPrimitiveError {
        RefPrimitiveError::Unsupported {
            op: self.op.id,
            reason: reason.into(),
        }
    }

    fn expected_inputs(&self) -> RangeInclusive<usize> {
        match self.op.kind.driver() {
            DriverFamily::Conv | DriverFamily::Deconv | DriverFamily::Matmul => 2..=3,
            DriverFamily::Binary if self.op.kind == OpKind::Select => 3..=3,
            DriverFamily::Binary => 2..=2,
            DriverFamily::Pool => 1..=1,
            _ if self.op.kind.is_pass_through() => 1..=1,
            _ => 0..=usize::MAX,
        }
    }

    fn dims_of(&self, port: usize, output: bool) -> Result<Vec<usize>, RefPrimitiveError> {
        let lts = if output { &self.op.out_lts } else { &self.op.in_lts };
        let lt = lts
            .get(port)
            .ok_or_else(|| self.invalid(format!("missing port {port}")))?;
        lt.dims().ok_or_else(|| {
            self.invalid(format!("tensor {} has unknown dims {:?}", lt.id, lt.shape))
        })
    }

    /// Structural validation of the op description.
    pub fn init_prb(&self) -> Result<(), RefPrimitiveError> {
        let expected = self.expected_inputs();
        if !expected.contains(&self.op.in_lts.len()) {
            return Err(self.invalid(format!(
                "{} takes {:?} inputs, got {}",
                self.op.kind,
                expected,
                self.op.in_lts.len()
            )));
        }
        if self.op.out_lts.len() != 1 {
            return Err(self.invalid(format!("expected 1 output, got {}", self.op.out_lts.len())));
        }
        for port in 0..self.op.in_lts.len() {
            self.dims_of(port, false)?;
        }
        let dst = self.dims_of(0, true)?;

        match &self.op.kind {
            OpKind::TypeCast => {
                let src = self.dims_of(0, false)?;
                if src != dst {
                    return Err(self.invalid(format!("TypeCast {src:?} -> {dst:?}")));
                }
            }
            OpKind::StaticReshape => {
                let src = self.dims_of(0, false)?;
                if src.iter().product::<usize>() != dst.iter().product::<usize>() {
                    return Err(self.invalid(format!("StaticReshape {src:?} -> {dst:?}")));
                }
            }
            OpKind::StaticTranspose => {
                let src = self.dims_of(0, false)?;
                let order = self
                    .op
                    .attr_s64_vec("order")
                    .ok_or_else(|| self.invalid("missing order"))?;
                let rank = src.len() as i64;
                let permuted: Option<Vec<usize>> = order
                    .iter()
                    .map(|&o| {
                        let o = if o < 0 { o + rank } else { o };
                        (0..rank).contains(&o).then(|| src[o as usize])
                    })
                    .collect();
                if order.len() != src.len() || permuted.as_ref() != Some(&dst) {
                    return Err(self.invalid(format!(
                        "order {order:?} does not map {src:?} to {dst:?}"
                    )));
                }
            }
            OpKind::Quantize | OpKind::Dequantize => {
                let src = self.dims_of(0, false)?;
                if src != dst {
                    return Err(self.invalid(format!("{} {src:?} -> {dst:?}", self.op.kind)));
                }
                self.quant_params(src.len())?;
                let channels = self.quant_channels(&src)?;
                let scales = self.op.attr_f32_vec("scales").unwrap_or_default();
                if scales.len() != channels {
                    return Err(self.invalid(format!(
                        "{} scales for {channels} channels",
                        scales.len()
                    )));
                }
            }
            OpKind::MatMul => {
                let a = self.dims_of(0, false)?;
                let b = self.dims_of(1, false)?;
                if a.len() < 2 || b.len() < 2 {
                    return Err(self.invalid(format!("MatMul {a:?} x {b:?}")));
                }
            }
            OpKind::AvgPool | OpKind::MaxPool => {
                if self.dims_of(0, false)?.len() != dst.len() {
                    return Err(self.invalid("src and dst ranks differ"));
                }
                self.op
                    .attr_s64_vec("kernel")
                    .ok_or_else(|| self.invalid("missing kernel"))?;
            }
            OpKind::Convolution | OpKind::ConvTranspose => {
                let src = self.dims_of(0, false)?;
                let wei = self.dims_of(1, false)?;
                if src.len() != dst.len() || wei.len() != src.len() {
                    return Err(self.invalid(format!(
                        "{} src {src:?}, weights {wei:?}, dst {dst:?}",
                        self.op.kind
                    )));
                }
            }
            kind if kind.driver() == DriverFamily::Binary => {
                let a = self.dims_of(0, false)?;
                let b = self.dims_of(1, false)?;
                if self.op.attr_str("auto_broadcast") == Some("none") && a != b {
                    return Err(self.invalid(format!("{a:?} vs {b:?} without broadcasting")));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether the reference engine can execute this op as described.
    pub fn init_prim(&mut self, backend: &EvalBackend) -> Result<(), RefPrimitiveError> {
        for lt in self.op.in_lts.iter().chain(self.op.out_lts.iter()) {
            if !backend.supports_dtype(lt.data_type) {
                return Err(DTypeError::DTypeNotSupportedByBackend(lt.data_type).into());
            }
        }
        let (Some(src), Some(dst)) = (self.op.in_lts.first(), self.op.out_lts.first()) else {
            return Err(self.invalid("op needs an input and an output"));
        };
        let (src, dst) = (src.data_type, dst.data_type);
        match &self.op.kind {
            OpKind::TypeCast | OpKind::StaticReshape | OpKind::StaticTranspose => {}
            OpKind::Quantize => {
                if !src.is_float() || !(dst.is_int8() || dst == DType::I32) {
                    return Err(self.unsupported(format!("Quantize {src} -> {dst}")));
                }
            }
            OpKind::Dequantize => {
                if !(src.is_int8() || src == DType::I32) || !dst.is_float() {
                    return Err(self.unsupported(format!("Dequantize {src} -> {dst}")));
                }
            }
            OpKind::MatMul | OpKind::Convolution | OpKind::ConvTranspose => {
                let wei = self
                    .op
                    .in_lts
                    .get(1)
                    .ok_or_else(|| self.invalid("missing weights"))?
                    .data_type;
                if src == DType::U8 && wei == DType::U8 {
                    return Err(self.unsupported("u8 source with u8 weights"));
                }
                if src.is_int8() != wei.is_int8() {
                    return Err(self.unsupported(format!("mixed {src} source and {wei} weights")));
                }
            }
            OpKind::AvgPool
            | OpKind::MaxPool
            | OpKind::Add
            | OpKind::Subtract
            | OpKind::Multiply
            | OpKind::Divide
            | OpKind::Maximum
            | OpKind::Minimum => {
                if src.is_int8() && dst != src {
                    return Err(self.unsupported(format!("{src} source with {dst} destination")));
                }
            }
            kind => return Err(RefPrimitiveError::Unimplemented(kind.clone())),
        }
        self.initialized = true;
        Ok(())
    }

    /// Zero-filled buffers for every mapped input and for the destination.
    pub fn init_memory_args(&mut self) -> Result<(), RefPrimitiveError> {
        if !self.initialized {
            return Err(RefPrimitiveError::NotInitialized(self.op.id));
        }
        self.args.clear();
        for (port, lt) in self.op.in_lts.iter().enumerate() {
            if let Some(arg) = self.op.kind.arg_for_input(port) {
                self.args
                    .insert(arg, Memory::new(MemoryDesc::from_logical_tensor(lt)?));
            }
        }
        self.args.insert(
            ArgKind::Dst,
            Memory::new(MemoryDesc::from_logical_tensor(&self.op.out_lts[0])?),
        );
        Ok(())
    }

    /// Fill every input argument with deterministic integer-valued data.
    ///
    /// The stream for each argument depends only on the configured seed, the
    /// op id, and the argument, so repeated calls produce identical buffers.
    pub fn init_ref_memory_args(
        &mut self,
        backend: &mut EvalBackend,
        config: &DisplacerConfig,
    ) -> Result<(), RefPrimitiveError> {
        if self.args.is_empty() {
            self.init_memory_args()?;
        }
        match backend {
            EvalBackend::NDArray => {}
        }
        let op_id = self.op.id as u64;
        for (arg, mem) in self.args.iter_mut() {
            if *arg == ArgKind::Dst {
                continue;
            }
            let desc = mem.desc().clone();
            let seed = config.seed
                ^ op_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)
                ^ ((*arg as u64 + 1) << 56);
            let mut rng = StdRng::seed_from_u64(seed);
            let (lo, hi) = config.range_for(desc.dtype);
            if lo > hi {
                return Err(RefPrimitiveError::InvalidArguments {
                    op: self.op.id,
                    reason: format!("empty fill range [{lo}, {hi}] for {}", desc.dtype),
                });
            }
            let values: Vec<f64> = (0..desc.num_elements())
                .map(|_| rng.gen_range(lo..=hi) as f64)
                .collect();
            let values = ArrayD::from_shape_vec(IxDyn(&desc.dims), values)?;
            *mem = Memory::from_tensor(NDArrayNumericTensor::from_f64_array(&values, desc.dtype));
        }
        log::debug!(
            "Filled {} reference args for op {} ({})",
            self.args.len() - 1,
            self.op.id,
            self.op.kind
        );
        Ok(())
    }

    /// Bind `mem` to `arg`. The descriptor must match the one the primitive
    /// allocated.
    pub fn replace_arg(&mut self, arg: ArgKind, mem: Memory) -> Result<(), RefPrimitiveError> {
        let current = self
            .args
            .get(&arg)
            .ok_or(RefPrimitiveError::MissingArg(self.op.id, arg))?;
        if current.desc() != mem.desc() {
            return Err(self.invalid(format!(
                "{arg} expects {:?}, got {:?}",
                current.desc(),
                mem.desc()
            )));
        }
        self.args.insert(arg, mem);
        Ok(())
    }

    pub fn arg(&self, arg: ArgKind) -> Option<&Memory> {
        self.args.get(&arg)
    }

    pub fn take_arg(&mut self, arg: ArgKind) -> Option<Memory> {
        self.args.remove(&arg)
    }

    fn input(&self, arg: ArgKind) -> Result<&NDArrayNumericTensor, RefPrimitiveError> {
        self.args
            .get(&arg)
            .map(Memory::data)
            .ok_or(RefPrimitiveError::MissingArg(self.op.id, arg))
    }

    /// Compute the destination from the bound inputs.
    pub fn execute(&mut self, backend: &mut EvalBackend) -> Result<(), RefPrimitiveError> {
        if !self.initialized || !self.args.contains_key(&ArgKind::Dst) {
            return Err(RefPrimitiveError::NotInitialized(self.op.id));
        }
        let result = match backend {
            EvalBackend::NDArray => self.execute_ndarray()?,
        };
        let dst_desc = MemoryDesc::from_logical_tensor(&self.op.out_lts[0])?;
        if result.shape() != dst_desc.dims {
            return Err(self.invalid(format!(
                "computed {:?}, destination is {:?}",
                result.shape(),
                dst_desc.dims
            )));
        }
        let mut dst = Memory::new(dst_desc);
        dst.reorder_from(&Memory::from_tensor(result))?;
        self.args.insert(ArgKind::Dst, dst);
        Ok(())
    }

    fn execute_ndarray(&self) -> Result<NDArrayNumericTensor, RefPrimitiveError> {
        let dst_lt = &self.op.out_lts[0];
        let dst_dims = self.dims_of(0, true)?;
        let src = self.input(ArgKind::Src)?;
        Ok(match &self.op.kind {
            OpKind::TypeCast => src.cast(dst_lt.data_type),
            OpKind::StaticReshape => src.reshape(&dst_dims)?,
            OpKind::StaticTranspose => {
                let order = self
                    .op
                    .attr_s64_vec("order")
                    .ok_or_else(|| self.invalid("missing order"))?;
                src.transpose(order)?
            }
            OpKind::Quantize => {
                let (scales, zps, axis) = self.quant_params(src.rank())?;
                let params = QuantParams { scales, zps, axis };
                let q = ops::quantize(src.to_f64_array().view(), &params)?;
                NDArrayNumericTensor::from_f64_array(&q, dst_lt.data_type)
            }
            OpKind::Dequantize => {
                let (scales, zps, axis) = self.quant_params(src.rank())?;
                let params = QuantParams { scales, zps, axis };
                let x = ops::dequantize(src.to_f64_array().view(), &params)?;
                NDArrayNumericTensor::from_f64_array(&x, dst_lt.data_type)
            }
            OpKind::MatMul => {
                let mut a = src.to_f32_array();
                let mut b = self.input(ArgKind::Weights)?.to_f32_array();
                if self.op.attr_bool("transpose_a").unwrap_or(false) {
                    swap_last_axes(&mut a);
                }
                if self.op.attr_bool("transpose_b").unwrap_or(false) {
                    swap_last_axes(&mut b);
                }
                let mut out = ops::matmul(a.view(), b.view())?;
                if let Some(bias) = self.args.get(&ArgKind::Bias) {
                    out = ops::binary(out.view(), bias.data().to_f32_array().view(), |x, y| x + y)?;
                }
                NDArrayNumericTensor::from_f32_array(&out, dst_lt.data_type)
            }
            OpKind::Add
            | OpKind::Subtract
            | OpKind::Multiply
            | OpKind::Divide
            | OpKind::Maximum
            | OpKind::Minimum => {
                let a = src.to_f32_array();
                let b = self.input(ArgKind::Src1)?.to_f32_array();
                let f: fn(f32, f32) -> f32 = match self.op.kind {
                    OpKind::Add => |x, y| x + y,
                    OpKind::Subtract => |x, y| x - y,
                    OpKind::Multiply => |x, y| x * y,
                    OpKind::Divide => |x, y| x / y,
                    OpKind::Maximum => f32::max,
                    _ => f32::min,
                };
                let out = ops::binary(a.view(), b.view(), f)?;
                NDArrayNumericTensor::from_f32_array(&out, dst_lt.data_type)
            }
            OpKind::AvgPool | OpKind::MaxPool => {
                if src.rank() != 4 {
                    return Err(self.unsupported("only 2D pooling is implemented"));
                }
                let channels_last = self.channels_last();
                let src = to_nchw(src.to_f32_array(), channels_last);
                let window = Window2d {
                    kernel: self.spatial_attr("kernel", 1)?,
                    strides: self.spatial_attr("strides", 1)?,
                    dilations: self.spatial_attr("dilations", 1)?,
                    pads_begin: self.spatial_attr("pads_begin", 0)?,
                    out_spatial: out_spatial(&dst_dims, channels_last),
                };
                let kind = if self.op.kind == OpKind::MaxPool {
                    PoolKind::Max
                } else {
                    PoolKind::Avg {
                        exclude_pad: self.op.attr_bool("exclude_pad").unwrap_or(false),
                    }
                };
                let out = from_nchw(ops::pool2d(src.view(), kind, &window)?, channels_last);
                NDArrayNumericTensor::from_f32_array(&out, dst_lt.data_type)
            }
            OpKind::Convolution => {
                let mut weights = self.input(ArgKind::Weights)?.to_f32_array();
                if src.rank() != 4 || weights.ndim() != 4 {
                    return Err(self.unsupported("only 2D convolution is implemented"));
                }
                let channels_last = self.channels_last();
                let src = to_nchw(src.to_f32_array(), channels_last);
                if self.op.attr_str("weights_format").unwrap_or("XIO") == "XIO" {
                    weights = weights
                        .permuted_axes(IxDyn(&[3, 2, 0, 1]))
                        .as_standard_layout()
                        .into_owned();
                }
                let window = Window2d {
                    kernel: [weights.shape()[2], weights.shape()[3]],
                    strides: self.spatial_attr("strides", 1)?,
                    dilations: self.spatial_attr("dilations", 1)?,
                    pads_begin: self.spatial_attr("pads_begin", 0)?,
                    out_spatial: out_spatial(&dst_dims, channels_last),
                };
                let groups = self.op.attr_s64("groups").unwrap_or(1).max(1) as usize;
                let mut out = ops::conv2d(src.view(), weights.view(), groups, &window)?;
                if let Some(bias) = self.args.get(&ArgKind::Bias) {
                    let bias = bias.data().to_f32_array();
                    let bias = bias.to_shape(IxDyn(&[1, bias.len(), 1, 1]))?;
                    out = ops::binary(out.view(), bias.view(), |x, y| x + y)?;
                }
                let out = from_nchw(out, channels_last);
                NDArrayNumericTensor::from_f32_array(&out, dst_lt.data_type)
            }
            kind => return Err(RefPrimitiveError::Unimplemented(kind.clone())),
        })
    }

    fn channels_last(&self) -> bool {
        self.op.attr_str("data_format").unwrap_or("NXC") == "NXC"
    }

    fn spatial_attr(&self, name: &str, default: usize) -> Result<[usize; 2], RefPrimitiveError> {
        match self.op.attr_s64_vec(name) {
            None => Ok([default; 2]),
            Some(&[h, w]) if h >= 0 && w >= 0 => Ok([h as usize, w as usize]),
            Some(v) => Err(self.invalid(format!("{name} = {v:?}"))),
        }
    }

    /// Number of scales a quantization op of this shape needs.
    fn quant_channels(&self, dims: &[usize]) -> Result<usize, RefPrimitiveError> {
        let (_, _, axis) = self.quant_params(dims.len())?;
        Ok(match self.op.attr_str("qtype").unwrap_or("per_tensor") {
            "per_channel" => dims[axis],
            _ => 1,
        })
    }

    fn quant_params(&self, rank: usize) -> Result<(&[f32], &[i64], usize), RefPrimitiveError> {
        let scales = self
            .op
            .attr_f32_vec("scales")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.invalid("missing scales"))?;
        let zps = self.op.attr_s64_vec("zps").unwrap_or_default();
        if zps.len() > 1 && zps.len() != scales.len() {
            return Err(self.invalid(format!("{} zps for {} scales", zps.len(), scales.len())));
        }
        let axis = self.op.attr_s64("axis").unwrap_or(1);
        let axis = if axis < 0 { axis + rank as i64 } else { axis };
        let per_channel = self.op.attr_str("qtype") == Some("per_channel");
        if per_channel && !(0..rank as i64).contains(&axis) {
            return Err(self.invalid(format!("axis {axis} for rank {rank}")));
        }
        Ok((scales, zps, if per_channel { axis as usize } else { 0 }))
    }
}

fn swap_last_axes(a: &mut ArrayD<f32>) {
    let rank = a.ndim();
    a.swap_axes(rank - 2, rank - 1);
}

fn to_nchw(a: ArrayD<f32>, channels_last: bool) -> ArrayD<f32> {
    if channels_last {
        a.permuted_axes(IxDyn(&[0, 3, 1, 2]))
            .as_standard_layout()
            .into_owned()
    } else {
        a
    }
}

fn from_nchw(a: ArrayD<f32>, channels_last: bool) -> ArrayD<f32> {
    if channels_last {
        a.permuted_axes(IxDyn(&[0, 2, 3, 1]))
            .as_standard_layout()
            .into_owned()
    } else {
        a
    }
}

fn out_spatial(dst_dims: &[usize], channels_last: bool) -> [usize; 2] {
    if channels_last {
        [dst_dims[1], dst_dims[2]]
    } else {
        [dst_dims[2], dst_dims[3]]
    }
}
