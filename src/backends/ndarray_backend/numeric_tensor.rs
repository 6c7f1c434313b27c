use super::ops;
use crate::dtype::DType;
use half::{bf16, f16};
use ndarray::{ArcArray, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, thiserror::Error)]
pub enum NDArrayNumericTensorError {
    #[error("Requested dtype {0}, but had dtype {1}")]
    WrongDTypeError(DType, DType),
    #[error("Cannot reshape tensor from {0:?} to {1:?}")]
    InvalidReshapeError(Vec<usize>, Vec<usize>),
    #[error(transparent)]
    NDArrayOperationError(#[from] ops::NDArrayOperationError),
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
}

/// A dense tensor whose element type is only known at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NDArrayNumericTensor {
    F32(ArcArray<f32, IxDyn>),
    BF16(ArcArray<bf16, IxDyn>),
    F16(ArcArray<f16, IxDyn>),
    I32(ArcArray<i32, IxDyn>),
    I8(ArcArray<i8, IxDyn>),
    U8(ArcArray<u8, IxDyn>),
}

impl Display for NDArrayNumericTensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NDArrayNumericTensor::F32(x) => x.fmt(f),
            NDArrayNumericTensor::BF16(x) => x.fmt(f),
            NDArrayNumericTensor::F16(x) => x.fmt(f),
            NDArrayNumericTensor::I32(x) => x.fmt(f),
            NDArrayNumericTensor::I8(x) => x.fmt(f),
            NDArrayNumericTensor::U8(x) => x.fmt(f),
        }
    }
}

impl NDArrayNumericTensor {
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        let shape = IxDyn(shape);
        match dtype {
            DType::F32 => NDArrayNumericTensor::F32(ArcArray::zeros(shape)),
            DType::BF16 => NDArrayNumericTensor::BF16(ArcArray::from_elem(shape, bf16::ZERO)),
            DType::F16 => NDArrayNumericTensor::F16(ArcArray::from_elem(shape, f16::ZERO)),
            DType::I32 => NDArrayNumericTensor::I32(ArcArray::zeros(shape)),
            DType::I8 => NDArrayNumericTensor::I8(ArcArray::zeros(shape)),
            DType::U8 => NDArrayNumericTensor::U8(ArcArray::zeros(shape)),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            NDArrayNumericTensor::F32(_) => DType::F32,
            NDArrayNumericTensor::BF16(_) => DType::BF16,
            NDArrayNumericTensor::F16(_) => DType::F16,
            NDArrayNumericTensor::I32(_) => DType::I32,
            NDArrayNumericTensor::I8(_) => DType::I8,
            NDArrayNumericTensor::U8(_) => DType::U8,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            NDArrayNumericTensor::F32(x) => x.shape().to_vec(),
            NDArrayNumericTensor::BF16(x) => x.shape().to_vec(),
            NDArrayNumericTensor::F16(x) => x.shape().to_vec(),
            NDArrayNumericTensor::I32(x) => x.shape().to_vec(),
            NDArrayNumericTensor::I8(x) => x.shape().to_vec(),
            NDArrayNumericTensor::U8(x) => x.shape().to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn num_elements(&self) -> usize {
        match self {
            NDArrayNumericTensor::F32(x) => x.len(),
            NDArrayNumericTensor::BF16(x) => x.len(),
            NDArrayNumericTensor::F16(x) => x.len(),
            NDArrayNumericTensor::I32(x) => x.len(),
            NDArrayNumericTensor::I8(x) => x.len(),
            NDArrayNumericTensor::U8(x) => x.len(),
        }
    }

    /// Widen to f64. Every supported element type is exactly representable.
    pub fn to_f64_array(&self) -> ArrayD<f64> {
        match self {
            NDArrayNumericTensor::F32(x) => x.mapv(|v| v as f64),
            NDArrayNumericTensor::BF16(x) => x.mapv(|v| v.to_f64()),
            NDArrayNumericTensor::F16(x) => x.mapv(|v| v.to_f64()),
            NDArrayNumericTensor::I32(x) => x.mapv(|v| v as f64),
            NDArrayNumericTensor::I8(x) => x.mapv(|v| v as f64),
            NDArrayNumericTensor::U8(x) => x.mapv(|v| v as f64),
        }
    }

    pub fn to_f32_array(&self) -> ArrayD<f32> {
        match self {
            NDArrayNumericTensor::F32(x) => x.to_owned(),
            NDArrayNumericTensor::BF16(x) => x.mapv(|v| v.to_f32()),
            NDArrayNumericTensor::F16(x) => x.mapv(|v| v.to_f32()),
            NDArrayNumericTensor::I32(x) => x.mapv(|v| v as f32),
            NDArrayNumericTensor::I8(x) => x.mapv(|v| v as f32),
            NDArrayNumericTensor::U8(x) => x.mapv(|v| v as f32),
        }
    }

    /// Narrow from f64. Integer targets round half to even and saturate.
    pub fn from_f64_array(values: &ArrayD<f64>, dtype: DType) -> Self {
        match dtype {
            DType::F32 => NDArrayNumericTensor::F32(values.mapv(|v| v as f32).into_shared()),
            DType::BF16 => NDArrayNumericTensor::BF16(values.mapv(bf16::from_f64).into_shared()),
            DType::F16 => NDArrayNumericTensor::F16(values.mapv(f16::from_f64).into_shared()),
            DType::I32 => NDArrayNumericTensor::I32(
                values.mapv(|v| v.round_ties_even() as i32).into_shared(),
            ),
            DType::I8 => NDArrayNumericTensor::I8(
                values.mapv(|v| v.round_ties_even() as i8).into_shared(),
            ),
            DType::U8 => NDArrayNumericTensor::U8(
                values.mapv(|v| v.round_ties_even() as u8).into_shared(),
            ),
        }
    }

    pub fn from_f32_array(values: &ArrayD<f32>, dtype: DType) -> Self {
        match dtype {
            DType::F32 => NDArrayNumericTensor::F32(values.to_shared()),
            _ => Self::from_f64_array(&values.mapv(|v| v as f64), dtype),
        }
    }

    pub fn cast(&self, dtype: DType) -> Self {
        if self.dtype() == dtype {
            self.clone()
        } else {
            Self::from_f64_array(&self.to_f64_array(), dtype)
        }
    }

    pub fn reshape(&self, new_shape: &[usize]) -> Result<Self, NDArrayNumericTensorError> {
        if new_shape.iter().product::<usize>() != self.num_elements() {
            return Err(NDArrayNumericTensorError::InvalidReshapeError(
                self.shape(),
                new_shape.to_vec(),
            ));
        }
        Ok(match self {
            NDArrayNumericTensor::F32(x) => {
                NDArrayNumericTensor::F32(ops::reshape(x.clone(), new_shape)?)
            }
            NDArrayNumericTensor::BF16(x) => {
                NDArrayNumericTensor::BF16(ops::reshape(x.clone(), new_shape)?)
            }
            NDArrayNumericTensor::F16(x) => {
                NDArrayNumericTensor::F16(ops::reshape(x.clone(), new_shape)?)
            }
            NDArrayNumericTensor::I32(x) => {
                NDArrayNumericTensor::I32(ops::reshape(x.clone(), new_shape)?)
            }
            NDArrayNumericTensor::I8(x) => {
                NDArrayNumericTensor::I8(ops::reshape(x.clone(), new_shape)?)
            }
            NDArrayNumericTensor::U8(x) => {
                NDArrayNumericTensor::U8(ops::reshape(x.clone(), new_shape)?)
            }
        })
    }

    pub fn transpose(&self, order: &[i64]) -> Result<Self, NDArrayNumericTensorError> {
        Ok(match self {
            NDArrayNumericTensor::F32(a) => {
                NDArrayNumericTensor::F32(ops::transpose(a.clone(), order)?)
            }
            NDArrayNumericTensor::BF16(a) => {
                NDArrayNumericTensor::BF16(ops::transpose(a.clone(), order)?)
            }
            NDArrayNumericTensor::F16(a) => {
                NDArrayNumericTensor::F16(ops::transpose(a.clone(), order)?)
            }
            NDArrayNumericTensor::I32(a) => {
                NDArrayNumericTensor::I32(ops::transpose(a.clone(), order)?)
            }
            NDArrayNumericTensor::I8(a) => {
                NDArrayNumericTensor::I8(ops::transpose(a.clone(), order)?)
            }
            NDArrayNumericTensor::U8(a) => {
                NDArrayNumericTensor::U8(ops::transpose(a.clone(), order)?)
            }
        })
    }

    /// Raw little-endian bytes in logical (row-major) order.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            NDArrayNumericTensor::F32(x) => pod_bytes(x),
            NDArrayNumericTensor::BF16(x) => pod_bytes(x),
            NDArrayNumericTensor::F16(x) => pod_bytes(x),
            NDArrayNumericTensor::I32(x) => pod_bytes(x),
            NDArrayNumericTensor::I8(x) => pod_bytes(x),
            NDArrayNumericTensor::U8(x) => x.iter().copied().collect(),
        }
    }
}

fn pod_bytes<T: bytemuck::Pod>(x: &ArcArray<T, IxDyn>) -> Vec<u8> {
    let values: Vec<T> = x.iter().copied().collect();
    bytemuck::cast_slice::<T, u8>(&values).to_vec()
}
