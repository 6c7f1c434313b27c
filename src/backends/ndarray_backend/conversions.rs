use crate::backends::ndarray_backend::{NDArrayNumericTensor, NDArrayNumericTensorError};
use crate::dtype::DTypeOfPrimitive;
use half::{bf16, f16};
use ndarray::{ArcArray, IxDyn};

pub trait NDArrayNumericTensorType: Sized + DTypeOfPrimitive + Clone {
    fn ndarray_numeric_tensor_from_vec_shape(
        v: Vec<Self>,
        shape: &[usize],
    ) -> Result<NDArrayNumericTensor, NDArrayNumericTensorError>;
    fn ndarray_numeric_tensor_inner(
        tensor: &NDArrayNumericTensor,
    ) -> Result<&ArcArray<Self, IxDyn>, NDArrayNumericTensorError>;
    fn ndarray_numeric_tensor_from_ndarray(value: ArcArray<Self, IxDyn>) -> NDArrayNumericTensor;
}

impl NDArrayNumericTensor {
    pub fn from_vec_shape<T: NDArrayNumericTensorType>(
        v: Vec<T>,
        shape: &[usize],
    ) -> Result<Self, NDArrayNumericTensorError> {
        T::ndarray_numeric_tensor_from_vec_shape(v, shape)
    }

    /// Elements in logical (row-major) order.
    pub fn try_to_vec<T: NDArrayNumericTensorType>(
        &self,
    ) -> Result<Vec<T>, NDArrayNumericTensorError> {
        Ok(T::ndarray_numeric_tensor_inner(self)?.iter().cloned().collect())
    }
}

impl<T: NDArrayNumericTensorType> From<ArcArray<T, IxDyn>> for NDArrayNumericTensor {
    fn from(value: ArcArray<T, IxDyn>) -> Self {
        T::ndarray_numeric_tensor_from_ndarray(value)
    }
}

macro_rules! impl_type_ndarray_backend {
    ($a:ident, $b:ident) => {
        impl NDArrayNumericTensorType for $a {
            fn ndarray_numeric_tensor_from_vec_shape(
                v: Vec<Self>,
                shape: &[usize],
            ) -> Result<NDArrayNumericTensor, NDArrayNumericTensorError> {
                Ok(NDArrayNumericTensor::$b(ArcArray::from_shape_vec(
                    IxDyn(shape),
                    v,
                )?))
            }

            fn ndarray_numeric_tensor_inner(
                tensor: &NDArrayNumericTensor,
            ) -> Result<&ArcArray<Self, IxDyn>, NDArrayNumericTensorError> {
                if let NDArrayNumericTensor::$b(x) = tensor {
                    Ok(x)
                } else {
                    Err(NDArrayNumericTensorError::WrongDTypeError(
                        Self::DTYPE,
                        tensor.dtype(),
                    ))
                }
            }

            fn ndarray_numeric_tensor_from_ndarray(
                value: ArcArray<Self, IxDyn>,
            ) -> NDArrayNumericTensor {
                NDArrayNumericTensor::$b(value)
            }
        }
    };
}

impl_type_ndarray_backend!(f32, F32);
impl_type_ndarray_backend!(bf16, BF16);
impl_type_ndarray_backend!(f16, F16);
impl_type_ndarray_backend!(i32, I32);
impl_type_ndarray_backend!(i8, I8);
impl_type_ndarray_backend!(u8, U8);
