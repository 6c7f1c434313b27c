use crate::backends::ndarray_backend::{NDArrayNumericTensor, NDArrayNumericTensorError};
use crate::dtype::DType;
use crate::graph::LogicalTensor;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Tensor {0} has unknown dims {1:?}")]
    UnknownDims(usize, Vec<i64>),
    #[error("Cannot describe {0} elements as {1:?}")]
    ElementCountMismatch(usize, Vec<usize>),
    #[error(transparent)]
    NDArrayNumericTensorError(#[from] NDArrayNumericTensorError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryDesc {
    pub dtype: DType,
    pub dims: Vec<usize>,
}

impl MemoryDesc {
    pub fn new(dtype: DType, dims: &[usize]) -> Self {
        Self {
            dtype,
            dims: dims.to_vec(),
        }
    }

    pub fn from_logical_tensor(lt: &LogicalTensor) -> Result<Self, MemoryError> {
        let dims = lt
            .dims()
            .ok_or_else(|| MemoryError::UnknownDims(lt.id, lt.shape.clone()))?;
        Ok(Self::new(lt.data_type, &dims))
    }

    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

/// A typed, shaped buffer. The data always matches the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    desc: MemoryDesc,
    data: NDArrayNumericTensor,
}

impl Memory {
    /// Zero-filled buffer.
    pub fn new(desc: MemoryDesc) -> Self {
        let data = NDArrayNumericTensor::zeros(desc.dtype, &desc.dims);
        Self { desc, data }
    }

    pub fn from_tensor(data: NDArrayNumericTensor) -> Self {
        let desc = MemoryDesc::new(data.dtype(), &data.shape());
        Self { desc, data }
    }

    pub fn desc(&self) -> &MemoryDesc {
        &self.desc
    }

    pub fn data(&self) -> &NDArrayNumericTensor {
        &self.data
    }

    pub fn into_data(self) -> NDArrayNumericTensor {
        self.data
    }

    /// Same bytes in logical order, new dims.
    pub fn redescribe(self, dims: &[usize]) -> Result<Self, MemoryError> {
        if dims.iter().product::<usize>() != self.desc.num_elements() {
            return Err(MemoryError::ElementCountMismatch(
                self.desc.num_elements(),
                dims.to_vec(),
            ));
        }
        let data = self.data.reshape(dims)?;
        Ok(Self {
            desc: MemoryDesc::new(self.desc.dtype, dims),
            data,
        })
    }

    /// Converting copy of `src` into this buffer's descriptor: values are cast
    /// to this buffer's dtype and laid out in this buffer's dims.
    pub fn reorder_from(&mut self, src: &Memory) -> Result<(), MemoryError> {
        if src.desc.num_elements() != self.desc.num_elements() {
            return Err(MemoryError::ElementCountMismatch(
                src.desc.num_elements(),
                self.desc.dims.clone(),
            ));
        }
        self.data = src.data.cast(self.desc.dtype).reshape(&self.desc.dims)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.to_bytes()
    }
}
