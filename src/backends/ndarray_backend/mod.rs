pub mod conversions;
pub mod numeric_tensor;
pub mod ops;

pub use numeric_tensor::{NDArrayNumericTensor, NDArrayNumericTensorError};
