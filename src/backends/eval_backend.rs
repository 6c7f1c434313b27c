use crate::dtype::DType;

/// Execution context for reference primitives.
///
/// Every construction and execution call takes the backend explicitly; there
/// is no process-wide default engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvalBackend {
    #[default]
    NDArray,
}

impl core::fmt::Display for EvalBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl EvalBackend {
    pub fn supports_dtype(&self, dtype: DType) -> bool {
        match self {
            EvalBackend::NDArray => matches!(
                dtype,
                DType::F32 | DType::BF16 | DType::F16 | DType::I32 | DType::I8 | DType::U8
            ),
        }
    }
}
