use half::{bf16, f16};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DTypeError {
    #[error("The backend does not support the dtype {0}")]
    DTypeNotSupportedByBackend(DType),
    #[error("Unknown data type \"{0}\"")]
    UnknownDType(String),
}

/// Element types understood by the graph format and the reference engine.
///
/// The serialized spellings follow the graph JSON dumps (`f32`, `s8`, ...).
#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    Eq,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::EnumIter,
)]
pub enum DType {
    #[serde(rename = "f32")]
    #[strum(serialize = "f32")]
    F32,
    #[serde(rename = "bf16")]
    #[strum(serialize = "bf16")]
    BF16,
    #[serde(rename = "f16")]
    #[strum(serialize = "f16")]
    F16,
    #[serde(rename = "s32")]
    #[strum(serialize = "s32")]
    I32,
    #[serde(rename = "s8")]
    #[strum(serialize = "s8")]
    I8,
    #[serde(rename = "u8")]
    #[strum(serialize = "u8")]
    U8,
}

impl DType {
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::BF16 | DType::F16)
    }

    /// 8-bit integer types, the ones quantized data lives in.
    pub fn is_int8(&self) -> bool {
        matches!(self, DType::I8 | DType::U8)
    }

    pub fn parse(name: &str) -> Result<Self, DTypeError> {
        name.parse()
            .map_err(|_| DTypeError::UnknownDType(name.to_string()))
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.into();
        write!(f, "{name}")
    }
}

pub trait DTypeOfPrimitive {
    const DTYPE: DType;
}

impl DTypeOfPrimitive for f32 { const DTYPE: DType = DType::F32; }
impl DTypeOfPrimitive for bf16 { const DTYPE: DType = DType::BF16; }
impl DTypeOfPrimitive for f16 { const DTYPE: DType = DType::F16; }
impl DTypeOfPrimitive for i32 { const DTYPE: DType = DType::I32; }
impl DTypeOfPrimitive for i8 { const DTYPE: DType = DType::I8; }
impl DTypeOfPrimitive for u8 { const DTYPE: DType = DType::U8; }
