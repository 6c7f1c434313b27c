use crate::dtype::DType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::IntoEnumIterator;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Empty fill range {0:?} for {1}")]
    EmptyRange((i32, i32), DType),
}

/// Knobs for deterministic input filling.
///
/// Every range is inclusive and integer valued, so generated data survives
/// quantization and layout changes exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplacerConfig {
    pub seed: u64,
    pub float_range: (i32, i32),
    pub s8_range: (i32, i32),
    pub u8_range: (i32, i32),
    pub s32_range: (i32, i32),
}

impl Default for DisplacerConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            float_range: (-8, 8),
            s8_range: (-8, 7),
            u8_range: (0, 15),
            s32_range: (-64, 64),
        }
    }
}

impl DisplacerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        for dtype in DType::iter() {
            let (lo, hi) = config.range_for(dtype);
            if lo > hi {
                return Err(ConfigError::EmptyRange((lo, hi), dtype));
            }
        }
        Ok(config)
    }

    /// Inclusive fill range for buffers of `dtype`, clamped to what the type
    /// can hold.
    pub fn range_for(&self, dtype: DType) -> (i32, i32) {
        match dtype {
            DType::U8 => (self.u8_range.0.max(0), self.u8_range.1.min(u8::MAX as i32)),
            DType::I8 => (
                self.s8_range.0.max(i8::MIN as i32),
                self.s8_range.1.min(i8::MAX as i32),
            ),
            DType::I32 => self.s32_range,
            DType::F32 | DType::BF16 | DType::F16 => self.float_range,
        }
    }
}
