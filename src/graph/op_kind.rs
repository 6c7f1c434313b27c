use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Op kind tags as they appear in graph dumps.
///
/// Kinds this crate has no special knowledge of still load, as `Unknown`.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::VariantNames,
)]
#[serde(from = "String", into = "String")]
pub enum OpKind {
    Abs,
    Add,
    AvgPool,
    BatchNormInference,
    BiasAdd,
    Clamp,
    Concat,
    Convolution,
    ConvTranspose,
    Dequantize,
    Divide,
    DynamicDequantize,
    DynamicQuantize,
    Elu,
    Exp,
    GELU,
    HardSwish,
    Interpolate,
    LayerNorm,
    LeakyReLU,
    Log,
    MatMul,
    Maximum,
    MaxPool,
    Minimum,
    Mish,
    Multiply,
    Pow,
    Quantize,
    ReduceMax,
    ReduceMean,
    ReduceSum,
    ReLU,
    Reorder,
    Round,
    Select,
    Sigmoid,
    SoftMax,
    Sqrt,
    Square,
    StaticReshape,
    StaticTranspose,
    Subtract,
    Tanh,
    TypeCast,
    Wildcard,
    #[strum(disabled)]
    Unknown(String),
}

impl From<String> for OpKind {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(OpKind::Unknown(value))
    }
}

impl From<OpKind> for String {
    fn from(value: OpKind) -> Self {
        value.to_string()
    }
}

impl Display for OpKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Unknown(kind) => write!(f, "{kind}"),
            _ => {
                let name: &'static str = self.into();
                write!(f, "{name}")
            }
        }
    }
}

/// The primitive driver a graph op is tested through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DriverFamily {
    Binary,
    Bnorm,
    Concat,
    Conv,
    Deconv,
    Eltwise,
    Lnorm,
    Matmul,
    Pool,
    Reduction,
    Reorder,
    Resampling,
    Softmax,
    Custom,
}

/// Primitive argument a buffer is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum_macros::Display)]
pub enum ArgKind {
    Src,
    Src1,
    Weights,
    Bias,
    Dst,
}

impl OpKind {
    /// Ops whose numeric result is sensitive to how their quantized inputs
    /// were generated.
    pub fn is_main(&self) -> bool {
        matches!(
            self,
            OpKind::Convolution
                | OpKind::ConvTranspose
                | OpKind::AvgPool
                | OpKind::MaxPool
                | OpKind::MatMul
                | OpKind::Add
                | OpKind::Divide
                | OpKind::Maximum
                | OpKind::Minimum
                | OpKind::Multiply
                | OpKind::Subtract
        )
    }

    /// Pure layout/type changes and affine (de)quantization.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            OpKind::StaticTranspose
                | OpKind::StaticReshape
                | OpKind::TypeCast
                | OpKind::Quantize
                | OpKind::Dequantize
        )
    }

    pub fn has_weights(&self) -> bool {
        matches!(
            self,
            OpKind::MatMul | OpKind::Convolution | OpKind::ConvTranspose
        )
    }

    pub fn driver(&self) -> DriverFamily {
        match self {
            OpKind::Add
            | OpKind::BiasAdd
            | OpKind::Divide
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::Multiply
            | OpKind::Select
            | OpKind::Subtract => DriverFamily::Binary,
            OpKind::BatchNormInference => DriverFamily::Bnorm,
            OpKind::Concat => DriverFamily::Concat,
            OpKind::Convolution => DriverFamily::Conv,
            OpKind::ConvTranspose => DriverFamily::Deconv,
            OpKind::Abs
            | OpKind::Clamp
            | OpKind::Elu
            | OpKind::Exp
            | OpKind::GELU
            | OpKind::HardSwish
            | OpKind::LeakyReLU
            | OpKind::Log
            | OpKind::Mish
            | OpKind::Pow
            | OpKind::ReLU
            | OpKind::Round
            | OpKind::Sigmoid
            | OpKind::Sqrt
            | OpKind::Square
            | OpKind::Tanh => DriverFamily::Eltwise,
            OpKind::LayerNorm => DriverFamily::Lnorm,
            OpKind::MatMul => DriverFamily::Matmul,
            OpKind::AvgPool | OpKind::MaxPool => DriverFamily::Pool,
            OpKind::ReduceMax | OpKind::ReduceMean | OpKind::ReduceSum => DriverFamily::Reduction,
            OpKind::Dequantize
            | OpKind::DynamicDequantize
            | OpKind::DynamicQuantize
            | OpKind::Quantize
            | OpKind::Reorder
            | OpKind::TypeCast => DriverFamily::Reorder,
            OpKind::Interpolate => DriverFamily::Resampling,
            OpKind::SoftMax => DriverFamily::Softmax,
            OpKind::StaticReshape
            | OpKind::StaticTranspose
            | OpKind::Wildcard
            | OpKind::Unknown(_) => DriverFamily::Custom,
        }
    }

    /// Primitive argument fed by input port `port` of an op of this kind.
    pub fn arg_for_input(&self, port: usize) -> Option<ArgKind> {
        match (self.driver(), port) {
            (_, 0) => Some(ArgKind::Src),
            (DriverFamily::Conv | DriverFamily::Deconv | DriverFamily::Matmul, 1) => {
                Some(ArgKind::Weights)
            }
            (DriverFamily::Conv | DriverFamily::Deconv | DriverFamily::Matmul, 2) => {
                Some(ArgKind::Bias)
            }
            (DriverFamily::Binary, 1) => Some(ArgKind::Src1),
            _ => None,
        }
    }
}
