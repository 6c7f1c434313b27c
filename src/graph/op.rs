use crate::dtype::DType;
use crate::graph::op_kind::OpKind;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

fn default_layout_type() -> String {
    "strided".to_string()
}

fn default_property_type() -> String {
    "undef".to_string()
}

/// A tensor edge of the graph, as described by the graph dump.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogicalTensor {
    pub id: usize,
    #[serde(rename = "dtype")]
    pub data_type: DType,
    pub shape: Vec<i64>,
    #[serde(default)]
    pub stride: Vec<i64>,
    #[serde(default = "default_layout_type")]
    pub layout_type: String,
    #[serde(default = "default_property_type")]
    pub property_type: String,
}

impl LogicalTensor {
    pub fn new(id: usize, data_type: DType, shape: &[i64]) -> Self {
        Self {
            id,
            data_type,
            shape: shape.to_vec(),
            stride: dense_strides(shape),
            layout_type: default_layout_type(),
            property_type: default_property_type(),
        }
    }

    /// Concrete dims, or `None` while any dimension is unknown (negative).
    pub fn dims(&self) -> Option<Vec<usize>> {
        self.shape
            .iter()
            .map(|&d| usize::try_from(d).ok())
            .collect()
    }
}

fn dense_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(1);
    }
    strides
}

fn bool_from_int_or_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(d)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

/// Typed attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DeserializedAttr {
    #[serde(rename = "f32")]
    F32(f32),
    #[serde(rename = "f32[]")]
    F32Vec(Vec<f32>),
    #[serde(rename = "s64")]
    S64(i64),
    #[serde(rename = "s64[]")]
    S64Vec(Vec<i64>),
    #[serde(rename = "bool", deserialize_with = "bool_from_int_or_bool")]
    Bool(bool),
    #[serde(rename = "string")]
    Str(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeserializedOp {
    pub id: usize,
    #[serde(default)]
    pub name: String,
    pub kind: OpKind,
    #[serde(default)]
    pub attrs: BTreeMap<String, DeserializedAttr>,
    #[serde(rename = "inputs")]
    pub in_lts: Vec<LogicalTensor>,
    #[serde(rename = "outputs")]
    pub out_lts: Vec<LogicalTensor>,
}

impl DeserializedOp {
    pub fn new(
        id: usize,
        kind: OpKind,
        in_lts: Vec<LogicalTensor>,
        out_lts: Vec<LogicalTensor>,
    ) -> Self {
        Self {
            id,
            name: format!("{kind}_{id}"),
            kind,
            attrs: BTreeMap::new(),
            in_lts,
            out_lts,
        }
    }

    pub fn with_attr(mut self, name: &str, value: DeserializedAttr) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn set_attr(&mut self, name: &str, value: DeserializedAttr) {
        self.attrs.insert(name.to_string(), value);
    }

    pub fn attr_f32_vec(&self, name: &str) -> Option<&[f32]> {
        match self.attrs.get(name)? {
            DeserializedAttr::F32Vec(v) => Some(v),
            _ => None,
        }
    }

    pub fn attr_s64(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name)? {
            DeserializedAttr::S64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_s64_vec(&self, name: &str) -> Option<&[i64]> {
        match self.attrs.get(name)? {
            DeserializedAttr::S64Vec(v) => Some(v),
            _ => None,
        }
    }

    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        match self.attrs.get(name)? {
            DeserializedAttr::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name)? {
            DeserializedAttr::Str(v) => Some(v),
            _ => None,
        }
    }
}
