pub mod backends;
pub mod config;
pub mod displacer;
pub mod dtype;
pub mod graph;
pub mod memory;
pub mod ref_primitive;

pub use backends::eval_backend::EvalBackend;
pub use backends::ndarray_backend::NDArrayNumericTensor;
pub use config::DisplacerConfig;
pub use displacer::{DisplaceError, DisplaceStatus, DisplacementEntry, PartitionDataDisplacer};
pub use graph::DeserializedGraph;
pub use memory::{Memory, MemoryDesc};
