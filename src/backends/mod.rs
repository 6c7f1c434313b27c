pub mod eval_backend;
pub mod ndarray_backend;
