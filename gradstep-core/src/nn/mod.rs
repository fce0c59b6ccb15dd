// src/nn/mod.rs
// Model-side handles the optimizer works against.

pub mod init;
pub mod parameter;

pub use init::Initializer;
pub use parameter::{ParamAttr, ParamId, Parameter};
