pub mod domain;
mod edge_module;
pub mod mqtt;

pub use edge_module::*;
