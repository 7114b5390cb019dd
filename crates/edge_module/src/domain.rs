mod edge_module_config;
mod envelope_processor;
mod invocation_dispatcher;
mod staleness_filter;
mod twin_reconciler;

pub use edge_module_config::*;
pub use envelope_processor::*;
pub use invocation_dispatcher::*;
pub use staleness_filter::*;
pub use twin_reconciler::*;
