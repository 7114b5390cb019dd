mod envelope;
mod invocation;
mod result;
mod transport;
mod twin;

pub use envelope::*;
pub use invocation::*;
pub use result::*;
pub use transport::*;
pub use twin::*;
