mod cluster;
mod result;
mod runtime;

pub use cluster::*;
pub use result::*;
pub use runtime::*;
