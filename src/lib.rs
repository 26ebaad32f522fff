pub use analytics_blocking::*;
pub use analytics_core::*;
