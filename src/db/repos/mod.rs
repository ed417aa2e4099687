mod plans;
mod providers;
mod usage;

pub use plans::*;
pub use providers::*;
pub use usage::*;
