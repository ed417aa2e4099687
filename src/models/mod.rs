mod completion;
mod plan;
mod provider;
mod usage;

pub use completion::*;
pub use plan::*;
pub use provider::*;
pub use usage::*;
