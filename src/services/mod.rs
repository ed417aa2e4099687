//! Request orchestration: the generation executor and the gateway facade.

mod fallback;
mod gateway;
mod generation;

pub use gateway::Gateway;
pub use generation::{CANCELLED_BY_CONSUMER, GenerationExecutor, GenerationStream};
