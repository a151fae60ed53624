pub mod acquisition;
pub mod alert;
pub mod analysis;
pub mod annotate;
pub mod channel;
pub mod detect;
pub mod fps;
pub mod lifecycle;
pub mod source;
pub mod worker;

#[cfg(test)]
mod testing;

pub use lifecycle::{LifecycleManager, LifecycleState, PipelineSettings};
