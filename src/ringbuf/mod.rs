//! Lock-free ring buffer used for the software kernel's queues

pub mod basic;


// Re-export main types for convenience
pub use basic::{Consumer, Producer, RingBuffer};
