//! Coordination for driving a ring from several threads
//!
//! - `notify`: eventfd doorbells between the ring owner and the kernel side
//! - `state`: named counters and flags, on the heap or in a shared mapping
//! - `coordinator`: critical section, latches and participant threads
//! - `affinity`: CPU pinning
//! - `shared_ring`: a ring shared under a coordinator with one designated
//!   completion waiter

pub mod affinity;
pub mod coordinator;
pub mod notify;
pub mod shared_ring;
pub mod state;

pub use affinity::{current_affinity, pin_current_thread};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use notify::{EventNotifier, NotificationStats};
pub use shared_ring::{DesignatedWaiter, SharedRing};
pub use state::{SharedState, SlotKind, StateBacking};
