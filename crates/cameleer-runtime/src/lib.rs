//! The Cameleer engine.
//!
//! Owns queues, schedulers and tasks; on each schedule firing it resolves
//! the task's configuration, enforces admission, selects a queue and submits
//! a job, republishing queue transitions as a uniform work-event stream.

pub mod context_store;
pub mod control;
pub mod engine;
pub mod events;
pub mod host;
pub mod keepalive;
pub mod manager;

pub use context_store::StaticContextStore;
pub use control::Control;
pub use engine::{Cameleer, EngineError};
pub use events::{WorkEvent, WorkEventKind};
pub use host::{HostHooks, PanicLogHooks};
pub use manager::{LogManager, Manager, ManagerFactory};
