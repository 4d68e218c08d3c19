//! Queue primitives and the engine-facing wrapper.
//!
//! Two admission models exist: a parallel worker pool bounded by a
//! parallelism degree, and a cost-admitting single worker with a
//! capabilities budget. The wrapper adapts either to the engine: queues
//! start paused, expose run/done/failed/idle event streams, and report a
//! numeric load used by queue selection.

pub mod queue;
pub mod spec;
pub mod wrapper;

pub use queue::{JobQueue, QueueEvent, QueueKind};
pub use spec::QueueSpec;
pub use wrapper::CameleerQueue;
