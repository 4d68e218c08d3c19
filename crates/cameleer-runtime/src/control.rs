//! Control surface seam.
//!
//! Controls are attached to a running engine and torn down on shutdown. The
//! concrete surfaces (stdin line protocol, HTTP GET endpoint) live outside
//! the engine crate; the engine only knows how to stop them.

use async_trait::async_trait;

/// Registry root for control kinds.
pub const CONTROL_ROOT: &str = "Control";

/// A control endpoint feeding commands into the engine.
#[async_trait]
pub trait Control: Send + Sync {
    fn name(&self) -> &str;

    /// Stop accepting commands and release resources.
    async fn teardown(&self);
}
