//! Host failure hooks.
//!
//! Process-level handlers are wired through a small abstraction so the core
//! stays testable without touching a real process. The default installs a
//! panic hook that logs at error level and chains to the previous hook.

use std::sync::atomic::{AtomicBool, Ordering};

use cameleer_core::Logger;

/// Seam for process-global failure handlers.
pub trait HostHooks: Send + Sync {
    fn install(&self, logger: Logger);
    fn remove(&self);
}

/// Panic hook that logs unhandled host failures. A failure never tears the
/// engine down; it is reported and the previous hook runs.
pub struct PanicLogHooks {
    installed: AtomicBool,
}

impl PanicLogHooks {
    pub fn new() -> Self {
        Self {
            installed: AtomicBool::new(false),
        }
    }
}

impl Default for PanicLogHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl HostHooks for PanicLogHooks {
    fn install(&self, logger: Logger) {
        if self.installed.swap(true, Ordering::SeqCst) {
            return;
        }
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            logger.error(format!("unhandled host failure: {}", info));
            previous(info);
        }));
    }

    fn remove(&self) {
        if self.installed.swap(false, Ordering::SeqCst) {
            let _ = std::panic::take_hook();
        }
    }
}
