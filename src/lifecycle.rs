//! Reference-counted startup/shutdown of a shared imaging engine.
//!
//! Native engines are initialized once per process, but a server may build
//! several processors on top of one. Each processor calls
//! [`EngineLifecycle::acquire`] from its `startup` and
//! [`EngineLifecycle::release`] from its `shutdown`; only the first acquire
//! and the last release reach the engine.
//!
//! ```text
//! count: 0 ──acquire──▶ 1 ──acquire──▶ 2 ──release──▶ 1 ──release──▶ 0
//!           engine.startup                              engine.shutdown
//! ```

use crate::error::Error;
use crate::imaging::{EngineConfig, ImageEngine};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct EngineLifecycle<E> {
    engine: E,
    active: Mutex<usize>,
}

impl<E: ImageEngine> EngineLifecycle<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            active: Mutex::new(0),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Number of outstanding acquires.
    pub fn active(&self) -> usize {
        *self.lock()
    }

    /// Take a reference; the 0→1 transition starts the engine with `config`.
    ///
    /// If the engine fails to start, the count is left at zero so the next
    /// acquire tries again.
    pub fn acquire(&self, config: &EngineConfig) -> Result<(), Error> {
        let mut active = self.lock();
        *active += 1;
        if *active > 1 {
            return Ok(());
        }
        if let Err(e) = self.engine.startup(config) {
            *active = 0;
            return Err(e.into());
        }
        log::info!(
            "imaging engine started (concurrency {}, log level {})",
            config.concurrency,
            config.log_level
        );
        Ok(())
    }

    /// Drop a reference; the 1→0 transition shuts the engine down.
    /// Releasing at zero does nothing.
    pub fn release(&self) {
        let mut active = self.lock();
        if *active == 0 {
            return;
        }
        *active -= 1;
        if *active == 0 {
            self.engine.shutdown();
            log::info!("imaging engine shut down");
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
