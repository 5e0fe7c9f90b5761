//! Process-wide convenience handle.
//!
//! The pool is always constructed explicitly by the application's
//! composition root. Code that cannot be handed the pool (signal handlers,
//! deeply nested callbacks) may reach it here once it has been installed.

use crate::DispatchPool;
use std::sync::OnceLock;

static SHARED_POOL: OnceLock<DispatchPool> = OnceLock::new();

/// Install `pool` as the shared instance.
///
/// Returns the pool back if one was already installed.
pub fn install(pool: DispatchPool) -> Result<(), DispatchPool> {
    SHARED_POOL.set(pool)
}

/// The shared pool, if one has been installed.
pub fn get() -> Option<&'static DispatchPool> {
    SHARED_POOL.get()
}
