//! # parlor-settings
//!
//! Configuration management with layered sources for the Parlor server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ParlorSettings::default()`]
//! 2. **User file** — `~/.parlor/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `PARLOR_*` overrides (highest priority)
//!
//! The global singleton is initialized once at startup and readable from
//! anywhere via [`get_settings`].

#![deny(unsafe_code)]

pub mod loader;
pub mod types;

pub use loader::{Result, SettingsError, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::{Arc, RwLock};

/// Global settings singleton.
///
/// `RwLock<Option<Arc<..>>>` rather than `OnceLock` so tests (and a future
/// reload path) can swap the cached value. Reads are a shared lock plus an
/// `Arc::clone`.
static SETTINGS: RwLock<Option<Arc<ParlorSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads from `~/.parlor/settings.json` with env overrides;
/// on failure, falls back to compiled defaults. Returns an `Arc` so callers
/// hold a consistent snapshot.
pub fn get_settings() -> Arc<ParlorSettings> {
    {
        let guard = SETTINGS.read().expect("settings lock poisoned");
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    // Double-check after acquiring the write lock
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            ParlorSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Used by the binary after CLI
/// flags are applied, and by tests.
pub fn init_settings(settings: ParlorSettings) {
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(Arc::new(settings));
}
