//! Strict mode handling for diagnostics.
//!
//! - Warn: just emit the diagnostic
//! - PanicOnError / PanicOnWarning: emit and then panic (useful for CI)
//!
//! The process-wide mode comes from [`set_strict_mode`] or the
//! `STAGEARRAY_STRICT` environment variable. A [`StrictModeGuard`]
//! overrides it for the current thread only.

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable read by [`init_from_env`].
pub const STRICT_ENV: &str = "STAGEARRAY_STRICT";

/// Strict mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StrictMode {
    /// Just warn, don't panic.
    Warn = 0,
    /// Panic on errors.
    PanicOnError = 1,
    /// Panic on errors and warnings.
    PanicOnWarning = 2,
}

impl StrictMode {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => StrictMode::PanicOnError,
            2 => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }

    /// Parse an environment value; unknown values mean `Warn`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "error" | "true" => StrictMode::PanicOnError,
            "2" | "warning" | "all" => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }
}

static GLOBAL_MODE: AtomicU8 = AtomicU8::new(StrictMode::Warn as u8);

thread_local! {
    static THREAD_MODE: Cell<Option<StrictMode>> = Cell::new(None);
}

/// Set the process-wide strict mode.
pub fn set_strict_mode(mode: StrictMode) {
    GLOBAL_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Strict mode in effect on the current thread.
pub fn strict_mode() -> StrictMode {
    THREAD_MODE
        .with(Cell::get)
        .unwrap_or_else(|| StrictMode::from_raw(GLOBAL_MODE.load(Ordering::Relaxed)))
}

/// Check if errors should panic.
pub fn should_panic() -> bool {
    matches!(strict_mode(), StrictMode::PanicOnError | StrictMode::PanicOnWarning)
}

/// Check if warnings should panic.
pub fn should_panic_on_warning() -> bool {
    strict_mode() == StrictMode::PanicOnWarning
}

/// Initialize the process-wide mode from `STAGEARRAY_STRICT`.
pub fn init_from_env() {
    if let Ok(value) = std::env::var(STRICT_ENV) {
        set_strict_mode(StrictMode::parse(&value));
    }
}

/// RAII guard overriding strict mode on the current thread.
pub struct StrictModeGuard {
    previous: Option<StrictMode>,
}

impl StrictModeGuard {
    /// Override strict mode until the guard drops.
    pub fn new(mode: StrictMode) -> Self {
        let previous = THREAD_MODE.with(|cell| cell.replace(Some(mode)));
        Self { previous }
    }

    /// Create a guard that enables panic-on-error.
    pub fn panic_on_error() -> Self {
        Self::new(StrictMode::PanicOnError)
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        THREAD_MODE.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(StrictMode::parse("error"), StrictMode::PanicOnError);
        assert_eq!(StrictMode::parse(" 2 "), StrictMode::PanicOnWarning);
        assert_eq!(StrictMode::parse("nope"), StrictMode::Warn);
    }

    #[test]
    fn test_guard_is_thread_local_and_restores() {
        {
            let _guard = StrictModeGuard::panic_on_error();
            assert!(should_panic());
            assert!(!should_panic_on_warning());

            let other = std::thread::spawn(should_panic).join().unwrap();
            assert!(!other);
        }
        assert_eq!(strict_mode(), StrictMode::Warn);
    }

    #[test]
    #[should_panic(expected = "SA901")]
    fn test_strict_error_panics() {
        let _guard = StrictModeGuard::panic_on_error();
        crate::diagnostics::emit(&crate::diagnostics::SA901);
    }
}
