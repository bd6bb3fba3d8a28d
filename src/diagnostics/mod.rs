//! Coded runtime diagnostics.
//!
//! This module provides:
//! - **Runtime diagnostics**: misuse and fallback reports with stable codes
//! - **Sinks**: observe diagnostics on the current thread
//! - **Strict mode**: optional panic-on-error for CI
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                         |
//! |-------|---------------------------------|
//! | SA0xx | Memory type selection           |
//! | SA1xx | Host exchange and mapping       |
//! | SA2xx | Queues and command resources    |
//! | SA4xx | Handles                         |
//! | SA9xx | Internal errors                 |

pub mod kind;
pub mod emit;
pub mod strict;
pub mod macros;

pub use kind::{Diagnostic, DiagnosticKind};
pub use emit::{emit, emit_with_context, suppress_diagnostics, set_thread_sink, DiagnosticSink, CollectingSink};
pub use strict::{StrictMode, set_strict_mode, strict_mode, StrictModeGuard, init_from_env};

pub use kind::{SA001, SA101, SA102, SA201, SA401, SA901};
