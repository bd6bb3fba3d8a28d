//! Diagnostic kinds and core types.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - something is definitely wrong.
    Error,
    /// A warning - something is probably wrong or suboptimal.
    Warning,
    /// Additional context about another diagnostic.
    Note,
    /// Actionable suggestion to fix the issue.
    Help,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
            DiagnosticKind::Help => "help",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `SA0xx` - Memory type selection
/// - `SA1xx` - Host exchange and mapping
/// - `SA2xx` - Queues and command resources
/// - `SA4xx` - Handles
/// - `SA9xx` - Internal errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "SA001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (SA0xx - Memory type selection)
// =============================================================================

/// SA001: Requested memory kind unavailable, a fallback kind was used.
pub const SA001: Diagnostic = Diagnostic::warning(
    "SA001",
    "requested memory kind unavailable, falling back"
).with_note("no eligible memory type had the requested flags, or the allocation ran out of memory")
 .with_help("check is_host_visible() on the array if the transfer path matters");

// =============================================================================
// Predefined diagnostics (SA1xx - Host exchange)
// =============================================================================

/// SA101: Host exchange with an offset past the end of the array.
pub const SA101: Diagnostic = Diagnostic::warning(
    "SA101",
    "host exchange offset is past the end of the array, nothing copied"
).with_note("offsets >= len() are accepted as a no-op")
 .with_help("clamp the offset before calling, or check len() first");

/// SA102: Flushing host writes failed while a mapping was released.
pub const SA102: Diagnostic = Diagnostic::error(
    "SA102",
    "flushing host writes failed while releasing a mapping"
).with_note("the device may not observe the last host writes")
 .with_help("call commit() on the view to handle flush errors explicitly");

// =============================================================================
// Predefined diagnostics (SA2xx - Queues)
// =============================================================================

/// SA201: No transfer queue family, compute family reused.
pub const SA201: Diagnostic = Diagnostic::warning(
    "SA201",
    "no queue family supports transfers, using the compute family"
).with_note("compute and transfer commands share one pool and command buffer");

// =============================================================================
// Predefined diagnostics (SA4xx - Handles)
// =============================================================================

/// SA401: Stale or unknown device handle.
pub const SA401: Diagnostic = Diagnostic::error(
    "SA401",
    "device handle is stale or unknown"
).with_note("the handle's generation doesn't match, indicating it was destroyed")
 .with_help("make sure every array is dropped before its device");

// =============================================================================
// Predefined diagnostics (SA9xx - Internal)
// =============================================================================

/// SA901: Internal error.
pub const SA901: Diagnostic = Diagnostic::error(
    "SA901",
    "internal error"
).with_note("this indicates a bug in stagearray")
 .with_help("please report this issue at the stagearray repository");
