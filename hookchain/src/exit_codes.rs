//! Stable exit codes for hookchain CLI commands.

/// Run completed, config written, or reply satisfied its contract.
pub const OK: i32 = 0;
/// Invalid seed/config/reply or any other error.
pub const INVALID: i32 = 1;
/// A stage exhausted its attempts and the fallback text was returned.
pub const ABORTED: i32 = 3;
