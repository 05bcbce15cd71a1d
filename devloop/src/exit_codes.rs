//! Stable exit codes for devloop CLI commands.

/// Command succeeded, or `generate` produced a published service.
pub const OK: i32 = 0;
/// Invalid arguments, config, or filesystem state, and any other error.
pub const INVALID: i32 = 1;
/// `generate` tried every strategy without a published service.
pub const EXHAUSTED: i32 = 2;
/// `generate` gave up on the oracle or build system after its retries.
pub const TRANSPORT: i32 = 3;
