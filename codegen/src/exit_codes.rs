//! Stable exit codes for `codegen` CLI commands.

use crate::error::SessionError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments or config, or a service/transport failure worth retrying.
pub const INVALID: i32 = 1;
/// The service reported a terminal generation failure or an unknown status.
pub const GENERATION_FAILED: i32 = 2;
/// Polling exhausted its attempt budget.
pub const TIMEOUT: i32 = 3;
/// The turn was cancelled (Ctrl-C).
pub const CANCELLED: i32 = 4;

/// Map a turn failure to its exit code.
pub fn for_error(err: &SessionError) -> i32 {
    match err {
        SessionError::GenerationFailed { .. } | SessionError::ProtocolError { .. } => {
            GENERATION_FAILED
        }
        SessionError::GenerationTimeout { .. } => TIMEOUT,
        SessionError::UploadFailed { .. }
        | SessionError::GenerationSubmitFailed { .. }
        | SessionError::StatusQueryFailed { .. }
        | SessionError::ArchiveFetchFailed { .. } => INVALID,
    }
}
