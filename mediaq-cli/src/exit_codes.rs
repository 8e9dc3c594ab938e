//! Exit codes following sysexits.h conventions.
//!
//! Scripts driving the queue can tell a busy queue (retry later) apart from
//! a missing input or a broken queue directory.

use mediaq_core::QueueError;

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments, duplicate request id).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Upload service unavailable or not configured.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// I/O error in the queue directory.
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Manifest lock held by someone else; the command can be retried.
/// Maps to EX_TEMPFAIL from sysexits.h.
pub const TEMP_FAIL: i32 = 75;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Typed queue errors first, then classify by message
        let code = match err.chain().find_map(|e| e.downcast_ref::<QueueError>()) {
            Some(queue_err) => Self::classify(queue_err),
            None if message.contains("Failed to read file") => INPUT_ERROR,
            None if message.contains("Invalid media type") => USAGE_ERROR,
            None => GENERAL_ERROR,
        };

        Self {
            code,
            message: Some(message),
        }
    }

    fn classify(err: &QueueError) -> i32 {
        match err {
            QueueError::SourceMissing(_) => INPUT_ERROR,
            QueueError::DuplicateRequest(_) => USAGE_ERROR,
            QueueError::LockTimeout(_) => TEMP_FAIL,
            QueueError::Io { .. } | QueueError::Serialization(_) | QueueError::InvalidManifest(_) => {
                IO_ERROR
            }
            QueueError::WorkerStopped => GENERAL_ERROR,
            // Config, Upload and transport errors
            _ => UNAVAILABLE,
        }
    }
}
