use std::path::PathBuf;

/// The base error type the spec calls `CdistError`: anything surfaced to an
/// operator. Every fallible core operation returns `Result<_, CdistError>`;
/// binaries collapse this into the exit codes from the external-interfaces
/// contract (0 success, 1 `CdistError`, 2 interrupted).
#[derive(thiserror::Error, Debug)]
pub enum CdistError {
    #[error("conflicting tag options: {0}")]
    ConflictingTags(String),

    #[error("illegal object id '{object_id}': {message}")]
    IllegalObjectId { object_id: String, message: String },

    #[error("the required environment variable '{0}' is not defined")]
    MissingRequiredEnvironmentVariable(String),

    #[error("requirement pattern matched no objects: {0}")]
    RequirementNotFound(String),

    #[error("circular reference detected, involving at least: {0}")]
    CircularReference(String),

    #[error(
        "object '{object}' was redefined with different parameters (first defined from {first_manifest}, redefined from {second_manifest})"
    )]
    ConflictingObject {
        object: String,
        first_manifest: String,
        second_manifest: String,
    },

    #[error("command {cmd:?} failed with exit code {code:?}")]
    ExecFailed {
        cmd: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    #[error("command {cmd:?} timed out after {timeout_secs}s")]
    TimeoutExpired {
        cmd: Vec<String>,
        timeout_secs: u64,
        partial_stdout: Vec<u8>,
    },

    #[error("type '{0}' not found under conf/type")]
    TypeNotFound(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid target url '{0}': {1}")]
    InvalidTargetUrl(String, String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CdistError>;

impl CdistError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> CdistError {
        CdistError::Io {
            path: path.into(),
            source,
        }
    }

    /// The exit code a `CdistError` maps to when it escapes to a binary's `main`.
    /// Interruption (SIGINT/KeyboardInterrupt) is handled separately and is not
    /// representable as a `CdistError` variant; see `cdist-emulator`'s main.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
