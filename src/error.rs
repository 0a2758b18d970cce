use thiserror::Error;

/// Raised while merging a host profile with per-invocation overrides.
/// Always surfaced before any connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("invalid override {flag}: {reason}")]
    InvalidOverride { flag: String, reason: String },

    #[error("no value for required field `{0}`")]
    MissingField(&'static str),

    #[error("no host matches '{0}'")]
    NoMatchingHost(String),

    #[error("'{query}' matches several hosts: {}", candidates.join(", "))]
    AmbiguousHost {
        query: String,
        candidates: Vec<String>,
    },
}

impl ResolutionError {
    pub fn invalid(flag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOverride {
            flag: flag.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to establish a session. Never retried at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("authentication failed for {target}: {detail}")]
    AuthFailure { target: String, detail: String },

    #[error("{target} is unreachable: {detail}")]
    Unreachable { target: String, detail: String },

    #[error("timed out connecting to {target} after {secs}s")]
    Timeout { target: String, secs: u64 },

    #[error("proxy jump through {hop} failed: {detail}")]
    ProxyChainFailure { hop: String, detail: String },

    #[error("could not run ssh: {0}")]
    Spawn(String),
}

/// Per-file failure inside a transfer job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferTaskError {
    #[error("{0}: no such file or directory")]
    NotFound(String),

    #[error("{0}: permission denied")]
    PermissionDenied(String),

    #[error("{0}: is a directory")]
    IsDirectory(String),

    #[error("{0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,

    #[error("session lost")]
    SessionLost,
}

impl TransferTaskError {
    /// Wrap a local I/O error, keeping the path that caused it.
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            _ => Self::Io(format!("{}: {}", path, err)),
        }
    }

    /// Whether an immediate retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::Io(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("host name must not be empty")]
    EmptyName,

    #[error("host '{0}' already exists")]
    DuplicateHost(String),

    #[error("host '{0}' not found")]
    HostNotFound(String),

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("folder '{0}' does not exist")]
    UnknownFolder(String),

    #[error("folder '{0}' already exists")]
    DuplicateFolder(String),

    #[error("folder '{0}' not found")]
    FolderNotFound(String),
}
