//! Domain error types.

/// Classified failure of one remote quote-service request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("quote service rejected request: credentials missing")]
    AuthMissing,

    #[error("quote service rejected request: account invalid")]
    AccountInvalid,

    #[error("quote service rejected request: account expired")]
    AccountExpired,

    #[error("quote service rejected request: wrong password")]
    BadPassword,

    #[error("quote service internal error: {reason}")]
    Server { reason: String },

    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    #[error("unexpected status {status}: {reason}")]
    Status { status: u16, reason: String },
}

impl RemoteError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Server { .. } | RemoteError::Network { .. } | RemoteError::Timeout { .. }
        )
    }
}

/// Failure of an immediate order submission or a live feed update.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("no price available at cursor {cursor}")]
    PriceUnavailable { cursor: usize },

    #[error("limit order requires a finite price")]
    MissingLimitPrice,

    #[error("order volume must be positive, got {volume}")]
    InvalidVolume { volume: i64 },

    #[error("observation at {timestamp} is not after the last one ({last})")]
    OutOfOrder {
        timestamp: chrono::NaiveDateTime,
        last: chrono::NaiveDateTime,
    },
}

/// Top-level error type for futquant.
#[derive(Debug, thiserror::Error)]
pub enum FutquantError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("quote service credentials are required")]
    MissingCredentials,

    #[error("invalid period '{value}'")]
    InvalidPeriod { value: String },

    #[error("invalid adjustment '{value}'")]
    InvalidAdjustment { value: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("cache for {table} is unreadable: {reason}")]
    CacheCorrupt { table: String, reason: String },

    #[error("cannot read {path}: {reason}")]
    DataFile { path: String, reason: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FutquantError {
    /// Configuration errors are the only ones the reconciler surfaces to callers.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FutquantError::ConfigParse { .. }
                | FutquantError::ConfigMissing { .. }
                | FutquantError::ConfigInvalid { .. }
                | FutquantError::MissingCredentials
                | FutquantError::InvalidPeriod { .. }
                | FutquantError::InvalidAdjustment { .. }
        )
    }
}

impl From<&FutquantError> for std::process::ExitCode {
    fn from(err: &FutquantError) -> Self {
        let code: u8 = match err {
            FutquantError::Io(_) | FutquantError::DataFile { .. } => 1,
            FutquantError::ConfigParse { .. }
            | FutquantError::ConfigMissing { .. }
            | FutquantError::ConfigInvalid { .. }
            | FutquantError::MissingCredentials
            | FutquantError::InvalidPeriod { .. }
            | FutquantError::InvalidAdjustment { .. } => 2,
            FutquantError::Database { .. }
            | FutquantError::DatabaseQuery { .. }
            | FutquantError::CacheCorrupt { .. } => 3,
            FutquantError::Remote(_) => 4,
        };
        std::process::ExitCode::from(code)
    }
}
