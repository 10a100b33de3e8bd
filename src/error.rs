use thiserror::Error;

/// Every failure an iterator can report, either at construction or as an
/// error item of its output stream.
#[derive(Error, Debug)]
pub enum IterateError {
    /// Malformed URI or query parameter.
    #[error("invalid {param}: {reason}")]
    Parse { param: String, reason: String },

    /// Missing or rejected credential.
    #[error("authentication failed for {uri}: {reason}")]
    Auth { uri: String, reason: String },

    /// Network, clone or API failure for one source.
    #[error("transport failure for {uri}: {reason}")]
    Transport { uri: String, reason: String },

    /// Content filter could not be evaluated for one document.
    #[error("failed to apply filters to {path}")]
    Filter {
        path: String,
        #[source]
        source: FilterError,
    },

    /// Content of one document could not be decoded.
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("no iterator registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("iterator for scheme '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("iterator has been closed")]
    Closed,
}

impl IterateError {
    pub fn parse(param: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            param: param.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// The uri or document path this error is scoped to, if any.
    pub fn scope(&self) -> Option<&str> {
        match self {
            Self::Auth { uri, .. } | Self::Transport { uri, .. } => Some(uri),
            Self::Filter { path, .. } | Self::Decode { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Failure while evaluating a content filter against one document body.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("failed to read document body")]
    Io(#[from] std::io::Error),

    #[error("document body is not valid JSON")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid rule '{0}'")]
    InvalidRule(String),

    #[error("invalid match mode '{0}'")]
    InvalidMode(String),
}

pub type Result<T, E = IterateError> = std::result::Result<T, E>;
