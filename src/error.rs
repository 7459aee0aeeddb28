//! Request-level errors.
//!
//! Engine failures arrive as raw [`BackendError`]s and are classified here,
//! once, by the `From` impl; nothing downstream inspects engine message
//! strings. The request layer maps [`Error::status`] onto its responses.

use crate::imaging::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("no processor accepted the request")]
    Unsupported,
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("maximum resolution exceeded")]
    MaxResolutionExceeded,
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out")]
    Timeout,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unsupported,
    MaxResolutionExceeded,
    Cancelled,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Unsupported | Self::UnsupportedFormat => ErrorKind::Unsupported,
            Self::MaxResolutionExceeded => ErrorKind::MaxResolutionExceeded,
            Self::Cancelled | Self::Timeout => ErrorKind::Cancelled,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code for the request layer.
    pub fn status(&self) -> u16 {
        match self {
            Self::Timeout => 408,
            _ => match self.kind() {
                ErrorKind::NotFound => 404,
                ErrorKind::Unsupported => 406,
                ErrorKind::MaxResolutionExceeded => 422,
                ErrorKind::Cancelled => 499,
                ErrorKind::Internal => 500,
            },
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Io(e) => Self::Io(e),
            BackendError::LimitExceeded(_) => Self::MaxResolutionExceeded,
            failed @ BackendError::Failed { .. } => {
                let msg = failed.to_string();
                let msg = msg.trim();
                if is_unknown_format(msg) {
                    Self::UnsupportedFormat
                } else {
                    Self::Internal(msg.to_string())
                }
            }
        }
    }
}

/// Matches `"<LoaderTag>: ... is not in a known format"`.
fn is_unknown_format(msg: &str) -> bool {
    let Some((tag, rest)) = msg.split_once(':') else {
        return false;
    };
    !tag.is_empty()
        && !tag.contains(char::is_whitespace)
        && tag.ends_with("Load")
        && rest.trim_end().ends_with("is not in a known format")
}
