use std::fmt;

/// Error kinds surfaced by the filesystem.
///
/// Every variant except `Backend` is part of the public contract and has a
/// stable code (see [`Error::code`]). `Backend` carries raw failures from
/// fjall, the local disk or the record codec; the facade replaces it with
/// `DefaultServerError` before it reaches a caller.
#[derive(Debug)]
pub enum Error {
    NotImplemented(&'static str),
    InvalidResource(String),
    ResourceExists(String),
    ResourceNotFound(String),
    InvalidResourceType(String),
    RequestDataTooLarge { size: usize, limit: usize },
    InvalidAction(String),
    InvalidParameters(String),
    InvalidConfig(String),
    DefaultServerError(String),
    Backend(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotImplemented(_) => "NOT_IMPLEMENTED",
            Error::InvalidResource(_) => "INVALID_RESOURCE",
            Error::ResourceExists(_) => "RESOURCE_EXISTS",
            Error::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            Error::InvalidResourceType(_) => "INVALID_RESOURCE_TYPE",
            Error::RequestDataTooLarge { .. } => "REQUEST_DATA_TOO_LARGE",
            Error::InvalidAction(_) => "INVALID_ACTION",
            Error::InvalidParameters(_) => "INVALID_PARAMETERS",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::DefaultServerError(_) | Error::Backend(_) => "DEFAULT_SERVER_ERROR",
        }
    }

    /// Replaces backend detail with a generic server error.
    pub(crate) fn sanitize(self) -> Self {
        match self {
            Error::Backend(detail) => {
                tracing::error!(error = %detail, "backend failure");
                Error::DefaultServerError("internal storage error".to_string())
            }
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotImplemented(op) => write!(f, "{}: {} is not implemented", self.code(), op),
            Error::RequestDataTooLarge { size, limit } => write!(
                f,
                "{}: {} bytes exceeds the limit of {} bytes",
                self.code(),
                size,
                limit
            ),
            Error::InvalidResource(msg)
            | Error::ResourceExists(msg)
            | Error::ResourceNotFound(msg)
            | Error::InvalidResourceType(msg)
            | Error::InvalidAction(msg)
            | Error::InvalidParameters(msg)
            | Error::InvalidConfig(msg)
            | Error::DefaultServerError(msg)
            | Error::Backend(msg) => write!(f, "{}: {}", self.code(), msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<fjall::Error> for Error {
    fn from(err: fjall::Error) -> Self {
        Error::Backend(format!("metadata store: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Backend(format!("io: {err}"))
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Backend(format!("record encode: {err}"))
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Backend(format!("record decode: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Backend(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_hides_backend_detail() {
        let err = Error::Backend("partition _FILES is corrupt".to_string()).sanitize();
        assert!(matches!(err, Error::DefaultServerError(_)));
        assert!(!err.to_string().contains("_FILES"));
    }

    #[test]
    fn sanitize_keeps_contract_errors() {
        let err = Error::ResourceExists("a.txt".to_string()).sanitize();
        assert_eq!(err.code(), "RESOURCE_EXISTS");
    }
}
