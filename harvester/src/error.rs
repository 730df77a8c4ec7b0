use thiserror::Error;

/// Errors raised by calls against the YouTube Data API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Quota exceeded for key: {0}")]
    QuotaExceeded(String),

    #[error("Ran out of quota for all available keys")]
    PoolExhausted,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// How the executor reacts to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The credential is out of quota. Switch keys and retry.
    QuotaExhausted,
    /// Network hiccup or a server-side transient status. Back off and retry.
    Transient,
    Fatal,
}

const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

impl ApiError {
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 403 {
            ApiError::QuotaExceeded(body)
        } else {
            ApiError::Http {
                status,
                message: body,
            }
        }
    }

    pub fn fault(&self) -> Fault {
        match self {
            ApiError::QuotaExceeded(_) => Fault::QuotaExhausted,
            ApiError::Network(_) => Fault::Transient,
            ApiError::Http { status, .. } if TRANSIENT_STATUSES.contains(status) => {
                Fault::Transient
            }
            _ => Fault::Fatal,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_is_quota_exhaustion() {
        let err = ApiError::from_status(403, "quotaExceeded".to_string());
        assert_eq!(err.fault(), Fault::QuotaExhausted);
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(
            ApiError::from_status(503, String::new()).fault(),
            Fault::Transient
        );
        assert_eq!(
            ApiError::Network("connection reset".into()).fault(),
            Fault::Transient
        );
    }

    #[test]
    fn client_errors_are_fatal() {
        assert_eq!(ApiError::from_status(404, String::new()).fault(), Fault::Fatal);
        assert_eq!(ApiError::PoolExhausted.fault(), Fault::Fatal);
        assert_eq!(ApiError::Parse("bad".into()).fault(), Fault::Fatal);
    }
}
