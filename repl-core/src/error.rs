use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplError {
    #[error("Cache storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Failure to hand a relayed message to the host transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no receiver attached")]
    NoReceiver,

    #[error("transport closed")]
    Closed,

    #[error("transport rejected message: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ReplError::StorageUnavailable("quota".to_string());
        assert_eq!(err.to_string(), "Cache storage unavailable: quota");

        let err = ReplError::InvalidRequest("bad url".to_string());
        assert_eq!(err.to_string(), "Invalid request: bad url");

        assert_eq!(DeliveryError::NoReceiver.to_string(), "no receiver attached");
    }
}
