use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to {operation}: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deadline of {0}ms exceeded")]
    Timeout(u64),

    #[error("Channel send error")]
    ChannelSend,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Caller-visible errors pass through as-is; anything raised by a
    /// collaborator is wrapped with the name of the operation that failed.
    pub fn context(self, operation: &'static str) -> Self {
        match self {
            Error::NotFound { .. }
            | Error::Conflict(_)
            | Error::InvalidState(_)
            | Error::Validation(_)
            | Error::Operation { .. } => self,
            other => Error::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }
}

/// Attaches an operation name to the error side of a result.
pub trait ResultExt<T> {
    fn context(self, operation: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_pass_through() {
        let err = Error::not_found("device", "dev-1").context("activate device");
        assert!(matches!(err, Error::NotFound { .. }));

        let err = Error::Conflict("dup".to_string()).context("register device");
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_infrastructure_errors_are_wrapped() {
        let err = Error::Notification("broker down".to_string()).context("record health check");
        assert_eq!(
            err.to_string(),
            "Failed to record health check: Notification error: broker down"
        );
        match err {
            Error::Operation { source, .. } => {
                assert!(matches!(*source, Error::Notification(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_context_is_not_applied_twice() {
        let err = Error::ChannelSend
            .context("process sensor data")
            .context("ingest batch");
        match err {
            Error::Operation { operation, .. } => assert_eq!(operation, "process sensor data"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
