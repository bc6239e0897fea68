use std::fmt::Display;

/// How the scheduler must react to an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credentials rejected by the device.
    Auth,
    /// TLS certificate verification failed.
    Certificate,
    /// Network failure, timeout or unexpected HTTP status.
    Transport,
    /// The device answered with an error envelope.
    Device,
    /// The response did not have the expected shape.
    Decode,
    /// The request was aborted because its tick was cancelled.
    Cancelled,
    /// A poll task panicked.
    Panicked,
}

impl ErrorKind {
    /// Fatal kinds cannot heal by retrying with the same configuration.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Auth | ErrorKind::Certificate)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Certificate => "certificate",
            ErrorKind::Transport => "transport",
            ErrorKind::Device => "device",
            ErrorKind::Decode => "decode",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Panicked => "panicked",
        };
        write!(f, "{}", s)
    }
}

/// Error returned by the device API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("authentication rejected by the device: {0}")]
    Auth(String),

    #[error("TLS certificate verification failed: {0}")]
    Certificate(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("device error for {service}/{method}: {description}")]
    Device {
        service: String,
        method: String,
        description: String,
    },

    #[error("failed to decode response of {context}: {reason}")]
    Decode { context: String, reason: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Auth(_) => ErrorKind::Auth,
            ClientError::Certificate(_) => ErrorKind::Certificate,
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::Device { .. } => ErrorKind::Device,
            ClientError::Decode { .. } => ErrorKind::Decode,
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::Panicked(_) => ErrorKind::Panicked,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    pub fn decode(context: impl Into<String>, reason: impl Display) -> Self {
        ClientError::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// A failed poll, tagged with the task that produced it.
#[derive(Debug, thiserror::Error)]
#[error("{task}: {source}")]
pub struct PollError {
    pub task: &'static str,
    #[source]
    pub source: ClientError,
}

impl PollError {
    pub fn new(task: &'static str, source: ClientError) -> Self {
        Self { task, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    pub fn is_fatal(&self) -> bool {
        self.source.is_fatal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ClientError::Auth("bad password".into()).is_fatal());
        assert!(ClientError::Certificate("unknown issuer".into()).is_fatal());

        assert!(!ClientError::Transport("timeout".into()).is_fatal());
        assert!(!ClientError::decode("DeviceInfo/get", "missing field").is_fatal());
        assert!(!ClientError::Cancelled.is_fatal());
        assert!(!ClientError::Panicked("decoder bug".into()).is_fatal());
        assert!(!ClientError::Device {
            service: "HomeLan".into(),
            method: "getWANCounters".into(),
            description: "Function not found".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_poll_error_carries_task_name() {
        let err = PollError::new("WANMbits", ClientError::Auth("bad password".into()));
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("WANMbits: "));
    }
}
