use thiserror::Error;

/// Errors produced by a call attempt.
///
/// The first four variants are fatal to the attempt: the manager surfaces
/// their [`reason`](CallError::reason) in the error slot and tears the call
/// down. `AlreadyActive` and `Cancelled` leave the error slot untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("credential error: {0}")]
    Credential(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("a call attempt is already in progress")]
    AlreadyActive,

    #[error("call attempt was cancelled")]
    Cancelled,
}

impl CallError {
    /// The human-readable message without the kind prefix.
    ///
    /// Signaling failures carry the endpoint's response body verbatim.
    pub fn reason(&self) -> String {
        match self {
            Self::Credential(reason)
            | Self::Device(reason)
            | Self::Signaling(reason)
            | Self::Negotiation(reason) => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Returns `true` for failures that end the attempt in `Error`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadyActive | Self::Cancelled)
    }
}

/// Errors raised by a media backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("capture device unavailable: {0}")]
    Device(String),

    #[error("peer transport error: {0}")]
    Transport(String),

    #[error("invalid session description: {0}")]
    Description(String),

    #[error("event channel error: {0}")]
    Channel(String),

    #[error("media session already released")]
    Released,
}
