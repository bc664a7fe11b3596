use thiserror::Error;

use crate::call::CallState;
use crate::engine::CaptureError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("a call is already in progress")]
    AlreadyInCall,

    #[error("no call in progress")]
    NoActiveCall,

    #[error("offer from {sender} rejected while {state:?}")]
    OfferRejected { sender: String, state: CallState },

    #[error("answer not expected while {state:?}")]
    UnexpectedAnswer { state: CallState },

    /// The session an operation was started for has been torn down meanwhile.
    #[error("call was closed while the operation was in flight")]
    SessionClosed,

    #[error("failed to acquire local media: {0}")]
    Capture(#[from] CaptureError),

    #[error("failed to {step}: {source:#}")]
    Negotiation {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to send signaling message: {0:#}")]
    Signaling(#[source] anyhow::Error),

    #[error("failed to serialize signaling payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid call configuration: {0}")]
    Config(#[source] serde_json::Error),
}

impl Error {
    pub(crate) fn negotiation(step: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Negotiation { step, source }
    }
}
