/*!
Helper crate that declares the wire format spoken between [wasm-call](../wasm_call/index.html)
clients and the relaying signaling server.

Every frame is a JSON [`Envelope`] whose `messagePayload` carries a base64 encoded JSON
document: either a [`SessionDescription`] (offers and answers) or an [`IceCandidate`].
*/

#![warn(missing_docs)]

use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod blob;
pub mod envelope;
pub mod payload;

pub use envelope::{decode, encode, encode_payload, Envelope, MessageKind, ParseFailure};
pub use payload::{IceCandidate, SdpType, SessionDescription};

/// Identifier the signaling server assigns to each connected client.
/// Used as the recipient of outbound frames and reported as the sender of inbound ones.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap String into a `ClientId` `struct`
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underling string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for ClientId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
