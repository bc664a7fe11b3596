/*!
Documents carried inside `messagePayload`, shaped like the browser's
`RTCSessionDescription.toJSON()` and `RTCIceCandidate.toJSON()`.
*/

use serde::{Deserialize, Serialize};

/// Role of a session description in the offer/answer exchange.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Proposal of the calling side
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer of the called side
    Answer,
    /// Roll back the last description that was set
    Rollback,
}

/// `SDP` document together with its role, passed between peers without modification.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer, answer, ...
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw `SDP` text
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    /// Offer wrapping the given `SDP` text
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer wrapping the given `SDP` text
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network path discovered by one side's ICE agent, relayed to the other side.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// `candidate:` attribute line
    pub candidate: String,
    /// Media stream identification tag the candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    /// ICE ufrag the candidate was gathered under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate line without media section identification
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}
