use serde::{Deserialize, Deserializer, Serialize};
use wasm_call_protocol::ClientId;

use crate::constants::DEFAULT_STUN_SERVER;

/// `urls` of an ICE server entry may be a single string or a list.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let urls: &[String] = match self {
            Self::One(url) => std::slice::from_ref(url),
            Self::Many(urls) => urls,
        };
        urls.iter().map(String::as_str)
    }
}

/// One entry of `RTCConfiguration.iceServers`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    #[must_use]
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }
}

/// Specifies what kind of peer connection to create
#[derive(Debug, Clone)]
pub enum ConnectionType {
    /// Within local network
    Local,
    /// Setup with STUN server, WAN capabilities but can fail
    Stun { urls: String },
    /// Setup with STUN and TURN servers, will fallback to TURN if needed, most stable connection
    StunAndTurn {
        stun_urls: String,
        turn_urls: String,
        username: String,
        credential: String,
    },
}

impl ConnectionType {
    #[must_use]
    pub fn ice_servers(&self) -> Vec<IceServer> {
        match self {
            Self::Local => Vec::new(),
            Self::Stun { urls } => vec![IceServer::stun(urls.as_str())],
            Self::StunAndTurn {
                stun_urls,
                turn_urls,
                username,
                credential,
            } => vec![
                IceServer::stun(stun_urls.as_str()),
                IceServer {
                    urls: IceUrls::One(turn_urls.clone()),
                    username: Some(username.clone()),
                    credential: Some(credential.clone()),
                },
            ],
        }
    }
}

/// Constraint set passed to `getUserMedia`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Bootstrap document the page is served with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    #[serde(rename = "ClientId")]
    pub client_id: ClientId,
    /// Opaque to this crate; only the signaling server interprets it.
    #[serde(rename = "signalToken", default)]
    pub signal_token: String,
    #[serde(rename = "signalingUrl")]
    pub signaling_url: String,
    /// `None` when the document lists no servers. `Some` of an empty list means none
    /// at all, as for [`ConnectionType::Local`].
    #[serde(
        rename = "servers",
        default,
        deserialize_with = "non_empty_servers",
        skip_serializing_if = "Option::is_none"
    )]
    pub ice_servers: Option<Vec<IceServer>>,
    #[serde(rename = "mediaConstraints", default)]
    pub media_constraints: MediaConstraints,
}

impl CallConfig {
    #[must_use]
    pub fn new(client_id: ClientId, signaling_url: impl Into<String>) -> Self {
        Self {
            client_id,
            signal_token: String::new(),
            signaling_url: signaling_url.into(),
            ice_servers: None,
            media_constraints: MediaConstraints::default(),
        }
    }

    /// # Errors
    /// Fails if `json` is not a valid bootstrap document.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(crate::Error::Config)
    }

    #[must_use]
    pub fn with_connection_type(mut self, connection_type: &ConnectionType) -> Self {
        self.ice_servers = Some(connection_type.ice_servers());
        self
    }

    /// Servers to configure peer connections with, falling back to a public STUN server
    /// when none were configured.
    #[must_use]
    pub fn effective_ice_servers(&self) -> Vec<IceServer> {
        match &self.ice_servers {
            Some(servers) => servers.clone(),
            None => vec![IceServer::stun(DEFAULT_STUN_SERVER)],
        }
    }
}

fn non_empty_servers<'de, D>(deserializer: D) -> Result<Option<Vec<IceServer>>, D::Error>
where
    D: Deserializer<'de>,
{
    let servers = Option::<Vec<IceServer>>::deserialize(deserializer)?;
    Ok(servers.filter(|servers| !servers.is_empty()))
}
