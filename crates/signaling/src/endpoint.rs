//! Aufloesung der Signalisierungs-URL aus einem Ticket

use klingel_auth::Ticket;
use url::Url;

use crate::error::{SignalingError, SignalingResult};

/// Host ohne bekannte Region
const STANDARD_HOST: &str = "api.prod.signalling.ring.com";

/// Endpunkt fuer Legacy-Tickets (Bearer-Token als Ticket)
const LEGACY_URL: &str = "wss://api.ring.com/connection/v2";

/// Bildet ein Ticket auf die WebSocket-URL ab
pub trait EndpointResolver: Send + Sync {
    fn aufloesen(&self, ticket: &Ticket) -> SignalingResult<String>;
}

/// Regionaler Endpunkt mit fester Client-ID pro Prozess
#[derive(Debug, Clone)]
pub struct RegionEndpoint {
    client_id: String,
}

impl RegionEndpoint {
    pub fn neu() -> Self {
        Self {
            client_id: format!("ring_site-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Default for RegionEndpoint {
    fn default() -> Self {
        Self::neu()
    }
}

impl EndpointResolver for RegionEndpoint {
    fn aufloesen(&self, ticket: &Ticket) -> SignalingResult<String> {
        if ticket.legacy {
            let url = Url::parse_with_params(LEGACY_URL, &[("auth", ticket.wert.as_str())])
                .map_err(|e| SignalingError::Endpunkt(e.to_string()))?;
            return Ok(url.into());
        }

        let host = match ticket.region.as_deref() {
            Some(region) => format!("api.{region}.prod.signalling.ring.devices.a2z.com"),
            None => STANDARD_HOST.to_string(),
        };
        let url = Url::parse_with_params(
            &format!("wss://{host}/ws"),
            &[
                ("api_version", "4.0"),
                ("auth_type", "ring_solutions"),
                ("client_id", self.client_id.as_str()),
                ("token", ticket.wert.as_str()),
            ],
        )
        .map_err(|e| SignalingError::Endpunkt(e.to_string()))?;
        Ok(url.into())
    }
}
