//! klingel-signaling – Signalisierung und Session-Lebenszyklus
//!
//! Dieser Crate baut eine Live-View-Session zu genau einem Geraet auf:
//! Ticket holen, WebSocket zum regionalen Endpunkt oeffnen, SDP und
//! ICE-Kandidaten austauschen, die Verbindung mit Keepalives halten und
//! bei Stoerungen mit Backoff neu verbinden.
//!
//! ## Architektur
//!
//! ```text
//! LiveSession (start / stop / zustand)
//!     |
//!     v
//! Session-Task (einziger Schreiber von ConnectionState)
//!     |  Idle -> Connecting -> Negotiating -> Active -> Closing -> Closed
//!     |                ^                        |
//!     |                +------ Degraded <-------+      (ReconnectPolicy)
//!     |
//!     +-- TicketManager        (Ticket-Cache, periodische Erneuerung)
//!     +-- EndpointResolver     (Ticket -> WebSocket-URL)
//!     +-- SignalingChannel     (JSON-Nachrichten ueber WebSocket)
//!     +-- negotiate()          (Offer, Answer, Kandidaten, Medienstart)
//!     +-- SessionMonitor       (Keepalive, Transport, Remote-Close)
//! ```

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod monitor;
pub mod negotiation;
pub mod reconnect;
pub mod session;

// Bequeme Re-Exporte
pub use channel::{Connector, SignalingChannel, TransportKanaele, WsConnector, SUBPROTOKOLL};
pub use config::{
    AushandlungsEinstellungen, MonitorEinstellungen, ReconnectEinstellungen, SessionOptions,
    VerbindungsEinstellungen,
};
pub use endpoint::{EndpointResolver, RegionEndpoint};
pub use error::{SignalingError, SignalingResult};
pub use monitor::{MonitorEnde, SessionMonitor};
pub use negotiation::{negotiate, Aktion, NegotiationCoordinator, Phase};
pub use reconnect::{Entscheidung, NichtBereitFolge, ReconnectPolicy};
pub use session::{LiveSession, SessionKomponenten};
