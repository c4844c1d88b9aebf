//! klingel-auth – Tickets fuer den Signalisierungs-Endpunkt
//!
//! Dieses Crate implementiert:
//! - CredentialProvider (Bearer-Token und Konto-ID vom Aufrufer)
//! - TicketIssuer mit HTTPS-Implementierung (reqwest)
//! - TicketManager (Cache, Frischepruefung, periodische Erneuerung)

pub mod credentials;
pub mod error;
pub mod issuer;
pub mod ticket;

// Bequeme Re-Exporte
pub use credentials::{CredentialProvider, StaticCredentials};
pub use error::{AuthError, AuthResult};
pub use issuer::{HttpTicketIssuer, TicketAntwort, TicketIssuer, TICKET_URL};
pub use ticket::{Ticket, TicketConfig, TicketManager};
