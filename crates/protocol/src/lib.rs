//! klingel-protocol – Signalisierungs-Nachrichten
//!
//! Dieses Crate definiert alle Nachrichten die ueber den WebSocket zwischen
//! Client und Signalisierungs-Endpunkt ausgetauscht werden, als
//! geschlossenen Enum mit JSON-Kodierung.

pub mod error;
pub mod signaling;

pub use error::{WireError, WireResult};
pub use signaling::{
    AnswerBody, CandidateBody, CloseReason, Methode, NotificationBody, OfferBody, Payload,
    PingBody, SessionCreatedBody, SignalingMessage, StreamOptions,
};
