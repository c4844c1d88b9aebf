//! klingel-core – Gemeinsame Typen, Traits und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Klingel-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod media;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{LiveViewError, LiveViewResult, TimeoutPhase, CLOSE_NICHT_BEREIT};
pub use event::{ConnectionState, SessionEvent};
pub use media::{
    FrameSink, MediaEngine, MediaEngineFactory, MedienAngebot, TransportZustand, VideoFrame,
};
pub use types::{kuerzen, DeviceId, DialogId, IceCandidate, SessionCredential};
