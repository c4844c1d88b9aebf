//! klingel-media – WebRTC-Anbindung fuer Klingel Live-View
//!
//! Implementiert `MediaEngine` und `MediaEngineFactory` aus `klingel-core`
//! mit dem `webrtc`-Crate. Die Signalisierung kennt nur die Traits; dieses
//! Crate liefert SDP, ICE-Kandidaten, den Transportzustand und H.264-Frames.
//!
//! ## Aufbau
//!
//! ```text
//! WebRtcEngineFactory
//!     |  erzeugen() pro Verbindungsversuch
//!     v
//! WebRtcEngine (RTCPeerConnection, recvonly Video)
//!     |
//!     +-- on_ice_candidate          -> MedienAngebot::kandidaten
//!     +-- on_peer_connection_state  -> MedienAngebot::transport
//!     +-- on_track -> FrameAssembler -> MedienAngebot::frames
//! ```

pub mod config;
pub mod engine;
pub mod h264;

pub use config::MedienConfig;
pub use engine::{WebRtcEngine, WebRtcEngineFactory};
pub use h264::FrameAssembler;
