//! Schnittstellen zur Medien-Engine
//!
//! Die Signalisierung kennt WebRTC nur ueber diese Traits. Eine Engine
//! erzeugt das lokale Offer, nimmt Answer und Remote-Kandidaten entgegen und
//! liefert lokale Kandidaten, den Transportzustand und empfangene Frames
//! ueber Kanaele zurueck.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::LiveViewResult;
use crate::types::IceCandidate;

/// Zustand des Medien-Transports (ICE/DTLS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportZustand {
    #[default]
    Neu,
    Verbindend,
    Verbunden,
    /// Voruebergehend getrennt, kann sich selbst erholen
    Getrennt,
    /// Transport ist endgueltig gescheitert
    Fehlgeschlagen,
    Geschlossen,
}

/// Ein empfangenes Video-Frame (H.264 Annex-B)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Zeitstempel relativ zum ersten Frame der Session
    pub timestamp: Duration,
    pub data: Bytes,
}

/// Ergebnis von `MediaEngine::create_offer`
#[derive(Debug)]
pub struct MedienAngebot {
    /// Lokales SDP-Offer
    pub sdp: String,
    /// Lokal gesammelte ICE-Kandidaten (Trickle)
    pub kandidaten: mpsc::Receiver<IceCandidate>,
    /// Zustandsaenderungen des Transports
    pub transport: watch::Receiver<TransportZustand>,
    /// Dekodierte Frames der Kamera
    pub frames: mpsc::Receiver<VideoFrame>,
}

/// Medien-Engine fuer genau einen Verbindungsversuch
///
/// Pro Versuch wird eine neue Engine ueber eine Fabrik erzeugt und am Ende
/// mit `close` freigegeben.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Erzeugt ein receive-only Video-Offer
    async fn create_offer(&self) -> LiveViewResult<MedienAngebot>;

    /// Wendet die SDP-Answer der Gegenstelle an
    async fn apply_answer(&self, sdp: &str) -> LiveViewResult<()>;

    /// Fuegt einen Remote-ICE-Kandidaten hinzu
    async fn add_remote_candidate(&self, kandidat: IceCandidate) -> LiveViewResult<()>;

    /// Gibt alle Medien-Ressourcen frei
    async fn close(&self);
}

/// Fabrik fuer Medien-Engines, eine pro Verbindungsversuch
pub trait MediaEngineFactory: Send + Sync {
    fn erzeugen(&self) -> LiveViewResult<Arc<dyn MediaEngine>>;
}

/// Empfaenger fuer Video-Frames
///
/// Wird nur im Zustand `Active` aufgerufen und nie nachdem `stop()`
/// zurueckgekehrt ist.
pub trait FrameSink: Send + Sync {
    fn accept(&self, frame: VideoFrame);
}

impl<F> FrameSink for F
where
    F: Fn(VideoFrame) + Send + Sync,
{
    fn accept(&self, frame: VideoFrame) {
        self(frame)
    }
}
