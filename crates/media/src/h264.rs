//! H.264 aus RTP: Depacketierung und Frame-Aufbau
//!
//! Die RTP-Nutzlast wird mit dem H.264-Depacketizer aus `webrtc::rtp` nach
//! Annex-B (Startcodes) ueberfuehrt. Alle Pakete mit demselben Zeitstempel
//! bilden ein Frame; das Paket mit gesetztem Marker-Bit schliesst es ab.
//!
//! ```text
//! RTP(ts=900, M=0) -+
//! RTP(ts=900, M=0)  +--> VideoFrame { timestamp: 10ms, data: 00 00 00 01 .. }
//! RTP(ts=900, M=1) -+
//! ```

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Depacketizer;

use klingel_core::VideoFrame;

/// RTP-Takt fuer Video
pub const VIDEO_TAKT_HZ: u64 = 90_000;

/// Rechnet eine Differenz im 90-kHz-Takt in eine Dauer um
pub fn rtp_zu_dauer(ticks: u32) -> Duration {
    Duration::from_micros(u64::from(ticks) * 1_000_000 / VIDEO_TAKT_HZ)
}

/// Setzt RTP-Pakete eines H.264-Tracks zu Frames zusammen
#[derive(Default)]
pub struct FrameAssembler {
    depacketizer: H264Packet,
    puffer: BytesMut,
    /// Zeitstempel des Frames im Aufbau
    aktueller_ts: Option<u32>,
    /// Zeitstempel des ersten Frames; Bezug fuer `VideoFrame::timestamp`
    erster_ts: Option<u32>,
    verworfen: u64,
}

impl FrameAssembler {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Unvollstaendig verworfene Frames
    pub fn verworfen(&self) -> u64 {
        self.verworfen
    }

    /// Nimmt ein Paket auf und liefert ein fertiges Frame bei Marker-Bit
    pub fn hinzufuegen(&mut self, paket: &Packet) -> Option<VideoFrame> {
        let ts = paket.header.timestamp;

        // Zeitstempel gewechselt ohne Marker: letztes Paket fehlt
        if self.aktueller_ts.is_some_and(|alt| alt != ts) && !self.puffer.is_empty() {
            tracing::debug!(
                ts_alt = ?self.aktueller_ts,
                ts_neu = ts,
                "Frame ohne Marker-Bit verworfen"
            );
            self.verwerfen();
        }
        self.aktueller_ts = Some(ts);

        match self.depacketizer.depacketize(&paket.payload) {
            Ok(nal) => self.puffer.extend_from_slice(&nal),
            Err(e) => {
                tracing::debug!(
                    fehler = %e,
                    seq = paket.header.sequence_number,
                    "H.264-Nutzlast ungueltig"
                );
                self.verwerfen();
                return None;
            }
        }

        if !paket.header.marker || self.puffer.is_empty() {
            return None;
        }

        let erster = *self.erster_ts.get_or_insert(ts);
        let data: Bytes = self.puffer.split().freeze();
        self.aktueller_ts = None;
        Some(VideoFrame {
            timestamp: rtp_zu_dauer(ts.wrapping_sub(erster)),
            data,
        })
    }

    fn verwerfen(&mut self) {
        self.puffer.clear();
        self.depacketizer = H264Packet::default();
        self.verworfen += 1;
    }
}
