//! WebRtcEngine – Medien-Engine auf Basis des `webrtc`-Crates
//!
//! Eine Engine pro Verbindungsversuch:
//! - ein receive-only Video-Transceiver (nur H.264 registriert)
//! - Offer erst nach dem ICE-Sammeln: fertig, genug Kandidaten oder Zeitlimit
//! - spaetere lokale Kandidaten gehen als Trickle an die Signalisierung
//! - Remote-Kandidaten vor der Answer werden gepuffert
//! - RTP des Video-Tracks wird im `FrameAssembler` zu Frames

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCPFeedback, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use klingel_core::{
    IceCandidate, LiveViewError, LiveViewResult, MediaEngine, MediaEngineFactory,
    MedienAngebot, TransportZustand, VideoFrame,
};

use crate::config::MedienConfig;
use crate::h264::{FrameAssembler, VIDEO_TAKT_HZ};

/// Payload-Typ fuer H.264 im Offer
const H264_PAYLOAD_TYP: u8 = 102;

fn medien_fehler(kontext: &str, e: impl std::fmt::Display) -> LiveViewError {
    LiveViewError::medien(format!("{kontext}: {e}"))
}

/// Bildet den Peer-Connection-Zustand auf den Transportzustand ab
pub fn transport_zuordnen(zustand: RTCPeerConnectionState) -> TransportZustand {
    match zustand {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => TransportZustand::Neu,
        RTCPeerConnectionState::Connecting => TransportZustand::Verbindend,
        RTCPeerConnectionState::Connected => TransportZustand::Verbunden,
        RTCPeerConnectionState::Disconnected => TransportZustand::Getrennt,
        RTCPeerConnectionState::Failed => TransportZustand::Fehlgeschlagen,
        RTCPeerConnectionState::Closed => TransportZustand::Geschlossen,
    }
}

fn kandidat_aus_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
    }
}

fn kandidat_zu_init(kandidat: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: kandidat.candidate,
        sdp_mid: kandidat.sdp_mid,
        sdp_mline_index: kandidat.sdp_mline_index,
        username_fragment: None,
    }
}

/// Fortschritt des ICE-Sammelns
#[derive(Debug, Clone, Copy, Default)]
struct Sammelstand {
    anzahl: usize,
    fertig: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct WebRtcEngine {
    config: MedienConfig,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    answer_gesetzt: AtomicBool,
    /// Remote-Kandidaten die vor der Answer eintreffen
    ausstehend: Mutex<Vec<IceCandidate>>,
}

impl WebRtcEngine {
    pub fn neu(config: MedienConfig) -> Self {
        Self {
            config,
            pc: Mutex::new(None),
            answer_gesetzt: AtomicBool::new(false),
            ausstehend: Mutex::new(Vec::new()),
        }
    }

    fn pc(&self) -> LiveViewResult<Arc<RTCPeerConnection>> {
        self.pc
            .lock()
            .clone()
            .ok_or_else(|| {
                LiveViewError::medien("keine Peer-Connection (Offer fehlt oder bereits geschlossen)")
            })
    }

    async fn peer_connection_bauen(&self) -> LiveViewResult<RTCPeerConnection> {
        let mut medien = RtcMediaEngine::default();
        let feedback = vec![
            RTCPFeedback {
                typ: "nack".into(),
                parameter: String::new(),
            },
            RTCPFeedback {
                typ: "nack".into(),
                parameter: "pli".into(),
            },
            RTCPFeedback {
                typ: "ccm".into(),
                parameter: "fir".into(),
            },
        ];
        medien
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_H264.to_owned(),
                        clock_rate: VIDEO_TAKT_HZ as u32,
                        channels: 0,
                        sdp_fmtp_line:
                            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                                .into(),
                        rtcp_feedback: feedback,
                    },
                    payload_type: H264_PAYLOAD_TYP,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| medien_fehler("Codec registrieren", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut medien)
            .map_err(|e| medien_fehler("Interceptors registrieren", e))?;
        let api = APIBuilder::new()
            .with_media_engine(medien)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.stun_server.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        api.new_peer_connection(rtc_config)
            .await
            .map_err(|e| medien_fehler("Peer-Connection erstellen", e))
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_offer(&self) -> LiveViewResult<MedienAngebot> {
        let pc = Arc::new(self.peer_connection_bauen().await?);
        *self.pc.lock() = Some(Arc::clone(&pc));

        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| medien_fehler("Transceiver hinzufuegen", e))?;

        // Transportzustand
        let (transport_tx, transport_rx) = watch::channel(TransportZustand::Neu);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let zustand = transport_zuordnen(s);
            tracing::debug!(?s, "Peer-Connection-Zustand");
            transport_tx.send_replace(zustand);
            Box::pin(async {})
        }));

        // Lokale Kandidaten: vor dem Offer nur zaehlen, danach weiterreichen
        let (kandidaten_tx, kandidaten_rx) = mpsc::channel(32);
        let (stand_tx, mut stand_rx) = watch::channel(Sammelstand::default());
        let stand_tx = Arc::new(stand_tx);
        let offer_vergeben = Arc::new(AtomicBool::new(false));
        {
            let stand_tx = Arc::clone(&stand_tx);
            let offer_vergeben = Arc::clone(&offer_vergeben);
            pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
                let kandidaten_tx = kandidaten_tx.clone();
                let stand_tx = Arc::clone(&stand_tx);
                let offer_vergeben = Arc::clone(&offer_vergeben);
                Box::pin(async move {
                    let Some(c) = c else {
                        stand_tx.send_modify(|s| s.fertig = true);
                        return;
                    };
                    stand_tx.send_modify(|s| s.anzahl += 1);
                    if !offer_vergeben.load(Ordering::SeqCst) {
                        return;
                    }
                    match c.to_json() {
                        Ok(init) => {
                            let _ = kandidaten_tx.send(kandidat_aus_init(init)).await;
                        }
                        Err(e) => {
                            tracing::debug!(fehler = %e, "Lokaler Kandidat nicht serialisierbar")
                        }
                    }
                })
            }));
        }
        {
            let stand_tx = Arc::clone(&stand_tx);
            pc.on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                if s == RTCIceGathererState::Complete {
                    stand_tx.send_modify(|s| s.fertig = true);
                }
                Box::pin(async {})
            }));
        }

        // Video-Track
        let (frames_tx, frames_rx) = mpsc::channel(self.config.frame_puffer);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let frames_tx = frames_tx.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Video {
                    return;
                }
                tracing::info!(ssrc = track.ssrc(), "Video-Track empfangen");
                tokio::spawn(track_lesen(track, frames_tx));
            })
        }));

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| medien_fehler("Offer erzeugen", e))?;
        pc.set_local_description(offer)
            .await
            .map_err(|e| medien_fehler("Lokale Beschreibung setzen", e))?;

        let min = self.config.min_kandidaten;
        let gesammelt = tokio::time::timeout(
            self.config.sammeln_timeout(),
            stand_rx.wait_for(|s| s.fertig || s.anzahl >= min),
        )
        .await
        .map(|r| r.map(|_| ()));
        let stand = *stand_rx.borrow();
        let kandidaten = stand.anzahl;
        match gesammelt {
            Ok(_) if stand.fertig => tracing::info!(kandidaten, "ICE-Sammeln abgeschlossen"),
            Ok(_) => tracing::info!(kandidaten, "Genug ICE-Kandidaten, weiter mit Offer"),
            Err(_) => tracing::warn!(kandidaten, "ICE-Sammeln: Zeitlimit, weiter mit Vorhandenem"),
        }

        // Ab hier als Trickle; doppelte Kandidaten im SDP sind unschaedlich
        offer_vergeben.store(true, Ordering::SeqCst);
        let sdp = pc
            .local_description()
            .await
            .ok_or_else(|| LiveViewError::medien("keine lokale Beschreibung"))?
            .sdp;

        Ok(MedienAngebot {
            sdp,
            kandidaten: kandidaten_rx,
            transport: transport_rx,
            frames: frames_rx,
        })
    }

    async fn apply_answer(&self, sdp: &str) -> LiveViewResult<()> {
        let pc = self.pc()?;
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| medien_fehler("Answer lesen", e))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| medien_fehler("Answer anwenden", e))?;
        self.answer_gesetzt.store(true, Ordering::SeqCst);

        let ausstehend = std::mem::take(&mut *self.ausstehend.lock());
        if !ausstehend.is_empty() {
            tracing::debug!(anzahl = ausstehend.len(), "Gepufferte Remote-Kandidaten anwenden");
        }
        for kandidat in ausstehend {
            if let Err(e) = pc.add_ice_candidate(kandidat_zu_init(kandidat)).await {
                tracing::warn!(fehler = %e, "Gepufferter Remote-Kandidat abgelehnt");
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, kandidat: IceCandidate) -> LiveViewResult<()> {
        if !self.answer_gesetzt.load(Ordering::SeqCst) {
            self.ausstehend.lock().push(kandidat);
            return Ok(());
        }
        self.pc()?
            .add_ice_candidate(kandidat_zu_init(kandidat))
            .await
            .map_err(|e| medien_fehler("Remote-Kandidat", e))
    }

    async fn close(&self) {
        let pc = self.pc.lock().take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                tracing::debug!(fehler = %e, "Peer-Connection schliessen");
            }
        }
    }
}

/// Liest RTP vom Track bis er endet oder niemand mehr Frames abnimmt
async fn track_lesen(track: Arc<TrackRemote>, frames: mpsc::Sender<VideoFrame>) {
    let mut zusammensetzer = FrameAssembler::neu();
    loop {
        let paket = match track.read_rtp().await {
            Ok((paket, _)) => paket,
            Err(e) => {
                tracing::debug!(fehler = %e, "Video-Track beendet");
                break;
            }
        };
        if let Some(frame) = zusammensetzer.hinzufuegen(&paket) {
            if frames.send(frame).await.is_err() {
                break;
            }
        }
    }
    tracing::debug!(verworfen = zusammensetzer.verworfen(), "Track-Leser beendet");
}

// ---------------------------------------------------------------------------
// Fabrik
// ---------------------------------------------------------------------------

/// Erzeugt pro Verbindungsversuch eine frische `WebRtcEngine`
#[derive(Debug, Clone, Default)]
pub struct WebRtcEngineFactory {
    config: MedienConfig,
}

impl WebRtcEngineFactory {
    pub fn neu(config: MedienConfig) -> Self {
        Self { config }
    }
}

impl MediaEngineFactory for WebRtcEngineFactory {
    fn erzeugen(&self) -> LiveViewResult<Arc<dyn MediaEngine>> {
        Ok(Arc::new(WebRtcEngine::neu(self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transportzustaende() {
        assert_eq!(
            transport_zuordnen(RTCPeerConnectionState::Connected),
            TransportZustand::Verbunden
        );
        assert_eq!(
            transport_zuordnen(RTCPeerConnectionState::Disconnected),
            TransportZustand::Getrennt
        );
        assert_eq!(
            transport_zuordnen(RTCPeerConnectionState::Failed),
            TransportZustand::Fehlgeschlagen
        );
        assert_eq!(
            transport_zuordnen(RTCPeerConnectionState::Closed),
            TransportZustand::Geschlossen
        );
    }

    #[test]
    fn kandidat_felder_bleiben_erhalten() {
        let k = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        let init = kandidat_zu_init(k.clone());
        assert_eq!(init.username_fragment, None);
        assert_eq!(kandidat_aus_init(init), k);
    }

    #[tokio::test]
    async fn answer_ohne_offer_ist_medienfehler() {
        let engine = WebRtcEngine::neu(MedienConfig::default());
        assert!(matches!(
            engine.apply_answer("v=0").await,
            Err(LiveViewError::Media(_))
        ));
    }

    #[tokio::test]
    async fn kandidaten_vor_answer_werden_gepuffert() {
        let engine = WebRtcEngine::neu(MedienConfig::default());
        let k = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        engine.add_remote_candidate(k.clone()).await.unwrap();
        assert_eq!(*engine.ausstehend.lock(), vec![k]);
        // close ohne Peer-Connection ist unschaedlich
        engine.close().await;
    }
}
