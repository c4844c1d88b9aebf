//! Signalisierungs-Nachrichten (WebSocket, JSON)
//!
//! Jede Nachricht ist ein JSON-Objekt mit den Feldern `method`,
//! `dialog_id`, `riid` und `body`. Der Body haengt von der Methode ab.
//!
//! ## Methoden auf dem Draht
//! - `live_view`: Offer (ausgehend), Answer wenn eingehend mit `sdp`
//! - `sdp`: Answer
//! - `icecandidate`: ICE-Kandidat in beide Richtungen
//! - `session_created`, `camera_started`, `ping`, `notification`, `close`
//!
//! Die allgemeinen Namen `offer`, `answer`, `candidate` und `media_started`
//! werden beim Dekodieren als Aliase akzeptiert.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use klingel_core::{DeviceId, DialogId, IceCandidate, SessionCredential};

use crate::error::{WireError, WireResult};

// ---------------------------------------------------------------------------
// Methoden
// ---------------------------------------------------------------------------

/// Methode einer Signalisierungs-Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Methode {
    Offer,
    Answer,
    Candidate,
    SessionCreated,
    MediaStarted,
    Ping,
    Notification,
    Close,
}

impl Methode {
    /// Name auf dem Draht (ausgehend)
    pub fn als_wire(&self) -> &'static str {
        match self {
            Self::Offer => "live_view",
            Self::Answer => "sdp",
            Self::Candidate => "icecandidate",
            Self::SessionCreated => "session_created",
            Self::MediaStarted => "camera_started",
            Self::Ping => "ping",
            Self::Notification => "notification",
            Self::Close => "close",
        }
    }

    /// Loest einen eingehenden Methodennamen auf (inklusive Aliase)
    ///
    /// `live_view` ist mehrdeutig und wird erst anhand des Bodys aufgeloest.
    fn aus_wire(name: &str) -> Option<Self> {
        let m = match name {
            "live_view" | "offer" => Self::Offer,
            "sdp" | "answer" => Self::Answer,
            "icecandidate" | "candidate" => Self::Candidate,
            "session_created" => Self::SessionCreated,
            "camera_started" | "media_started" => Self::MediaStarted,
            "ping" => Self::Ping,
            "notification" => Self::Notification,
            "close" => Self::Close,
            _ => return None,
        };
        Some(m)
    }
}

impl std::fmt::Display for Methode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_wire())
    }
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Medien-Auswahl im Offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub ptz_enabled: bool,
}

impl StreamOptions {
    /// Nur Video, kein Audio, keine Schwenk-/Neigesteuerung
    pub fn nur_video() -> Self {
        Self {
            audio_enabled: false,
            video_enabled: true,
            ptz_enabled: false,
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::nur_video()
    }
}

/// Body von `live_view` (Offer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferBody {
    /// Muss eine JSON-Zahl sein
    pub doorbot_id: DeviceId,
    pub sdp: String,
    pub stream_options: StreamOptions,
}

/// Body von `sdp` (Answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerBody {
    pub sdp: String,
}

/// Body von `icecandidate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doorbot_id: Option<DeviceId>,
    pub candidate: IceCandidate,
}

/// Body von `session_created`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreatedBody {
    pub session_id: SessionCredential,
}

/// Body von `ping` (Keepalive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingBody {
    pub doorbot_id: DeviceId,
    pub session_id: SessionCredential,
}

/// Body von `notification`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBody {
    #[serde(default)]
    pub text: String,
}

/// Grund eines `close`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    #[serde(default)]
    pub text: String,
}

// ---------------------------------------------------------------------------
// Nachricht
// ---------------------------------------------------------------------------

/// Methodenspezifischer Inhalt einer Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Offer(OfferBody),
    Answer(AnswerBody),
    Candidate(CandidateBody),
    SessionCreated(SessionCreatedBody),
    MediaStarted,
    Ping(PingBody),
    Notification(NotificationBody),
    Close(Option<CloseReason>),
}

impl Payload {
    pub fn methode(&self) -> Methode {
        match self {
            Self::Offer(_) => Methode::Offer,
            Self::Answer(_) => Methode::Answer,
            Self::Candidate(_) => Methode::Candidate,
            Self::SessionCreated(_) => Methode::SessionCreated,
            Self::MediaStarted => Methode::MediaStarted,
            Self::Ping(_) => Methode::Ping,
            Self::Notification(_) => Methode::Notification,
            Self::Close(_) => Methode::Close,
        }
    }
}

/// Eine Signalisierungs-Nachricht
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    /// Fehlt bei manchen Server-Nachrichten; wird dann als unbekannt behandelt
    pub dialog_id: Option<DialogId>,
    /// Opake Korrelations-ID pro Anfrage
    pub riid: Option<String>,
    pub payload: Payload,
}

/// Rohform auf dem Draht
#[derive(Debug, Serialize, Deserialize)]
struct RohNachricht {
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dialog_id: Option<DialogId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    riid: Option<String>,
    #[serde(default)]
    body: Value,
}

fn neue_riid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl SignalingMessage {
    /// Offer (`live_view`) mit frischer riid
    pub fn offer(dialog_id: DialogId, doorbot_id: DeviceId, sdp: impl Into<String>) -> Self {
        Self {
            dialog_id: Some(dialog_id),
            riid: Some(neue_riid()),
            payload: Payload::Offer(OfferBody {
                doorbot_id,
                sdp: sdp.into(),
                stream_options: StreamOptions::nur_video(),
            }),
        }
    }

    /// Lokaler ICE-Kandidat
    pub fn candidate(dialog_id: DialogId, doorbot_id: DeviceId, candidate: IceCandidate) -> Self {
        Self {
            dialog_id: Some(dialog_id),
            riid: Some(neue_riid()),
            payload: Payload::Candidate(CandidateBody {
                doorbot_id: Some(doorbot_id),
                candidate,
            }),
        }
    }

    /// Keepalive
    pub fn ping(dialog_id: DialogId, doorbot_id: DeviceId, session_id: SessionCredential) -> Self {
        Self {
            dialog_id: Some(dialog_id),
            riid: None,
            payload: Payload::Ping(PingBody {
                doorbot_id,
                session_id,
            }),
        }
    }

    /// Geordnetes lokales Schliessen
    pub fn close(dialog_id: DialogId, code: Option<u32>, text: impl Into<String>) -> Self {
        Self {
            dialog_id: Some(dialog_id),
            riid: Some(neue_riid()),
            payload: Payload::Close(Some(CloseReason {
                code,
                text: text.into(),
            })),
        }
    }

    /// Nachricht ohne riid (Gegenstelle, Tests)
    pub fn mit_payload(dialog_id: Option<DialogId>, payload: Payload) -> Self {
        Self {
            dialog_id,
            riid: None,
            payload,
        }
    }

    pub fn methode(&self) -> Methode {
        self.payload.methode()
    }

    /// Gehoert die Nachricht zum angegebenen Dialog?
    pub fn gehoert_zu(&self, dialog: &DialogId) -> bool {
        self.dialog_id.as_ref() == Some(dialog)
    }

    // -----------------------------------------------------------------------
    // Kodierung
    // -----------------------------------------------------------------------

    /// Serialisiert die Nachricht als JSON-Text-Frame
    pub fn kodieren(&self) -> WireResult<String> {
        let body = match &self.payload {
            Payload::Offer(b) => serde_json::to_value(b)?,
            Payload::Answer(b) => serde_json::to_value(b)?,
            Payload::Candidate(b) => serde_json::to_value(b)?,
            Payload::SessionCreated(b) => serde_json::to_value(b)?,
            Payload::MediaStarted => Value::Object(Default::default()),
            Payload::Ping(b) => serde_json::to_value(b)?,
            Payload::Notification(b) => serde_json::to_value(b)?,
            Payload::Close(grund) => match grund {
                Some(r) => serde_json::json!({ "reason": r }),
                None => Value::Object(Default::default()),
            },
        };
        let roh = RohNachricht {
            method: self.methode().als_wire().to_string(),
            dialog_id: self.dialog_id.clone(),
            riid: self.riid.clone(),
            body,
        };
        Ok(serde_json::to_string(&roh)?)
    }

    /// Parst einen eingehenden JSON-Text-Frame
    ///
    /// Unbekannte Methoden liefern `WireError::UnbekannteMethode`, fehlerhafte
    /// Bodies `WireError::UngueltigerBody`.
    pub fn dekodieren(text: &str) -> WireResult<Self> {
        let roh: RohNachricht = serde_json::from_str(text)?;
        let methode = Methode::aus_wire(&roh.method)
            .ok_or_else(|| WireError::UnbekannteMethode(roh.method.clone()))?;
        let body = match roh.body {
            Value::Null => Value::Object(Default::default()),
            b => b,
        };

        let payload = match methode {
            // `live_view` traegt ausgehend ein Offer, eingehend die Answer
            Methode::Offer if body.get("stream_options").is_some() => {
                Payload::Offer(body_lesen(&roh.method, body)?)
            }
            Methode::Offer | Methode::Answer => Payload::Answer(body_lesen(&roh.method, body)?),
            Methode::Candidate => Payload::Candidate(body_lesen(&roh.method, body)?),
            Methode::SessionCreated => Payload::SessionCreated(body_lesen(&roh.method, body)?),
            Methode::MediaStarted => Payload::MediaStarted,
            Methode::Ping => Payload::Ping(body_lesen(&roh.method, body)?),
            Methode::Notification => Payload::Notification(body_lesen(&roh.method, body)?),
            Methode::Close => Payload::Close(close_grund(&roh.method, &body)?),
        };

        Ok(Self {
            dialog_id: roh.dialog_id,
            riid: roh.riid,
            payload,
        })
    }
}

fn body_lesen<T: serde::de::DeserializeOwned>(methode: &str, body: Value) -> WireResult<T> {
    serde_json::from_value(body).map_err(|e| WireError::body(methode, e))
}

/// `reason` kann ein Objekt `{code, text}` oder ein blosser Text sein
fn close_grund(methode: &str, body: &Value) -> WireResult<Option<CloseReason>> {
    match body.get("reason") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(CloseReason {
            code: None,
            text: text.clone(),
        })),
        Some(r @ Value::Object(_)) => body_lesen(methode, r.clone()).map(Some),
        Some(anderes) => Err(WireError::body(
            methode,
            format!("reason hat unerwarteten Typ: {anderes}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog() -> DialogId {
        DialogId("d-1".into())
    }

    #[test]
    fn offer_hat_wire_format() {
        let msg = SignalingMessage::offer(dialog(), DeviceId(589851570), "v=0\r\n");
        let json: Value = serde_json::from_str(&msg.kodieren().unwrap()).unwrap();

        assert_eq!(json["method"], "live_view");
        assert_eq!(json["dialog_id"], "d-1");
        assert!(json["riid"].is_string());
        assert!(json["body"]["doorbot_id"].is_u64(), "doorbot_id muss Zahl sein");
        assert_eq!(json["body"]["doorbot_id"], 589851570u64);
        assert_eq!(json["body"]["sdp"], "v=0\r\n");
        assert_eq!(json["body"]["stream_options"]["video_enabled"], true);
        assert_eq!(json["body"]["stream_options"]["audio_enabled"], false);
        assert_eq!(json["body"]["stream_options"]["ptz_enabled"], false);
    }

    #[test]
    fn ping_traegt_session_id() {
        let msg = SignalingMessage::ping(
            dialog(),
            DeviceId(7),
            SessionCredential("jwt-abc".into()),
        );
        let json: Value = serde_json::from_str(&msg.kodieren().unwrap()).unwrap();
        assert_eq!(json["method"], "ping");
        assert_eq!(json["body"]["doorbot_id"], 7);
        assert_eq!(json["body"]["session_id"], "jwt-abc");
        assert!(json.get("riid").is_none());
    }

    #[test]
    fn live_view_mit_sdp_ist_answer() {
        let text = r#"{"method":"live_view","dialog_id":"d-1","body":{"sdp":"v=0 answer"}}"#;
        let msg = SignalingMessage::dekodieren(text).unwrap();
        assert_eq!(
            msg.payload,
            Payload::Answer(AnswerBody {
                sdp: "v=0 answer".into()
            })
        );
        assert!(msg.gehoert_zu(&dialog()));
    }

    #[test]
    fn eigenes_offer_wird_als_offer_gelesen() {
        let msg = SignalingMessage::offer(dialog(), DeviceId(1), "v=0");
        let zurueck = SignalingMessage::dekodieren(&msg.kodieren().unwrap()).unwrap();
        assert_eq!(zurueck.methode(), Methode::Offer);
    }

    #[test]
    fn aliase_werden_akzeptiert() {
        let a = SignalingMessage::dekodieren(r#"{"method":"answer","body":{"sdp":"x"}}"#).unwrap();
        assert_eq!(a.methode(), Methode::Answer);
        assert!(a.dialog_id.is_none());

        let m = SignalingMessage::dekodieren(r#"{"method":"media_started","dialog_id":"d"}"#)
            .unwrap();
        assert_eq!(m.payload, Payload::MediaStarted);
    }

    #[test]
    fn kandidat_von_gegenstelle() {
        let text = r#"{"method":"icecandidate","dialog_id":"d-1","body":{"candidate":{"candidate":"candidate:1 1 udp 1 1.2.3.4 5 typ host","sdpMid":"0","sdpMLineIndex":0}}}"#;
        let msg = SignalingMessage::dekodieren(text).unwrap();
        match msg.payload {
            Payload::Candidate(b) => {
                assert!(b.doorbot_id.is_none());
                assert_eq!(b.candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(b.candidate.sdp_mline_index, Some(0));
            }
            anderes => panic!("Erwartet Candidate, erhalten {anderes:?}"),
        }
    }

    #[test]
    fn close_mit_code_und_text() {
        let text = r#"{"method":"close","dialog_id":"d-1","body":{"reason":{"code":26,"text":"not ready yet"}}}"#;
        let msg = SignalingMessage::dekodieren(text).unwrap();
        assert_eq!(
            msg.payload,
            Payload::Close(Some(CloseReason {
                code: Some(26),
                text: "not ready yet".into()
            }))
        );
    }

    #[test]
    fn close_mit_text_grund_und_ohne_body() {
        let msg =
            SignalingMessage::dekodieren(r#"{"method":"close","body":{"reason":"bye"}}"#).unwrap();
        assert_eq!(
            msg.payload,
            Payload::Close(Some(CloseReason {
                code: None,
                text: "bye".into()
            }))
        );

        let leer = SignalingMessage::dekodieren(r#"{"method":"close"}"#).unwrap();
        assert_eq!(leer.payload, Payload::Close(None));
    }

    #[test]
    fn unbekannte_methode_ist_ueberspringbar() {
        let err = SignalingMessage::dekodieren(r#"{"method":"pong","body":{}}"#).unwrap_err();
        assert!(err.ist_ueberspringbar());
    }

    #[test]
    fn kaputter_body_ist_protokollfehler() {
        let err =
            SignalingMessage::dekodieren(r#"{"method":"session_created","body":{"x":1}}"#)
                .unwrap_err();
        assert!(!err.ist_ueberspringbar());
        assert!(matches!(err, WireError::UngueltigerBody { .. }));

        let err = SignalingMessage::dekodieren("kein json").unwrap_err();
        assert!(matches!(err, WireError::Json(_)));
    }
}
