//! Gemeinsame Test-Doubles fuer die Session-Integrationstests
//!
//! Ein In-Memory-Connector reicht jede Verbindung als `Gegenstelle` an den
//! Test weiter, der damit den Signalisierungs-Endpunkt spielt.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use klingel_auth::{
    AuthError, AuthResult, TicketAntwort, TicketConfig, TicketIssuer, TicketManager,
};
use klingel_core::{
    DeviceId, DialogId, FrameSink, IceCandidate, LiveViewResult, MediaEngine,
    MediaEngineFactory, MedienAngebot, SessionCredential, TransportZustand, VideoFrame,
};
use klingel_protocol::{AnswerBody, Methode, Payload, SessionCreatedBody, SignalingMessage};
use klingel_signaling::{
    Connector, LiveSession, RegionEndpoint, SessionKomponenten, SessionOptions, SignalingError,
    SignalingResult, TransportKanaele,
};

pub const GERAET: DeviceId = DeviceId(589_851_570);

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// Zaehlt Anfragen und liefert `ticket-<n>`; optional ein fester Fehler
pub struct ZaehlIssuer {
    pub anfragen: AtomicU32,
    ablehnen: bool,
}

impl ZaehlIssuer {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self {
            anfragen: AtomicU32::new(0),
            ablehnen: false,
        })
    }

    pub fn ablehnend() -> Arc<Self> {
        Arc::new(Self {
            anfragen: AtomicU32::new(0),
            ablehnen: true,
        })
    }

    pub fn anzahl(&self) -> u32 {
        self.anfragen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketIssuer for ZaehlIssuer {
    async fn ticket_anfordern(&self) -> AuthResult<TicketAntwort> {
        let n = self.anfragen.fetch_add(1, Ordering::SeqCst) + 1;
        if self.ablehnen {
            return Err(AuthError::Abgelehnt("401 Unauthorized".into()));
        }
        Ok(TicketAntwort {
            ticket: format!("ticket-{n}"),
            region: Some("us-east-1".into()),
            legacy: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Testseite einer Signalisierungs-Verbindung
pub struct Gegenstelle {
    pub url: String,
    pub von_client: mpsc::Receiver<String>,
    pub an_client: mpsc::Sender<String>,
}

impl Gegenstelle {
    /// Naechste Nachricht des Clients; `None` wenn der Client geschlossen hat
    pub async fn naechste(&mut self) -> Option<SignalingMessage> {
        let text = self.von_client.recv().await?;
        Some(SignalingMessage::dekodieren(&text).expect("Client sendet gueltiges JSON"))
    }

    /// Wartet auf eine Nachricht mit `methode`, andere werden uebersprungen
    pub async fn erwarten(&mut self, methode: Methode) -> SignalingMessage {
        loop {
            let msg = self
                .naechste()
                .await
                .unwrap_or_else(|| panic!("Verbindung endete vor '{}'", methode.als_wire()));
            if msg.methode() == methode {
                return msg;
            }
        }
    }

    pub async fn senden(&self, msg: SignalingMessage) {
        self.an_client
            .send(msg.kodieren().unwrap())
            .await
            .expect("Client liest nicht mehr");
    }

    /// Wartet auf das Offer und liefert dessen Dialog
    pub async fn offer_erwarten(&mut self) -> DialogId {
        let offer = self.erwarten(Methode::Offer).await;
        match &offer.payload {
            Payload::Offer(body) => assert_eq!(body.doorbot_id, GERAET),
            anderes => panic!("kein Offer: {anderes:?}"),
        }
        offer.dialog_id.expect("Offer ohne Dialog")
    }

    /// Vollstaendige Aushandlung aus Sicht des Endpunkts
    pub async fn aushandeln(&mut self) -> DialogId {
        let dialog = self.offer_erwarten().await;
        self.antworten(&dialog).await;
        dialog
    }

    /// Answer, `session_created` und `camera_started` fuer `dialog`
    pub async fn antworten(&self, dialog: &DialogId) {
        self.answer(dialog).await;
        self.session_erstellt(dialog).await;
        self.kamera_gestartet(dialog).await;
    }

    pub async fn answer(&self, dialog: &DialogId) {
        self.senden(SignalingMessage::mit_payload(
            Some(dialog.clone()),
            Payload::Answer(AnswerBody {
                sdp: "v=0 answer".into(),
            }),
        ))
        .await;
    }

    pub async fn session_erstellt(&self, dialog: &DialogId) {
        self.senden(SignalingMessage::mit_payload(
            Some(dialog.clone()),
            Payload::SessionCreated(SessionCreatedBody {
                session_id: SessionCredential("session-jwt".into()),
            }),
        ))
        .await;
    }

    pub async fn kamera_gestartet(&self, dialog: &DialogId) {
        self.senden(SignalingMessage::mit_payload(
            Some(dialog.clone()),
            Payload::MediaStarted,
        ))
        .await;
    }

    /// Sendet Text ohne Kodierung, etwa kaputtes JSON
    pub async fn roh_senden(&self, text: &str) {
        self.an_client
            .send(text.to_string())
            .await
            .expect("Client liest nicht mehr");
    }
}

/// Connector der jede Verbindung an den Test uebergibt
///
/// Vorgegebene Statuscodes lehnen die naechsten Handshakes ab.
pub struct TestConnector {
    verbindungen: mpsc::UnboundedSender<Gegenstelle>,
    ablehnungen: Mutex<VecDeque<u16>>,
    immer_ablehnen: Option<u16>,
    pub versuche: AtomicU32,
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self, url: &str) -> SignalingResult<TransportKanaele> {
        self.versuche.fetch_add(1, Ordering::SeqCst);
        let abgelehnt = self.ablehnungen.lock().pop_front().or(self.immer_ablehnen);
        if let Some(status) = abgelehnt {
            return Err(SignalingError::verbindung(Some(status), "abgelehnt"));
        }

        let (aus_tx, aus_rx) = mpsc::channel(256);
        let (ein_tx, ein_rx) = mpsc::channel(256);
        let _ = self.verbindungen.send(Gegenstelle {
            url: url.to_string(),
            von_client: aus_rx,
            an_client: ein_tx,
        });
        Ok(TransportKanaele {
            ausgang: aus_tx,
            eingang: ein_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Medien
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EngineKanaele {
    kandidaten: Option<mpsc::Sender<IceCandidate>>,
    transport: Option<watch::Sender<TransportZustand>>,
    frames: Option<mpsc::Sender<VideoFrame>>,
}

/// Engine ohne Netzwerk; der Test steuert Transport und Frames
#[derive(Default)]
pub struct TestEngine {
    kanaele: Mutex<EngineKanaele>,
    pub answer: Mutex<Option<String>>,
    pub remote_kandidaten: Mutex<Vec<IceCandidate>>,
    pub geschlossen: AtomicBool,
}

impl TestEngine {
    pub fn transport_setzen(&self, zustand: TransportZustand) {
        if let Some(tx) = self.kanaele.lock().transport.as_ref() {
            tx.send_replace(zustand);
        }
    }

    pub async fn frame_senden(&self, nr: u8) -> bool {
        let tx = self.kanaele.lock().frames.clone();
        match tx {
            Some(tx) => tx
                .send(VideoFrame {
                    timestamp: Duration::from_millis(u64::from(nr) * 33),
                    data: Bytes::from(vec![0, 0, 0, 1, 0x65, nr]),
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    pub async fn kandidat_senden(&self, kandidat: IceCandidate) {
        let tx = self.kanaele.lock().kandidaten.clone();
        if let Some(tx) = tx {
            let _ = tx.send(kandidat).await;
        }
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaEngine for TestEngine {
    async fn create_offer(&self) -> LiveViewResult<MedienAngebot> {
        let (k_tx, k_rx) = mpsc::channel(16);
        let (t_tx, t_rx) = watch::channel(TransportZustand::Neu);
        let (f_tx, f_rx) = mpsc::channel(64);
        *self.kanaele.lock() = EngineKanaele {
            kandidaten: Some(k_tx),
            transport: Some(t_tx),
            frames: Some(f_tx),
        };
        Ok(MedienAngebot {
            sdp: "v=0 offer".into(),
            kandidaten: k_rx,
            transport: t_rx,
            frames: f_rx,
        })
    }

    async fn apply_answer(&self, sdp: &str) -> LiveViewResult<()> {
        *self.answer.lock() = Some(sdp.to_string());
        self.transport_setzen(TransportZustand::Verbunden);
        Ok(())
    }

    async fn add_remote_candidate(&self, kandidat: IceCandidate) -> LiveViewResult<()> {
        self.remote_kandidaten.lock().push(kandidat);
        Ok(())
    }

    async fn close(&self) {
        self.geschlossen.store(true, Ordering::SeqCst);
    }
}

/// Merkt sich jede erzeugte Engine
#[derive(Default)]
pub struct TestMedien {
    pub engines: Mutex<Vec<Arc<TestEngine>>>,
}

impl TestMedien {
    pub fn letzte(&self) -> Arc<TestEngine> {
        self.engines
            .lock()
            .last()
            .cloned()
            .expect("noch keine Engine erzeugt")
    }

    pub fn anzahl(&self) -> usize {
        self.engines.lock().len()
    }
}

impl MediaEngineFactory for TestMedien {
    fn erzeugen(&self) -> LiveViewResult<Arc<dyn MediaEngine>> {
        let engine = Arc::new(TestEngine::default());
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Aufnahme {
    pub frames: Mutex<Vec<VideoFrame>>,
}

impl Aufnahme {
    pub fn anzahl(&self) -> usize {
        self.frames.lock().len()
    }
}

impl FrameSink for Aufnahme {
    fn accept(&self, frame: VideoFrame) {
        self.frames.lock().push(frame);
    }
}

// ---------------------------------------------------------------------------
// Umgebung
// ---------------------------------------------------------------------------

/// Eine Session mit allen Test-Doubles
pub struct Umgebung {
    pub session: Arc<LiveSession>,
    pub issuer: Arc<ZaehlIssuer>,
    pub connector: Arc<TestConnector>,
    pub medien: Arc<TestMedien>,
    pub aufnahme: Arc<Aufnahme>,
    pub verbindungen: mpsc::UnboundedReceiver<Gegenstelle>,
}

pub struct UmgebungsBauer {
    issuer: Arc<ZaehlIssuer>,
    ablehnungen: Vec<u16>,
    immer_ablehnen: Option<u16>,
    optionen: SessionOptions,
}

impl UmgebungsBauer {
    pub fn issuer(mut self, issuer: Arc<ZaehlIssuer>) -> Self {
        self.issuer = issuer;
        self
    }

    /// Lehnt die naechsten Handshakes mit diesen Statuscodes ab
    pub fn ablehnungen(mut self, status: &[u16]) -> Self {
        self.ablehnungen = status.to_vec();
        self
    }

    pub fn immer_ablehnen(mut self, status: u16) -> Self {
        self.immer_ablehnen = Some(status);
        self
    }

    pub fn optionen(mut self, optionen: SessionOptions) -> Self {
        self.optionen = optionen;
        self
    }

    pub fn bauen(self) -> Umgebung {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(TestConnector {
            verbindungen: tx,
            ablehnungen: Mutex::new(self.ablehnungen.into()),
            immer_ablehnen: self.immer_ablehnen,
            versuche: AtomicU32::new(0),
        });
        let medien = Arc::new(TestMedien::default());
        let aufnahme = Arc::new(Aufnahme::default());
        let tickets = TicketManager::neu(self.issuer.clone(), TicketConfig::default());

        let komponenten = SessionKomponenten {
            tickets,
            connector: connector.clone(),
            endpoint: Arc::new(RegionEndpoint::neu()),
            medien: medien.clone(),
        };
        let session = Arc::new(LiveSession::neu(
            GERAET,
            komponenten,
            aufnahme.clone(),
            self.optionen,
        ));

        Umgebung {
            session,
            issuer: self.issuer,
            connector,
            medien,
            aufnahme,
            verbindungen: rx,
        }
    }
}

impl Umgebung {
    pub fn bauer() -> UmgebungsBauer {
        UmgebungsBauer {
            issuer: ZaehlIssuer::neu(),
            ablehnungen: Vec::new(),
            immer_ablehnen: None,
            optionen: SessionOptions::default(),
        }
    }

    pub fn neu() -> Self {
        Self::bauer().bauen()
    }

    /// Startet die Session im Hintergrund
    pub fn starten(&self) -> tokio::task::JoinHandle<LiveViewResult<()>> {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move { session.start().await })
    }

    pub async fn naechste_verbindung(&mut self) -> Gegenstelle {
        self.verbindungen
            .recv()
            .await
            .expect("Connector wurde verworfen")
    }
}

/// Laesst alle bereiten Tasks laufen
pub async fn abarbeiten() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
