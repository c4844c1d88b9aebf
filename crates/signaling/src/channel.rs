//! SignalingChannel – Eine WebSocket-Verbindung zum Signalisierungs-Endpunkt
//!
//! Der Transport liefert zwei Kanaele: ausgehende und eingehende
//! Text-Frames. Der `WsConnector` betreibt dafuer einen Schreib- und einen
//! Lese-Task pro Verbindung; in Tests ersetzt ein In-Memory-Connector die
//! echte Gegenstelle.
//!
//! ## Lebensdauer
//! ```text
//! connect() -> send()/next_message() ... -> close()
//!                         |
//!                         +-- None: Socket geschlossen, neuer Kanal noetig
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};

use klingel_protocol::SignalingMessage;

use crate::error::{SignalingError, SignalingResult};

/// WebSocket-Subprotokoll des Endpunkts
pub const SUBPROTOKOLL: &str = "aws.iot.webrtc.signalling.lightcone";

/// Puffergroesse der Frame-Kanaele
const KANAL_PUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Rohe Text-Frames einer Verbindung
///
/// Schliesst die Gegenseite, endet `eingang`. Wird `ausgang` fallen
/// gelassen, schliesst der Transport die Verbindung.
#[derive(Debug)]
pub struct TransportKanaele {
    pub ausgang: mpsc::Sender<String>,
    pub eingang: mpsc::Receiver<String>,
}

/// Baut Transport-Verbindungen auf
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> SignalingResult<TransportKanaele>;
}

/// Connector fuer echte WebSocket-Verbindungen (tokio-tungstenite)
#[derive(Debug, Clone)]
pub struct WsConnector {
    user_agent: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn neu(user_agent: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> SignalingResult<TransportKanaele> {
        let mut anfrage = url
            .into_client_request()
            .map_err(|e| SignalingError::Endpunkt(e.to_string()))?;
        let header = anfrage.headers_mut();
        header.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOKOLL),
        );
        let ua = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| SignalingError::intern(format!("User-Agent: {e}")))?;
        header.insert("User-Agent", ua);

        let verbindung =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(anfrage))
                .await
                .map_err(|_| SignalingError::verbindung(None, "Zeitlimit beim Handshake"))?;

        let (ws, antwort) = match verbindung {
            Ok(v) => v,
            Err(tungstenite::Error::Http(antwort)) => {
                let status = antwort.status();
                return Err(SignalingError::verbindung(
                    Some(status.as_u16()),
                    status.canonical_reason().unwrap_or("abgelehnt"),
                ));
            }
            Err(e) => return Err(SignalingError::verbindung(None, e.to_string())),
        };
        tracing::debug!(status = %antwort.status(), "WebSocket-Handshake abgeschlossen");

        let (mut schreiben, mut lesen) = ws.split();
        let (aus_tx, mut aus_rx) = mpsc::channel::<String>(KANAL_PUFFER);
        let (ein_tx, ein_rx) = mpsc::channel::<String>(KANAL_PUFFER);

        // Schreib-Task: Kanal -> WebSocket
        tokio::spawn(async move {
            while let Some(text) = aus_rx.recv().await {
                if let Err(e) = schreiben.send(Message::Text(text)).await {
                    tracing::warn!(fehler = %e, "WebSocket-Senden fehlgeschlagen");
                    break;
                }
            }
            let _ = schreiben.send(Message::Close(None)).await;
            let _ = schreiben.close().await;
            tracing::debug!("WebSocket-Schreib-Task beendet");
        });

        // Lese-Task: WebSocket -> Kanal
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ein_tx.closed() => break,
                    frame = lesen.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if ein_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(daten))) => match String::from_utf8(daten) {
                            Ok(text) => {
                                if ein_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => tracing::debug!("Binaer-Frame ohne UTF-8 verworfen"),
                        },
                        Some(Ok(Message::Close(grund))) => {
                            tracing::info!(grund = ?grund, "WebSocket von Gegenstelle geschlossen");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "WebSocket-Lesefehler");
                            break;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("WebSocket-Lese-Task beendet");
        });

        Ok(TransportKanaele {
            ausgang: aus_tx,
            eingang: ein_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// SignalingChannel
// ---------------------------------------------------------------------------

/// Typisierte Sicht auf eine Transport-Verbindung
///
/// Einziger Schreiber und Leser der Verbindung. Eingehende Nachrichten mit
/// unbekannter Methode werden uebersprungen.
pub struct SignalingChannel {
    ausgang: Option<mpsc::Sender<String>>,
    eingang: mpsc::Receiver<String>,
    sende_timeout: Duration,
}

impl SignalingChannel {
    /// Baut die Verbindung ueber `connector` auf
    pub async fn connect(
        connector: &dyn Connector,
        url: &str,
        sende_timeout: Duration,
    ) -> SignalingResult<Self> {
        let kanaele = connector.connect(url).await?;
        Ok(Self::aus_transport(kanaele, sende_timeout))
    }

    pub fn aus_transport(kanaele: TransportKanaele, sende_timeout: Duration) -> Self {
        Self {
            ausgang: Some(kanaele.ausgang),
            eingang: kanaele.eingang,
            sende_timeout,
        }
    }

    /// Kodiert und reiht eine Nachricht zum Senden ein
    pub async fn send(&self, nachricht: &SignalingMessage) -> SignalingResult<()> {
        let ausgang = self
            .ausgang
            .as_ref()
            .ok_or(SignalingError::VerbindungGetrennt)?;
        let text = nachricht.kodieren()?;
        tracing::trace!(methode = %nachricht.methode(), "Sende Nachricht");

        ausgang
            .send_timeout(text, self.sende_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => SignalingError::SendeTimeout,
                mpsc::error::SendTimeoutError::Closed(_) => SignalingError::VerbindungGetrennt,
            })
    }

    /// Naechste eingehende Nachricht
    ///
    /// `None` wenn der Socket geschlossen wurde. `Some(Err(..))` fuer eine
    /// fehlerhafte Nachricht; der Kanal bleibt danach benutzbar.
    pub async fn next_message(&mut self) -> Option<SignalingResult<SignalingMessage>> {
        loop {
            let text = self.eingang.recv().await?;
            match SignalingMessage::dekodieren(&text) {
                Ok(nachricht) => {
                    tracing::trace!(methode = %nachricht.methode(), "Nachricht empfangen");
                    return Some(Ok(nachricht));
                }
                Err(e) if e.ist_ueberspringbar() => {
                    tracing::debug!(fehler = %e, "Nachricht uebersprungen");
                }
                Err(e) => {
                    tracing::warn!(
                        fehler = %e,
                        auszug = %text.chars().take(120).collect::<String>(),
                        "Fehlerhafte Nachricht"
                    );
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Schliesst den Kanal; mehrfacher Aufruf ist unschaedlich
    pub fn close(&mut self) {
        if self.ausgang.take().is_some() {
            tracing::debug!("Signalisierungs-Kanal geschlossen");
        }
        self.eingang.close();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.ausgang.as_ref().map_or(true, |a| a.is_closed())
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}
