//! NegotiationCoordinator – Offer/Answer-Aushandlung
//!
//! Der Koordinator ist eine reine Zustandsmaschine ohne I/O: er erzeugt das
//! Offer und bewertet eingehende Nachrichten. `negotiate` treibt ihn ueber
//! einen `SignalingChannel` und eine `MediaEngine` bis zum Zustand `Active`.
//!
//! ## State Machine
//! ```text
//! Idle -> OfferSent -> AwaitingAnswer -> AwaitingSession -> AwaitingMediaStart -> Active
//!   |        |              |                  |                    |              |
//!   +--------+--------------+------------------+--------------------+--> Failed ---+--> Closed
//! ```
//!
//! Nachrichten fremder Dialoge sind wirkungslos. Nachrichten fuer bereits
//! durchlaufene Phasen werden ignoriert, Nachrichten fuer spaetere Phasen
//! sind Protokollverletzungen. `close` gilt in jeder Phase sofort, ausser
//! "noch nicht bereit" (Code 26): Dialog und Phase bleiben bestehen.

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use klingel_core::{
    DeviceId, DialogId, IceCandidate, LiveViewError, LiveViewResult, MediaEngine,
    SessionCredential, TimeoutPhase,
};
use klingel_protocol::{Payload, SignalingMessage};

use crate::channel::SignalingChannel;
use crate::config::AushandlungsEinstellungen;
use crate::reconnect::NichtBereitFolge;

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Phase der Aushandlung
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    OfferSent,
    AwaitingAnswer,
    AwaitingSession,
    AwaitingMediaStart,
    Active,
    Failed,
    Closed,
}

impl Phase {
    fn ist_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Was der Aufrufer nach einer eingehenden Nachricht tun muss
#[derive(Debug, Clone, PartialEq)]
pub enum Aktion {
    /// Nichts (fremder Dialog, bereits durchlaufene Phase)
    Keine,
    /// SDP-Answer an die Medien-Engine uebergeben
    AnswerAnwenden(String),
    /// Remote-Kandidat an die Medien-Engine uebergeben
    KandidatHinzufuegen(IceCandidate),
    /// Session-Credential wurde gespeichert
    SessionErstellt,
    /// Kamera sendet, Aushandlung abgeschlossen
    MediaGestartet,
    /// Statusmeldung der Gegenstelle
    Benachrichtigung(String),
    /// Gegenstelle noch nicht bereit (Code 26), Dialog bleibt offen
    NichtBereit(LiveViewError),
    /// Gegenstelle hat geschlossen
    Geschlossen(LiveViewError),
}

// ---------------------------------------------------------------------------
// NegotiationCoordinator
// ---------------------------------------------------------------------------

/// Zustandsmaschine einer einzelnen Aushandlung (eine DialogId)
#[derive(Debug)]
pub struct NegotiationCoordinator {
    dialog: DialogId,
    device: DeviceId,
    phase: Phase,
    credential: Option<SessionCredential>,
}

impl NegotiationCoordinator {
    /// Neue Aushandlung mit frischer DialogId
    pub fn neu(device: DeviceId) -> Self {
        Self::mit_dialog(DialogId::new(), device)
    }

    pub fn mit_dialog(dialog: DialogId, device: DeviceId) -> Self {
        Self {
            dialog,
            device,
            phase: Phase::Idle,
            credential: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn dialog_id(&self) -> &DialogId {
        &self.dialog
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn credential(&self) -> Option<&SessionCredential> {
        self.credential.as_ref()
    }

    /// Phase in der ein Zeitlimit gerade liefe
    pub fn timeout_phase(&self) -> TimeoutPhase {
        match self.phase {
            Phase::Idle | Phase::OfferSent | Phase::AwaitingAnswer => TimeoutPhase::Answer,
            _ => TimeoutPhase::MediaStart,
        }
    }

    /// Erzeugt das Offer; nur einmal pro Dialog erlaubt
    pub fn offer_senden(&mut self, sdp: &str) -> LiveViewResult<SignalingMessage> {
        if self.phase != Phase::Idle {
            return Err(LiveViewError::protokoll(format!(
                "Offer fuer {} bereits gesendet (Phase {:?})",
                self.dialog, self.phase
            )));
        }
        self.phase = Phase::OfferSent;
        Ok(SignalingMessage::offer(self.dialog.clone(), self.device, sdp))
    }

    /// Offer ist auf dem Draht
    pub fn offer_gesendet(&mut self) {
        if self.phase == Phase::OfferSent {
            self.phase = Phase::AwaitingAnswer;
        }
    }

    /// Lokale Kandidaten als Nachricht; erst nach dem Offer
    pub fn kandidat_nachricht(&self, kandidat: IceCandidate) -> Option<SignalingMessage> {
        if self.phase == Phase::Idle || self.phase.ist_terminal() {
            return None;
        }
        Some(SignalingMessage::candidate(
            self.dialog.clone(),
            self.device,
            kandidat,
        ))
    }

    /// Keepalive mit dem aktuellen Credential
    pub fn ping_nachricht(&self) -> Option<SignalingMessage> {
        if self.phase != Phase::Active {
            return None;
        }
        let credential = self.credential.clone()?;
        Some(SignalingMessage::ping(
            self.dialog.clone(),
            self.device,
            credential,
        ))
    }

    /// Bewertet eine eingehende Nachricht
    ///
    /// Ein `Err` lehnt die Nachricht ab ohne die Phase zu aendern.
    pub fn verarbeiten(&mut self, nachricht: &SignalingMessage) -> LiveViewResult<Aktion> {
        if self.phase.ist_terminal() {
            return Ok(Aktion::Keine);
        }
        if !nachricht.gehoert_zu(&self.dialog) {
            tracing::debug!(
                dialog_id = %self.dialog,
                fremd = ?nachricht.dialog_id,
                methode = %nachricht.methode(),
                "Nachricht fuer fremden Dialog verworfen"
            );
            return Ok(Aktion::Keine);
        }

        match &nachricht.payload {
            Payload::Close(grund) => {
                let (code, text) = grund
                    .as_ref()
                    .map(|g| (g.code, g.text.clone()))
                    .unwrap_or_default();
                let fehler = LiveViewError::RemoteClose { code, text };
                if fehler.ist_nicht_bereit() {
                    return Ok(Aktion::NichtBereit(fehler));
                }
                self.phase = Phase::Failed;
                Ok(Aktion::Geschlossen(fehler))
            }

            Payload::Notification(body) => Ok(Aktion::Benachrichtigung(body.text.clone())),

            Payload::Candidate(body) => {
                self.mindestens(Phase::OfferSent, "icecandidate")?;
                Ok(Aktion::KandidatHinzufuegen(body.candidate.clone()))
            }

            Payload::Answer(body) => {
                self.mindestens(Phase::OfferSent, "answer")?;
                if self.phase >= Phase::AwaitingSession {
                    return Ok(Aktion::Keine);
                }
                self.phase = Phase::AwaitingSession;
                Ok(Aktion::AnswerAnwenden(body.sdp.clone()))
            }

            Payload::SessionCreated(body) => {
                self.mindestens(Phase::AwaitingSession, "session_created")?;
                if self.phase >= Phase::AwaitingMediaStart {
                    return Ok(Aktion::Keine);
                }
                self.credential = Some(body.session_id.clone());
                self.phase = Phase::AwaitingMediaStart;
                Ok(Aktion::SessionErstellt)
            }

            Payload::MediaStarted => {
                self.mindestens(Phase::AwaitingMediaStart, "camera_started")?;
                if self.phase >= Phase::Active {
                    return Ok(Aktion::Keine);
                }
                self.phase = Phase::Active;
                Ok(Aktion::MediaGestartet)
            }

            // Offer und Ping kommen nur von diesem Client
            Payload::Offer(_) | Payload::Ping(_) => Ok(Aktion::Keine),
        }
    }

    /// Aushandlung ist gescheitert
    pub fn fehlgeschlagen(&mut self) {
        if !self.phase.ist_terminal() {
            self.phase = Phase::Failed;
        }
    }

    /// Lokal geordnet beendet; das Credential verfaellt
    pub fn schliessen(&mut self) {
        self.phase = Phase::Closed;
        self.credential = None;
    }

    fn mindestens(&self, phase: Phase, methode: &str) -> LiveViewResult<()> {
        if self.phase < phase {
            return Err(LiveViewError::protokoll(format!(
                "'{methode}' in Phase {:?} nicht erwartet",
                self.phase
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Treiber
// ---------------------------------------------------------------------------

/// Wartet bis `stop` auf `true` steht oder der Sender verschwindet
pub(crate) async fn gestoppt(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|s| *s).await;
}

/// Fuehrt die Aushandlung bis `Active` durch
///
/// Sendet das Offer, tauscht Kandidaten in beide Richtungen aus und wendet
/// die Answer an. Liefert das Session-Credential fuer die Keepalives.
///
/// Das Zeitlimit fuer die Answer laeuft ab dem Offer. Answer und
/// `session_created` starten jeweils das Medienstart-Zeitlimit neu.
/// "Noch nicht bereit" wartet auf demselben Dialog, begrenzt durch `nicht_bereit`.
#[allow(clippy::too_many_arguments)]
pub async fn negotiate(
    kanal: &mut SignalingChannel,
    engine: &dyn MediaEngine,
    koordinator: &mut NegotiationCoordinator,
    offer_sdp: &str,
    kandidaten: &mut mpsc::Receiver<IceCandidate>,
    config: &AushandlungsEinstellungen,
    nicht_bereit: &mut NichtBereitFolge,
    stop: &mut watch::Receiver<bool>,
) -> LiveViewResult<SessionCredential> {
    let ergebnis = aushandeln(
        kanal,
        engine,
        koordinator,
        offer_sdp,
        kandidaten,
        config,
        nicht_bereit,
        stop,
    )
    .await;
    if ergebnis.is_err() {
        koordinator.fehlgeschlagen();
    }
    ergebnis
}

#[allow(clippy::too_many_arguments)]
async fn aushandeln(
    kanal: &mut SignalingChannel,
    engine: &dyn MediaEngine,
    koordinator: &mut NegotiationCoordinator,
    offer_sdp: &str,
    kandidaten: &mut mpsc::Receiver<IceCandidate>,
    config: &AushandlungsEinstellungen,
    nicht_bereit: &mut NichtBereitFolge,
    stop: &mut watch::Receiver<bool>,
) -> LiveViewResult<SessionCredential> {
    let offer = koordinator.offer_senden(offer_sdp)?;
    kanal.send(&offer).await?;
    koordinator.offer_gesendet();
    tracing::info!(
        dialog_id = %koordinator.dialog_id(),
        device_id = %koordinator.device(),
        "Offer gesendet"
    );

    let mut frist = Instant::now() + config.answer_timeout();
    let mut protokollfehler = 0u32;
    let mut kandidaten_offen = true;

    loop {
        tokio::select! {
            biased;

            _ = gestoppt(stop) => return Err(LiveViewError::Stopped),

            _ = tokio::time::sleep_until(frist) => {
                let phase = koordinator.timeout_phase();
                tracing::warn!(
                    dialog_id = %koordinator.dialog_id(),
                    %phase,
                    "Aushandlung: Zeitlimit"
                );
                return Err(LiveViewError::NegotiationTimeout { phase });
            }

            kandidat = kandidaten.recv(), if kandidaten_offen => match kandidat {
                Some(k) => {
                    if let Some(msg) = koordinator.kandidat_nachricht(k) {
                        if let Err(e) = kanal.send(&msg).await {
                            tracing::warn!(fehler = %e, "Lokaler Kandidat nicht gesendet");
                        }
                    }
                }
                None => kandidaten_offen = false,
            },

            eingang = kanal.next_message() => {
                let nachricht = match eingang {
                    None => {
                        return Err(LiveViewError::ConnectionLost(
                            "Signalisierungs-Socket waehrend der Aushandlung geschlossen".into(),
                        ))
                    }
                    Some(Err(e)) => {
                        protokollfehler += 1;
                        if protokollfehler > config.max_protokollfehler {
                            return Err(e.into());
                        }
                        continue;
                    }
                    Some(Ok(n)) => n,
                };

                let aktion = match koordinator.verarbeiten(&nachricht) {
                    Ok(a) => a,
                    Err(e) => {
                        protokollfehler += 1;
                        tracing::warn!(
                            dialog_id = %koordinator.dialog_id(),
                            fehler = %e,
                            anzahl = protokollfehler,
                            "Nachricht ausserhalb der Reihenfolge abgelehnt"
                        );
                        if protokollfehler > config.max_protokollfehler {
                            return Err(e);
                        }
                        continue;
                    }
                };

                match aktion {
                    Aktion::Keine => {}
                    Aktion::AnswerAnwenden(sdp) => {
                        engine.apply_answer(&sdp).await?;
                        nicht_bereit.zuruecksetzen();
                        frist = Instant::now() + config.media_start_timeout();
                        tracing::info!(dialog_id = %koordinator.dialog_id(), "Answer angewendet");
                    }
                    Aktion::KandidatHinzufuegen(k) => {
                        if let Err(e) = engine.add_remote_candidate(k).await {
                            tracing::warn!(fehler = %e, "Remote-Kandidat abgelehnt");
                        }
                    }
                    Aktion::SessionErstellt => {
                        nicht_bereit.zuruecksetzen();
                        frist = Instant::now() + config.media_start_timeout();
                        let session = koordinator.credential().map(|c| c.kurz());
                        tracing::info!(
                            dialog_id = %koordinator.dialog_id(),
                            session = session.unwrap_or_default(),
                            "Session erstellt"
                        );
                    }
                    Aktion::Benachrichtigung(text) => {
                        tracing::info!(
                            dialog_id = %koordinator.dialog_id(),
                            %text,
                            "Benachrichtigung"
                        );
                    }
                    Aktion::NichtBereit(e) => {
                        let Some(warten) = nicht_bereit.naechste() else {
                            tracing::warn!(
                                dialog_id = %koordinator.dialog_id(),
                                folge = nicht_bereit.folge(),
                                "Gegenstelle bleibt nicht bereit"
                            );
                            return Err(e);
                        };
                        tracing::debug!(
                            dialog_id = %koordinator.dialog_id(),
                            folge = nicht_bereit.folge(),
                            warten_ms = warten.as_millis() as u64,
                            "Gegenstelle noch nicht bereit"
                        );
                        tokio::select! {
                            biased;
                            _ = gestoppt(stop) => return Err(LiveViewError::Stopped),
                            _ = tokio::time::sleep(warten) => {}
                        }
                    }
                    Aktion::MediaGestartet => {
                        nicht_bereit.zuruecksetzen();
                        tracing::info!(dialog_id = %koordinator.dialog_id(), "Kamera gestartet");
                        return koordinator
                            .credential()
                            .cloned()
                            .ok_or_else(|| LiveViewError::intern("Aktiv ohne Session-Credential"));
                    }
                    Aktion::Geschlossen(e) => {
                        tracing::warn!(
                            dialog_id = %koordinator.dialog_id(),
                            fehler = %e,
                            "Gegenstelle hat geschlossen"
                        );
                        return Err(e);
                    }
                }
            }
        }
    }
}
