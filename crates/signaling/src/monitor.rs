//! SessionMonitor – Keepalive und Verbindungsueberwachung
//!
//! Laeuft ab `Active` in einem eigenen Task und besitzt solange den
//! Signalisierungs-Kanal. Beobachtungen gehen als `SessionEvent` an den
//! Session-Task; der Monitor schreibt nie selbst den Verbindungszustand.
//!
//! ## Keepalive
//! - `ping` im festen Intervall, der erste sofort
//! - Sendefehler und ein gescheiterter Medien-Transport zaehlen als
//!   Keepalive-Fehler (hoechstens einer pro Intervall)
//! - nach `max_keepalive_fehler` Fehlern in Folge: `Degradiert`
//! - Socket-Ende: sofort `Degradiert`
//!
//! "Noch nicht bereit" (Code 26) haelt die Ueberwachung kurz an und laesst
//! den Dialog bestehen, bis die `NichtBereitFolge` erschoepft ist.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use klingel_core::{
    IceCandidate, LiveViewError, MediaEngine, SessionEvent, TransportZustand,
};

use crate::channel::SignalingChannel;
use crate::config::MonitorEinstellungen;
use crate::negotiation::{gestoppt, Aktion, NegotiationCoordinator};
use crate::reconnect::NichtBereitFolge;

/// Alles was der Monitor fuer einen aktiven Versuch braucht
pub struct SessionMonitor {
    pub kanal: SignalingChannel,
    pub koordinator: NegotiationCoordinator,
    pub engine: Arc<dyn MediaEngine>,
    pub kandidaten: mpsc::Receiver<IceCandidate>,
    pub transport: watch::Receiver<TransportZustand>,
    pub config: MonitorEinstellungen,
    /// Ende der maximalen Session-Dauer
    pub max_ende: Instant,
    /// Tolerierte fehlerhafte Nachrichten
    pub max_protokollfehler: u32,
    /// Stand aus der Aushandlung desselben Dialogs
    pub nicht_bereit: NichtBereitFolge,
    pub ereignisse: mpsc::Sender<SessionEvent>,
    pub stop: watch::Receiver<bool>,
}

/// Rueckgabe nach Ende der Ueberwachung
pub struct MonitorEnde {
    pub kanal: SignalingChannel,
    pub koordinator: NegotiationCoordinator,
}

impl SessionMonitor {
    /// Startet den Monitor als eigenen Task
    pub fn starten(self) -> tokio::task::JoinHandle<MonitorEnde> {
        tokio::spawn(self.ausfuehren())
    }

    /// Ueberwacht bis Stopp, Stoerung, `close` oder maximale Dauer
    pub async fn ausfuehren(mut self) -> MonitorEnde {
        let dialog = self.koordinator.dialog_id().clone();
        let mut takt = tokio::time::interval(self.config.keepalive());
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut keepalive_fehler = 0u32;
        let mut gesendet = 0u64;
        let mut protokollfehler = 0u32;
        let mut kandidaten_offen = true;
        let mut transport_offen = true;

        tracing::info!(dialog_id = %dialog, "Session-Ueberwachung gestartet");

        let ereignis: Option<SessionEvent> = loop {
            tokio::select! {
                biased;

                _ = gestoppt(&mut self.stop) => break None,

                _ = tokio::time::sleep_until(self.max_ende) => {
                    tracing::info!(dialog_id = %dialog, "Maximale Session-Dauer erreicht");
                    break Some(SessionEvent::MaxDauerErreicht);
                }

                _ = takt.tick() => {
                    let transport_defekt = matches!(
                        *self.transport.borrow(),
                        TransportZustand::Fehlgeschlagen | TransportZustand::Geschlossen
                    );
                    let ping_ok = match self.koordinator.ping_nachricht() {
                        Some(ping) => match self.kanal.send(&ping).await {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::warn!(
                                    dialog_id = %dialog,
                                    fehler = %e,
                                    "Keepalive fehlgeschlagen"
                                );
                                false
                            }
                        },
                        None => false,
                    };
                    if ping_ok {
                        gesendet += 1;
                        let _ = self
                            .ereignisse
                            .try_send(SessionEvent::KeepaliveGesendet { anzahl: gesendet });
                    }

                    if ping_ok && !transport_defekt {
                        keepalive_fehler = 0;
                    } else {
                        keepalive_fehler += 1;
                        tracing::warn!(
                            dialog_id = %dialog,
                            fehler = keepalive_fehler,
                            max = self.config.max_keepalive_fehler,
                            transport_defekt,
                            "Keepalive-Fehler"
                        );
                        if keepalive_fehler >= self.config.max_keepalive_fehler {
                            break Some(SessionEvent::Degradiert(LiveViewError::ConnectionLost(
                                format!("{keepalive_fehler} Keepalive-Fehler in Folge"),
                            )));
                        }
                    }
                }

                res = self.transport.changed(), if transport_offen => {
                    if res.is_err() {
                        transport_offen = false;
                        continue;
                    }
                    let zustand = *self.transport.borrow_and_update();
                    match zustand {
                        TransportZustand::Fehlgeschlagen => {
                            tracing::warn!(dialog_id = %dialog, "Medien-Transport fehlgeschlagen");
                        }
                        TransportZustand::Getrennt => {
                            tracing::info!(dialog_id = %dialog, "Medien-Transport getrennt");
                        }
                        andere => {
                            tracing::debug!(dialog_id = %dialog, zustand = ?andere, "Transport");
                        }
                    }
                }

                kandidat = self.kandidaten.recv(), if kandidaten_offen => match kandidat {
                    Some(k) => {
                        if let Some(msg) = self.koordinator.kandidat_nachricht(k) {
                            if let Err(e) = self.kanal.send(&msg).await {
                                tracing::debug!(fehler = %e, "Spaeter Kandidat nicht gesendet");
                            }
                        }
                    }
                    None => kandidaten_offen = false,
                },

                eingang = self.kanal.next_message() => {
                    let nachricht = match eingang {
                        None => {
                            tracing::warn!(dialog_id = %dialog, "Socket geschlossen");
                            break Some(SessionEvent::Degradiert(LiveViewError::ConnectionLost(
                                "Signalisierungs-Socket geschlossen".into(),
                            )));
                        }
                        Some(Err(e)) => {
                            protokollfehler += 1;
                            if protokollfehler > self.max_protokollfehler {
                                break Some(SessionEvent::Degradiert(e.into()));
                            }
                            continue;
                        }
                        Some(Ok(n)) => n,
                    };

                    match self.koordinator.verarbeiten(&nachricht) {
                        Ok(Aktion::Geschlossen(e)) => {
                            tracing::warn!(
                                dialog_id = %dialog,
                                fehler = %e,
                                "Gegenstelle hat aktive Session geschlossen"
                            );
                            break Some(SessionEvent::RemoteGeschlossen(e));
                        }
                        Ok(Aktion::NichtBereit(e)) => {
                            let Some(warten) = self.nicht_bereit.naechste() else {
                                tracing::warn!(
                                    dialog_id = %dialog,
                                    folge = self.nicht_bereit.folge(),
                                    "Gegenstelle bleibt nicht bereit"
                                );
                                self.koordinator.fehlgeschlagen();
                                break Some(SessionEvent::RemoteGeschlossen(e));
                            };
                            tracing::debug!(
                                dialog_id = %dialog,
                                folge = self.nicht_bereit.folge(),
                                warten_ms = warten.as_millis() as u64,
                                "Gegenstelle noch nicht bereit"
                            );
                            let gestoppt_waehrend = tokio::select! {
                                biased;
                                _ = gestoppt(&mut self.stop) => true,
                                _ = tokio::time::sleep(warten) => false,
                            };
                            if gestoppt_waehrend {
                                break None;
                            }
                        }
                        Ok(Aktion::KandidatHinzufuegen(k)) => {
                            self.nicht_bereit.zuruecksetzen();
                            if let Err(e) = self.engine.add_remote_candidate(k).await {
                                tracing::warn!(fehler = %e, "Remote-Kandidat abgelehnt");
                            }
                        }
                        Ok(Aktion::Benachrichtigung(text)) => {
                            self.nicht_bereit.zuruecksetzen();
                            tracing::info!(dialog_id = %dialog, %text, "Benachrichtigung");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            protokollfehler += 1;
                            tracing::warn!(dialog_id = %dialog, fehler = %e, "Nachricht abgelehnt");
                            if protokollfehler > self.max_protokollfehler {
                                break Some(SessionEvent::Degradiert(e));
                            }
                        }
                    }
                }
            }
        };

        if let Some(ereignis) = ereignis {
            // Der Session-Task wartet auf dieses Ereignis
            let _ = self.ereignisse.send(ereignis).await;
        }
        tracing::debug!(dialog_id = %dialog, pings = gesendet, "Session-Ueberwachung beendet");

        MonitorEnde {
            kanal: self.kanal,
            koordinator: self.koordinator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::TransportKanaele;
    use crate::config::ReconnectEinstellungen;
    use async_trait::async_trait;
    use klingel_core::{DeviceId, DialogId, LiveViewResult, MedienAngebot};
    use klingel_protocol::{Payload, SessionCreatedBody, SignalingMessage};
    use std::time::Duration;

    struct LeereEngine;

    #[async_trait]
    impl MediaEngine for LeereEngine {
        async fn create_offer(&self) -> LiveViewResult<MedienAngebot> {
            Err(LiveViewError::medien("nicht benutzt"))
        }
        async fn apply_answer(&self, _sdp: &str) -> LiveViewResult<()> {
            Ok(())
        }
        async fn add_remote_candidate(&self, _k: IceCandidate) -> LiveViewResult<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    struct Aufbau {
        monitor: SessionMonitor,
        gegenstelle_ein: mpsc::Receiver<String>,
        gegenstelle_aus: mpsc::Sender<String>,
        transport_tx: watch::Sender<TransportZustand>,
        ereignisse: mpsc::Receiver<SessionEvent>,
        _stop_tx: watch::Sender<bool>,
        _kandidaten_tx: mpsc::Sender<IceCandidate>,
    }

    fn aktiver_koordinator() -> NegotiationCoordinator {
        let d = DialogId("m".into());
        let mut k = NegotiationCoordinator::mit_dialog(d.clone(), DeviceId(589851570));
        k.offer_senden("v=0").unwrap();
        k.offer_gesendet();
        let m = |p| SignalingMessage::mit_payload(Some(d.clone()), p);
        k.verarbeiten(&m(Payload::Answer(klingel_protocol::AnswerBody { sdp: "a".into() })))
            .unwrap();
        k.verarbeiten(&m(Payload::SessionCreated(SessionCreatedBody {
            session_id: klingel_core::SessionCredential("jwt".into()),
        })))
        .unwrap();
        k.verarbeiten(&m(Payload::MediaStarted)).unwrap();
        k
    }

    fn aufbauen(max_dauer: Duration) -> Aufbau {
        let (aus_tx, aus_rx) = mpsc::channel(64);
        let (ein_tx, ein_rx) = mpsc::channel(64);
        let (transport_tx, transport_rx) = watch::channel(TransportZustand::Verbunden);
        let (ereignis_tx, ereignis_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (kand_tx, kand_rx) = mpsc::channel(8);
        let monitor = SessionMonitor {
            kanal: SignalingChannel::aus_transport(
                TransportKanaele {
                    ausgang: aus_tx,
                    eingang: ein_rx,
                },
                Duration::from_secs(1),
            ),
            koordinator: aktiver_koordinator(),
            engine: Arc::new(LeereEngine),
            kandidaten: kand_rx,
            transport: transport_rx,
            config: MonitorEinstellungen::default(),
            max_ende: Instant::now() + max_dauer,
            max_protokollfehler: 3,
            nicht_bereit: NichtBereitFolge::neu(&ReconnectEinstellungen {
                max_nicht_bereit: 2,
                ..Default::default()
            }),
            ereignisse: ereignis_tx,
            stop: stop_rx,
        };
        Aufbau {
            monitor,
            gegenstelle_ein: aus_rx,
            gegenstelle_aus: ein_tx,
            transport_tx,
            ereignisse: ereignis_rx,
            _stop_tx: stop_tx,
            _kandidaten_tx: kand_tx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sendet_pings_im_intervall() {
        let mut a = aufbauen(Duration::from_secs(590));
        let handle = a.monitor.starten();

        let erster = a.gegenstelle_ein.recv().await.unwrap();
        assert!(erster.contains("\"method\":\"ping\""));
        assert!(erster.contains("\"session_id\":\"jwt\""));
        assert!(erster.contains("\"doorbot_id\":589851570"));

        let start = Instant::now();
        let _zweiter = a.gegenstelle_ein.recv().await.unwrap();
        let abstand = start.elapsed();
        assert!(abstand >= Duration::from_secs(5) && abstand < Duration::from_secs(6));

        drop(a.gegenstelle_aus);
        let ende = handle.await.unwrap();
        assert_eq!(ende.koordinator.dialog_id().as_str(), "m");
    }

    #[tokio::test(start_paused = true)]
    async fn socket_ende_degradiert_sofort() {
        let mut a = aufbauen(Duration::from_secs(590));
        drop(a.gegenstelle_aus);
        let _handle = a.monitor.starten();

        loop {
            match a.ereignisse.recv().await.unwrap() {
                SessionEvent::KeepaliveGesendet { .. } => continue,
                SessionEvent::Degradiert(LiveViewError::ConnectionLost(_)) => break,
                anderes => panic!("Unerwartet: {anderes:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_fehler_zaehlt_wie_keepalive_fehler() {
        let mut a = aufbauen(Duration::from_secs(590));
        a.transport_tx.send(TransportZustand::Fehlgeschlagen).unwrap();
        let start = Instant::now();
        let _handle = a.monitor.starten();

        loop {
            match a.ereignisse.recv().await.unwrap() {
                SessionEvent::KeepaliveGesendet { .. } => continue,
                SessionEvent::Degradiert(_) => break,
                anderes => panic!("Unerwartet: {anderes:?}"),
            }
        }
        // Ticks bei 0 s, 5 s und 10 s
        let dauer = start.elapsed();
        assert!(dauer >= Duration::from_secs(10) && dauer < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn getrennt_wird_nur_protokolliert() {
        let mut a = aufbauen(Duration::from_secs(30));
        a.transport_tx.send(TransportZustand::Getrennt).unwrap();
        let _handle = a.monitor.starten();

        loop {
            match a.ereignisse.recv().await.unwrap() {
                SessionEvent::KeepaliveGesendet { .. } => continue,
                SessionEvent::MaxDauerErreicht => break,
                anderes => panic!("Unerwartet: {anderes:?}"),
            }
        }
    }

    fn close(dialog: &str, code: u32) -> String {
        format!(
            r#"{{"method":"close","dialog_id":"{dialog}","body":{{"reason":{{"code":{code},"text":"x"}}}}}}"#
        )
    }

    #[tokio::test(start_paused = true)]
    async fn close_der_gegenstelle() {
        let mut a = aufbauen(Duration::from_secs(590));
        a.gegenstelle_aus.send(close("m", 7)).await.unwrap();
        let _handle = a.monitor.starten();

        loop {
            match a.ereignisse.recv().await.unwrap() {
                SessionEvent::KeepaliveGesendet { .. } => continue,
                SessionEvent::RemoteGeschlossen(LiveViewError::RemoteClose { code, .. }) => {
                    assert_eq!(code, Some(7));
                    break;
                }
                anderes => panic!("Unerwartet: {anderes:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nicht_bereit_haelt_den_dialog() {
        let mut a = aufbauen(Duration::from_secs(12));
        a.gegenstelle_aus.send(close("m", 26)).await.unwrap();
        let handle = a.monitor.starten();

        // Pings laufen auf demselben Kanal weiter bis zur maximalen Dauer
        loop {
            match a.ereignisse.recv().await.unwrap() {
                SessionEvent::KeepaliveGesendet { .. } => continue,
                SessionEvent::MaxDauerErreicht => break,
                anderes => panic!("Unerwartet: {anderes:?}"),
            }
        }
        let mut pings = 0;
        while let Ok(text) = a.gegenstelle_ein.try_recv() {
            assert!(text.contains("\"dialog_id\":\"m\""));
            pings += 1;
        }
        assert!(pings >= 3, "nur {pings} Pings");
        let ende = handle.await.unwrap();
        assert_eq!(ende.koordinator.phase(), crate::negotiation::Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn nicht_bereit_folge_erschoepft() {
        let mut a = aufbauen(Duration::from_secs(590));
        for _ in 0..3 {
            a.gegenstelle_aus.send(close("m", 26)).await.unwrap();
        }
        let handle = a.monitor.starten();

        loop {
            match a.ereignisse.recv().await.unwrap() {
                SessionEvent::KeepaliveGesendet { .. } => continue,
                SessionEvent::RemoteGeschlossen(e) => {
                    assert!(e.ist_nicht_bereit());
                    break;
                }
                anderes => panic!("Unerwartet: {anderes:?}"),
            }
        }
        let ende = handle.await.unwrap();
        assert_eq!(ende.koordinator.phase(), crate::negotiation::Phase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_fremder_dialog_ignoriert() {
        let mut a = aufbauen(Duration::from_secs(12));
        a.gegenstelle_aus.send(close("alt", 5)).await.unwrap();
        let _handle = a.monitor.starten();

        loop {
            match a.ereignisse.recv().await.unwrap() {
                SessionEvent::KeepaliveGesendet { .. } => continue,
                SessionEvent::MaxDauerErreicht => break,
                anderes => panic!("Unerwartet: {anderes:?}"),
            }
        }
    }
}
