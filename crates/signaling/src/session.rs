//! LiveSession – Fassade fuer eine Live-View-Session
//!
//! Setzt TicketManager, SignalingChannel, NegotiationCoordinator,
//! SessionMonitor und ReconnectPolicy zusammen.
//!
//! ## Tasks
//! ```text
//! Session-Task (einziger Schreiber von ConnectionState)
//!     |
//!     +-- SessionMonitor   (Keepalive, Transport, eingehende Nachrichten)
//!     |        | SessionEvent (mpsc)
//!     |        v
//!     +-- Frame-Pumpe      (Engine -> FrameSink, nur in `Active`)
//!
//! Ticket-Erneuerung        (periodisch, bis Stopp)
//! ```
//!
//! `stop()` setzt das Stopp-Signal, schliesst das Tor zur Sink und wartet
//! hoechstens die Gnadenfrist auf die Tasks.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use klingel_auth::{CredentialProvider, HttpTicketIssuer, Ticket, TicketManager};
use klingel_core::{
    ConnectionState, DeviceId, FrameSink, LiveViewError, LiveViewResult, MediaEngine,
    MediaEngineFactory, MedienAngebot, SessionEvent, TimeoutPhase, VideoFrame,
};

use crate::channel::{Connector, SignalingChannel, WsConnector};
use crate::config::SessionOptions;
use crate::endpoint::{EndpointResolver, RegionEndpoint};
use crate::error::{SignalingError, SignalingResult};
use crate::monitor::{MonitorEnde, SessionMonitor};
use crate::negotiation::{gestoppt, negotiate, NegotiationCoordinator};
use crate::reconnect::{Entscheidung, NichtBereitFolge, ReconnectPolicy};

/// Puffer fuer Monitor-Ereignisse
const EREIGNIS_PUFFER: usize = 32;

/// Frame-Statistik alle N Frames protokollieren
const STATISTIK_INTERVALL: u64 = 100;

// ---------------------------------------------------------------------------
// Komponenten
// ---------------------------------------------------------------------------

/// Externe Kollaborateure einer Session
#[derive(Clone)]
pub struct SessionKomponenten {
    pub tickets: Arc<TicketManager>,
    pub connector: Arc<dyn Connector>,
    pub endpoint: Arc<dyn EndpointResolver>,
    pub medien: Arc<dyn MediaEngineFactory>,
}

impl SessionKomponenten {
    /// Produktive Komponenten: HTTPS-Tickets, WebSocket, regionaler Endpunkt
    pub fn standard(
        credentials: Arc<dyn CredentialProvider>,
        medien: Arc<dyn MediaEngineFactory>,
        optionen: &SessionOptions,
    ) -> LiveViewResult<Self> {
        let issuer = HttpTicketIssuer::neu(credentials, &optionen.verbindung.user_agent)?;
        Ok(Self {
            tickets: TicketManager::neu(Arc::new(issuer), optionen.ticket.clone()),
            connector: Arc::new(WsConnector::neu(
                optionen.verbindung.user_agent.clone(),
                optionen.verbindung.connect_timeout(),
            )),
            endpoint: Arc::new(RegionEndpoint::neu()),
            medien,
        })
    }
}

// ---------------------------------------------------------------------------
// LiveSession
// ---------------------------------------------------------------------------

/// Gemeinsamer Zustand von Fassade und Session-Task
struct Geteilt {
    device: DeviceId,
    komponenten: SessionKomponenten,
    sink: Arc<dyn FrameSink>,
    optionen: SessionOptions,
    zustand: watch::Sender<ConnectionState>,
    stop: watch::Sender<bool>,
    /// `Some` sobald die Session beendet ist
    ergebnis: watch::Sender<Option<LiveViewResult<()>>>,
    versuche: AtomicU32,
    /// `false` nach `stop()`; Sink-Aufrufe halten die Lesesperre
    sink_tor: RwLock<bool>,
}

struct Laufzeit {
    session_task: JoinHandle<()>,
    erneuerung: JoinHandle<()>,
}

/// Eine Live-View-Session fuer genau ein Geraet
pub struct LiveSession {
    geteilt: Arc<Geteilt>,
    laufzeit: Mutex<Option<Laufzeit>>,
}

impl LiveSession {
    pub fn neu(
        device: DeviceId,
        komponenten: SessionKomponenten,
        sink: Arc<dyn FrameSink>,
        optionen: SessionOptions,
    ) -> Self {
        let (zustand, _) = watch::channel(ConnectionState::Idle);
        let (stop, _) = watch::channel(false);
        let (ergebnis, _) = watch::channel(None);
        Self {
            geteilt: Arc::new(Geteilt {
                device,
                komponenten,
                sink,
                optionen,
                zustand,
                stop,
                ergebnis,
                versuche: AtomicU32::new(0),
                sink_tor: RwLock::new(false),
            }),
            laufzeit: Mutex::new(None),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.geteilt.device
    }

    /// Beobachtbarer Verbindungszustand
    pub fn zustand(&self) -> watch::Receiver<ConnectionState> {
        self.geteilt.zustand.subscribe()
    }

    /// Angerechnete Wiederholungsversuche seit dem letzten `Active`
    pub fn versuche(&self) -> u32 {
        self.geteilt.versuche.load(Ordering::SeqCst)
    }

    /// Startet die Session und wartet auf den ersten Zustand `Active`
    ///
    /// Wiederholungen laufen innerhalb des Start-Zeitlimits. Endet die
    /// Session vorher endgueltig, wird deren Fehler zurueckgegeben. Nach
    /// Ablauf des Zeitlimits wird die Session gestoppt. Ungueltige Optionen
    /// liefern `InvalidOptions` ohne Verbindungsversuch.
    pub async fn start(&self) -> LiveViewResult<()> {
        self.geteilt.optionen.pruefen()?;
        {
            let mut laufzeit = self.laufzeit.lock().await;
            if let Some(l) = laufzeit.as_ref() {
                if !l.session_task.is_finished() {
                    return Err(LiveViewError::intern("Session laeuft bereits"));
                }
            }

            let g = &self.geteilt;
            g.stop.send_replace(false);
            g.ergebnis.send_replace(None);
            g.zustand.send_replace(ConnectionState::Idle);
            g.versuche.store(0, Ordering::SeqCst);
            *g.sink_tor.write() = true;

            tracing::info!(device_id = %g.device, "Starte Live-View");
            let erneuerung = g.komponenten.tickets.erneuerung_starten(g.stop.subscribe());
            let session_task = tokio::spawn(
                SessionTask {
                    g: Arc::clone(&self.geteilt),
                }
                .ausfuehren(),
            );
            *laufzeit = Some(Laufzeit {
                session_task,
                erneuerung,
            });
        }

        let mut zustand = self.geteilt.zustand.subscribe();
        let frist = self.geteilt.optionen.aushandlung.start_timeout();
        let erreicht = tokio::time::timeout(
            frist,
            zustand.wait_for(|z| *z == ConnectionState::Active || z.ist_terminal()),
        )
        .await
        .map(|r| r.map(|z| *z));

        match erreicht {
            Ok(Ok(ConnectionState::Active)) => Ok(()),
            Ok(Ok(_)) => match self.geteilt.ergebnis.borrow().clone() {
                Some(Err(e)) => Err(e),
                _ => Err(LiveViewError::Stopped),
            },
            Ok(Err(_)) => Err(LiveViewError::intern("Zustandskanal geschlossen")),
            Err(_) => {
                tracing::warn!(
                    device_id = %self.geteilt.device,
                    frist_s = frist.as_secs(),
                    "Start-Zeitlimit ueberschritten"
                );
                self.stop().await;
                Err(LiveViewError::NegotiationTimeout {
                    phase: TimeoutPhase::Startup,
                })
            }
        }
    }

    /// Beendet die Session; mehrfacher Aufruf ist unschaedlich
    ///
    /// Nach der Rueckkehr wird die Sink nicht mehr aufgerufen.
    pub async fn stop(&self) {
        let g = &self.geteilt;
        // Flags nur unter der Laufzeit-Sperre; `start()` setzt sie dort zurueck
        let laufzeit = {
            let mut laufzeit = self.laufzeit.lock().await;
            g.stop.send_replace(true);
            // Wartet auf einen laufenden Sink-Aufruf
            *g.sink_tor.write() = false;
            laufzeit.take()
        };
        if let Some(l) = laufzeit {
            let frist = g.optionen.stop_gnadenfrist();
            task_beenden(l.session_task, frist, "Session-Task").await;
            task_beenden(l.erneuerung, frist, "Ticket-Erneuerung").await;
        }

        // Session-Task lief nie oder wurde abgebrochen
        g.ergebnis.send_if_modified(|e| {
            if e.is_none() {
                *e = Some(Ok(()));
                true
            } else {
                false
            }
        });
        g.zustand.send_if_modified(|z| {
            if z.ist_terminal() {
                false
            } else {
                *z = ConnectionState::Closed;
                true
            }
        });
    }

    /// Wartet bis die Session endet (Stopp, maximale Dauer, endgueltiger Fehler)
    ///
    /// Kehrt erst zurueck wenn der Endzustand gesetzt ist.
    pub async fn wait_finished(&self) -> LiveViewResult<()> {
        let mut zustand = self.geteilt.zustand.subscribe();
        zustand
            .wait_for(ConnectionState::ist_terminal)
            .await
            .map_err(|_| LiveViewError::intern("Zustandskanal geschlossen"))?;
        let ergebnis = self.geteilt.ergebnis.borrow().clone();
        ergebnis.unwrap_or(Ok(()))
    }
}

async fn task_beenden(mut handle: JoinHandle<()>, frist: Duration, name: &'static str) {
    if tokio::time::timeout(frist, &mut handle).await.is_err() {
        tracing::warn!(task = name, "Task reagiert nicht auf Stopp, wird abgebrochen");
        handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Session-Task
// ---------------------------------------------------------------------------

struct SessionTask {
    g: Arc<Geteilt>,
}

impl SessionTask {
    fn zustand(&self, neu: ConnectionState) {
        self.g.zustand.send_if_modified(|z| {
            if *z == neu {
                return false;
            }
            tracing::debug!(von = %z, nach = %neu, "Zustandswechsel");
            *z = neu;
            true
        });
    }

    fn gestoppt(&self) -> bool {
        *self.g.stop.borrow()
    }

    async fn ausfuehren(self) {
        let ergebnis = self.schleife().await;
        let endzustand = match &ergebnis {
            Ok(()) => {
                tracing::info!(device_id = %self.g.device, "Live-View beendet");
                self.zustand(ConnectionState::Closing);
                ConnectionState::Closed
            }
            Err(e) => {
                tracing::error!(
                    device_id = %self.g.device,
                    fehler = %e,
                    "Live-View endgueltig fehlgeschlagen"
                );
                ConnectionState::Failed
            }
        };
        // beendet auch die Ticket-Erneuerung
        self.g.stop.send_replace(true);
        self.g.ergebnis.send_replace(Some(ergebnis));
        self.zustand(endzustand);
    }

    async fn schleife(&self) -> LiveViewResult<()> {
        let mut stop = self.g.stop.subscribe();
        let mut policy = ReconnectPolicy::neu(self.g.optionen.reconnect.clone());
        let mut ticket: Option<Ticket> = None;
        let mut ticket_erneuern = false;
        let mut max_ende: Option<Instant> = None;

        loop {
            if self.gestoppt() {
                return Ok(());
            }
            self.zustand(ConnectionState::Connecting);

            let fehler = match self
                .versuch(&mut ticket, ticket_erneuern, &mut max_ende, &mut policy, &mut stop)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if self.gestoppt() || fehler == LiveViewError::Stopped {
                return Ok(());
            }

            match policy.bewerten(&fehler) {
                Entscheidung::Aufgeben(e) => return Err(e),
                Entscheidung::Wiederholen { warten } => {
                    self.zustand(ConnectionState::Degraded);
                    self.g.versuche.store(policy.versuche(), Ordering::SeqCst);
                    tracing::warn!(
                        device_id = %self.g.device,
                        attempt = policy.versuche(),
                        warten_ms = warten.as_millis() as u64,
                        fehler = %fehler,
                        "Verbindungsversuch gescheitert, neuer Versuch"
                    );
                    ticket_erneuern = true;
                    tokio::select! {
                        biased;
                        _ = gestoppt(&mut stop) => return Ok(()),
                        _ = tokio::time::sleep(warten) => {}
                    }
                }
            }
        }
    }

    /// Ein vollstaendiger Versuch: Ticket, Verbindung, Aushandlung, Ueberwachung
    ///
    /// `Ok` bedeutet geordnetes Ende (Stopp oder maximale Dauer).
    async fn versuch(
        &self,
        ticket: &mut Option<Ticket>,
        erneuern: bool,
        max_ende: &mut Option<Instant>,
        policy: &mut ReconnectPolicy,
        stop: &mut watch::Receiver<bool>,
    ) -> LiveViewResult<()> {
        let tickets = Arc::clone(&self.g.komponenten.tickets);

        let mut aktuell = abbrechbar(stop, async {
            let t = if erneuern {
                tickets.renew().await?
            } else {
                match ticket.as_ref() {
                    Some(t) => tickets.ensure_fresh(t).await?,
                    None => tickets.current().await?,
                }
            };
            Ok::<_, LiveViewError>(t)
        })
        .await?;

        let erster = abbrechbar(stop, async {
            Ok::<_, LiveViewError>(self.verbinden(&aktuell).await)
        })
        .await?;
        let kanal = match erster {
            Ok(k) => k,
            Err(e @ SignalingError::Verbindung { .. }) => {
                tracing::warn!(fehler = %e, "Handshake abgelehnt, erneuere Ticket");
                aktuell = abbrechbar(stop, async { Ok::<_, LiveViewError>(tickets.renew().await?) })
                    .await?;
                abbrechbar(stop, async {
                    Ok::<_, LiveViewError>(self.verbinden(&aktuell).await?)
                })
                .await?
            }
            Err(e) => return Err(e.into()),
        };
        *ticket = Some(aktuell);

        self.zustand(ConnectionState::Negotiating);
        let engine = self.g.komponenten.medien.erzeugen()?;
        let ergebnis = self
            .mit_engine(kanal, Arc::clone(&engine), max_ende, policy, stop)
            .await;
        engine.close().await;
        ergebnis
    }

    async fn verbinden(&self, ticket: &Ticket) -> SignalingResult<SignalingChannel> {
        let url = self.g.komponenten.endpoint.aufloesen(ticket)?;
        tracing::debug!(ticket = %ticket.kurz(), "Verbinde Signalisierungs-Kanal");
        SignalingChannel::connect(
            self.g.komponenten.connector.as_ref(),
            &url,
            self.g.optionen.verbindung.sende_timeout(),
        )
        .await
    }

    async fn mit_engine(
        &self,
        mut kanal: SignalingChannel,
        engine: Arc<dyn MediaEngine>,
        max_ende: &mut Option<Instant>,
        policy: &mut ReconnectPolicy,
        stop: &mut watch::Receiver<bool>,
    ) -> LiveViewResult<()> {
        let optionen = &self.g.optionen;
        let MedienAngebot {
            sdp,
            mut kandidaten,
            transport,
            frames,
        } = abbrechbar(stop, engine.create_offer()).await?;

        let mut koordinator = NegotiationCoordinator::neu(self.g.device);
        let mut nicht_bereit = NichtBereitFolge::neu(&optionen.reconnect);
        let credential = negotiate(
            &mut kanal,
            engine.as_ref(),
            &mut koordinator,
            &sdp,
            &mut kandidaten,
            &optionen.aushandlung,
            &mut nicht_bereit,
            stop,
        )
        .await?;

        policy.erfolgreich();
        self.g.versuche.store(0, Ordering::SeqCst);
        let max_ende =
            *max_ende.get_or_insert_with(|| Instant::now() + optionen.monitor.max_dauer());
        self.zustand(ConnectionState::Active);
        tracing::info!(
            device_id = %self.g.device,
            dialog_id = %koordinator.dialog_id(),
            session = %credential.kurz(),
            "Live-View aktiv"
        );

        let pumpe = tokio::spawn(frames_pumpen(
            frames,
            self.g.zustand.subscribe(),
            Arc::clone(&self.g),
        ));
        let (ereignis_tx, mut ereignis_rx) = mpsc::channel(EREIGNIS_PUFFER);
        let monitor = SessionMonitor {
            kanal,
            koordinator,
            engine,
            kandidaten,
            transport,
            config: optionen.monitor.clone(),
            max_ende,
            max_protokollfehler: optionen.aushandlung.max_protokollfehler,
            nicht_bereit,
            ereignisse: ereignis_tx,
            stop: stop.clone(),
        }
        .starten();

        let ergebnis = loop {
            match ereignis_rx.recv().await {
                Some(SessionEvent::KeepaliveGesendet { anzahl }) => {
                    tracing::trace!(anzahl, "Keepalive gesendet");
                }
                Some(SessionEvent::Degradiert(e)) | Some(SessionEvent::RemoteGeschlossen(e)) => {
                    break Err(e)
                }
                Some(SessionEvent::MaxDauerErreicht) => break Ok(()),
                None if self.gestoppt() => break Ok(()),
                None => break Err(LiveViewError::intern("Session-Ueberwachung unerwartet beendet")),
            }
        };

        if ergebnis.is_ok() {
            self.zustand(ConnectionState::Closing);
        } else {
            self.zustand(ConnectionState::Degraded);
        }
        match monitor.await {
            Ok(MonitorEnde {
                mut kanal,
                mut koordinator,
            }) => {
                koordinator.schliessen();
                kanal.close();
            }
            Err(e) => tracing::error!(fehler = %e, "Session-Ueberwachung abgestuerzt"),
        }
        pumpe.abort();
        ergebnis
    }
}

/// Fuehrt `fut` aus, bricht bei Stopp mit `LiveViewError::Stopped` ab
async fn abbrechbar<T, F>(stop: &mut watch::Receiver<bool>, fut: F) -> LiveViewResult<T>
where
    F: Future<Output = LiveViewResult<T>>,
{
    tokio::select! {
        biased;
        _ = gestoppt(stop) => Err(LiveViewError::Stopped),
        r = fut => r,
    }
}

/// Reicht Frames an die Sink weiter, solange der Zustand `Active` ist
async fn frames_pumpen(
    mut frames: mpsc::Receiver<VideoFrame>,
    zustand: watch::Receiver<ConnectionState>,
    g: Arc<Geteilt>,
) {
    let start = Instant::now();
    let mut angenommen = 0u64;
    let mut verworfen = 0u64;

    while let Some(frame) = frames.recv().await {
        let aktiv = zustand.borrow().nimmt_frames_an();
        if !aktiv {
            verworfen += 1;
            continue;
        }
        {
            let tor = g.sink_tor.read();
            if !*tor {
                break;
            }
            g.sink.accept(frame);
        }
        angenommen += 1;

        if angenommen == 1 {
            tracing::info!(device_id = %g.device, "Erstes Video-Frame empfangen");
        } else if angenommen % STATISTIK_INTERVALL == 0 {
            let sekunden = start.elapsed().as_secs_f64().max(0.001);
            tracing::info!(
                device_id = %g.device,
                frames = angenommen,
                verworfen,
                fps = format_args!("{:.1}", angenommen as f64 / sekunden),
                "Video-Statistik"
            );
        }
    }
    tracing::debug!(frames = angenommen, verworfen, "Frame-Pumpe beendet");
}
