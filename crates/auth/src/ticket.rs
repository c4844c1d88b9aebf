//! Ticket-Verwaltung fuer den Signalisierungs-Endpunkt
//!
//! Tickets sind kurzlebig (Minuten). Der TicketManager haelt genau ein
//! Ticket im Speicher, erneuert es vor Ablauf ueber einen periodischen Task
//! und stellt sicher dass gleichzeitige Erneuerungen nur eine einzige
//! Netzwerk-Anfrage ausloesen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use klingel_core::kuerzen;

use crate::error::{AuthError, AuthResult};
use crate::issuer::TicketIssuer;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Zeitverhalten der Ticket-Verwaltung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Aelter als dieses Fenster gilt ein Ticket als veraltet
    pub frische_sekunden: u64,
    /// Intervall der proaktiven Erneuerung
    pub erneuerung_sekunden: u64,
    /// Maximale Anfragen pro Beschaffung bei voruebergehenden Fehlern
    pub max_versuche: u32,
    pub backoff_start_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            frische_sekunden: 240,
            erneuerung_sekunden: 180,
            max_versuche: 3,
            backoff_start_ms: 500,
            backoff_max_ms: 4_000,
        }
    }
}

impl TicketConfig {
    pub fn frische(&self) -> Duration {
        Duration::from_secs(self.frische_sekunden)
    }

    pub fn erneuerungs_intervall(&self) -> Duration {
        Duration::from_secs(self.erneuerung_sekunden)
    }

    /// Wartezeit vor Anfrage Nr. `versuch + 1` (versuch beginnt bei 1)
    fn backoff(&self, versuch: u32) -> Duration {
        let faktor = 2u64.saturating_pow(versuch.saturating_sub(1));
        Duration::from_millis(
            self.backoff_start_ms
                .saturating_mul(faktor)
                .min(self.backoff_max_ms),
        )
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// Ein Signalisierungs-Ticket mit Ausstellungszeitpunkt
#[derive(Clone, PartialEq, Eq)]
pub struct Ticket {
    pub wert: String,
    /// Region fuer den Endpunkt (z.B. `us-east-1`)
    pub region: Option<String>,
    /// Bearer-Token als Ticket (alter Endpunkt)
    pub legacy: bool,
    pub ausgestellt: Instant,
}

impl Ticket {
    pub fn alter(&self) -> Duration {
        self.ausgestellt.elapsed()
    }

    /// Gibt `true` zurueck solange das Ticket juenger als `fenster` ist
    pub fn ist_frisch(&self, fenster: Duration) -> bool {
        self.alter() < fenster
    }

    /// Gekuerzte Darstellung fuer Logs
    pub fn kurz(&self) -> &str {
        kuerzen(&self.wert)
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("wert", &format_args!("{}...", self.kurz()))
            .field("region", &self.region)
            .field("legacy", &self.legacy)
            .field("alter", &self.alter())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TicketManager
// ---------------------------------------------------------------------------

/// Alleiniger Besitzer des aktuellen Tickets
pub struct TicketManager {
    issuer: Arc<dyn TicketIssuer>,
    config: TicketConfig,
    /// Aktuelles Ticket, von aussen nur lesbar
    aktuell: RwLock<Option<Ticket>>,
    /// Serialisiert Netzwerk-Anfragen (single-flight)
    anforderung: Mutex<()>,
    /// Anzahl tatsaechlich gestellter Anfragen
    anfragen: AtomicU64,
}

impl TicketManager {
    pub fn neu(issuer: Arc<dyn TicketIssuer>, config: TicketConfig) -> Arc<Self> {
        Arc::new(Self {
            issuer,
            config,
            aktuell: RwLock::new(None),
            anforderung: Mutex::new(()),
            anfragen: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &TicketConfig {
        &self.config
    }

    /// Anzahl der bisher gestellten Netzwerk-Anfragen
    pub fn anzahl_anfragen(&self) -> u64 {
        self.anfragen.load(Ordering::SeqCst)
    }

    /// Gecachtes Ticket ohne Frischepruefung
    pub async fn zwischengespeichert(&self) -> Option<Ticket> {
        self.aktuell.read().await.clone()
    }

    /// Beschafft ein neues Ticket
    ///
    /// Voruebergehende Fehler werden mit Backoff wiederholt, ein
    /// abgelehntes Konto-Credential sofort gemeldet.
    pub async fn acquire(&self) -> AuthResult<Ticket> {
        let _sperre = self.anforderung.lock().await;
        self.anfordern_gesperrt().await
    }

    /// Gibt `ticket` zurueck solange es frisch ist, sonst ein neues
    ///
    /// Hat ein gleichzeitiger Aufruf bereits erneuert, wird dessen Ergebnis
    /// verwendet statt erneut anzufragen.
    pub async fn ensure_fresh(&self, ticket: &Ticket) -> AuthResult<Ticket> {
        if ticket.ist_frisch(self.config.frische()) {
            return Ok(ticket.clone());
        }
        self.frisches_ticket().await
    }

    /// Aktuelles frisches Ticket, beschafft es bei Bedarf
    pub async fn current(&self) -> AuthResult<Ticket> {
        if let Some(t) = self.aktuell.read().await.as_ref() {
            if t.ist_frisch(self.config.frische()) {
                return Ok(t.clone());
            }
        }
        self.frisches_ticket().await
    }

    /// Erzwingt eine Erneuerung ohne Frischepruefung
    pub async fn renew(&self) -> AuthResult<Ticket> {
        let _sperre = self.anforderung.lock().await;
        tracing::info!("Erzwungene Ticket-Erneuerung");
        self.anfordern_gesperrt().await
    }

    async fn frisches_ticket(&self) -> AuthResult<Ticket> {
        let _sperre = self.anforderung.lock().await;
        // Ein anderer Aufrufer kann waehrend des Wartens erneuert haben
        if let Some(t) = self.aktuell.read().await.as_ref() {
            if t.ist_frisch(self.config.frische()) {
                return Ok(t.clone());
            }
        }
        self.anfordern_gesperrt().await
    }

    /// Stellt Anfragen bis zum Erfolg oder bis `max_versuche` erreicht ist
    ///
    /// Darf nur mit gehaltener `anforderung`-Sperre aufgerufen werden.
    async fn anfordern_gesperrt(&self) -> AuthResult<Ticket> {
        let max = self.config.max_versuche.max(1);
        let mut versuch = 0;
        loop {
            versuch += 1;
            self.anfragen.fetch_add(1, Ordering::SeqCst);

            match self.issuer.ticket_anfordern().await {
                Ok(antwort) => {
                    let ticket = Ticket {
                        wert: antwort.ticket,
                        region: antwort.region,
                        legacy: antwort.legacy,
                        ausgestellt: Instant::now(),
                    };
                    tracing::info!(
                        ticket = %ticket.kurz(),
                        region = ?ticket.region,
                        legacy = ticket.legacy,
                        "Signalisierungs-Ticket erhalten"
                    );
                    *self.aktuell.write().await = Some(ticket.clone());
                    return Ok(ticket);
                }
                Err(e) if e.ist_voruebergehend() && versuch < max => {
                    let warten = self.config.backoff(versuch);
                    tracing::warn!(
                        versuch,
                        max,
                        warten_ms = warten.as_millis() as u64,
                        fehler = %e,
                        "Ticket-Anforderung fehlgeschlagen, neuer Versuch"
                    );
                    tokio::time::sleep(warten).await;
                }
                Err(e) => {
                    tracing::error!(
                        versuch,
                        fehler = %e,
                        "Ticket-Anforderung endgueltig fehlgeschlagen"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Startet die periodische Erneuerung
    ///
    /// Der Task laeuft bis `stop` auf `true` wechselt oder der Sender
    /// verschwindet. Fehler werden protokolliert, der Task laeuft weiter.
    /// Ein Intervall von 0 schaltet die Erneuerung ab.
    pub fn erneuerung_starten(
        self: &Arc<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let intervall = self.config.erneuerungs_intervall();
        tokio::spawn(async move {
            if intervall.is_zero() {
                tracing::warn!("Erneuerungsintervall 0, Ticket-Erneuerung abgeschaltet");
                let _ = stop.wait_for(|s| *s).await;
                return;
            }
            let mut takt = tokio::time::interval_at(Instant::now() + intervall, intervall);
            takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = takt.tick() => {
                        if let Err(e) = manager.renew().await {
                            if matches!(e, AuthError::Abgelehnt(_)) {
                                tracing::error!(fehler = %e, "Ticket-Erneuerung abgelehnt");
                            } else {
                                tracing::warn!(fehler = %e, "Ticket-Erneuerung fehlgeschlagen");
                            }
                        }
                    }
                    res = stop.changed() => {
                        if res.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Ticket-Erneuerung beendet");
        })
    }
}
