//! Session-Optionen
//!
//! Alle Zeitwerte einer Live-View-Session. Jedes Feld hat einen
//! Standardwert, sodass `SessionOptions::default()` ohne weitere
//! Konfiguration lauffaehig ist. Die Struktur kann direkt in eine
//! TOML-Konfiguration eingebettet werden.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use klingel_auth::TicketConfig;
use klingel_core::{LiveViewError, LiveViewResult};

/// Vollstaendige Session-Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Ticket-Frische und Erneuerung
    pub ticket: TicketConfig,
    /// Verbindungsaufbau
    pub verbindung: VerbindungsEinstellungen,
    /// Zeitlimits der Aushandlung
    pub aushandlung: AushandlungsEinstellungen,
    /// Keepalive und Session-Dauer
    pub monitor: MonitorEinstellungen,
    /// Wiederverbindung
    pub reconnect: ReconnectEinstellungen,
    /// Wartezeit fuer das Beenden laufender Tasks bei `stop()`
    pub stop_gnadenfrist_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ticket: TicketConfig::default(),
            verbindung: VerbindungsEinstellungen::default(),
            aushandlung: AushandlungsEinstellungen::default(),
            monitor: MonitorEinstellungen::default(),
            reconnect: ReconnectEinstellungen::default(),
            stop_gnadenfrist_ms: 2_000,
        }
    }
}

impl SessionOptions {
    pub fn stop_gnadenfrist(&self) -> Duration {
        Duration::from_millis(self.stop_gnadenfrist_ms)
    }

    /// Prueft Werte die als Intervall oder Zeitlimit nicht null sein duerfen
    pub fn pruefen(&self) -> LiveViewResult<()> {
        let pflicht = [
            ("monitor.keepalive_sekunden", self.monitor.keepalive_sekunden),
            ("ticket.erneuerung_sekunden", self.ticket.erneuerung_sekunden),
            ("aushandlung.answer_timeout_sekunden", self.aushandlung.answer_timeout_sekunden),
            (
                "aushandlung.media_start_timeout_sekunden",
                self.aushandlung.media_start_timeout_sekunden,
            ),
            ("aushandlung.start_timeout_sekunden", self.aushandlung.start_timeout_sekunden),
        ];
        let null: Vec<&str> = pflicht
            .iter()
            .filter(|(_, wert)| *wert == 0)
            .map(|(name, _)| *name)
            .collect();
        if null.is_empty() {
            Ok(())
        } else {
            Err(LiveViewError::InvalidOptions(format!(
                "muss groesser als 0 sein: {}",
                null.join(", ")
            )))
        }
    }
}

/// Verbindungsaufbau zum Signalisierungs-Endpunkt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Zeitlimit fuer den WebSocket-Handshake
    pub connect_timeout_sekunden: u64,
    /// Zeitlimit fuer das Einreihen einer ausgehenden Nachricht
    pub sende_timeout_ms: u64,
    /// User-Agent im Handshake
    pub user_agent: String,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            connect_timeout_sekunden: 10,
            sende_timeout_ms: 1_000,
            user_agent: concat!("klingel/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl VerbindungsEinstellungen {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sekunden)
    }

    pub fn sende_timeout(&self) -> Duration {
        Duration::from_millis(self.sende_timeout_ms)
    }
}

/// Zeitlimits der Offer/Answer-Aushandlung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AushandlungsEinstellungen {
    /// Offer gesendet bis Answer
    pub answer_timeout_sekunden: u64,
    /// Answer bis `camera_started`
    pub media_start_timeout_sekunden: u64,
    /// Gesamtes Zeitlimit von `start()` inklusive Wiederholungen
    pub start_timeout_sekunden: u64,
    /// Tolerierte Protokollverletzungen pro Versuch
    pub max_protokollfehler: u32,
}

impl Default for AushandlungsEinstellungen {
    fn default() -> Self {
        Self {
            answer_timeout_sekunden: 10,
            media_start_timeout_sekunden: 15,
            start_timeout_sekunden: 45,
            max_protokollfehler: 3,
        }
    }
}

impl AushandlungsEinstellungen {
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.answer_timeout_sekunden)
    }

    pub fn media_start_timeout(&self) -> Duration {
        Duration::from_secs(self.media_start_timeout_sekunden)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_sekunden)
    }
}

/// Keepalive und maximale Session-Dauer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorEinstellungen {
    pub keepalive_sekunden: u64,
    /// Geraete mit Akku trennen nach etwa 10 Minuten
    pub max_dauer_sekunden: u64,
    /// Aufeinanderfolgende Keepalive-Fehler bis `degraded`
    pub max_keepalive_fehler: u32,
}

impl Default for MonitorEinstellungen {
    fn default() -> Self {
        Self {
            keepalive_sekunden: 5,
            max_dauer_sekunden: 590,
            max_keepalive_fehler: 3,
        }
    }
}

impl MonitorEinstellungen {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_sekunden)
    }

    pub fn max_dauer(&self) -> Duration {
        Duration::from_secs(self.max_dauer_sekunden)
    }
}

/// Wiederverbindung mit exponentiellem Backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectEinstellungen {
    pub max_versuche: u32,
    pub backoff_start_ms: u64,
    pub backoff_max_ms: u64,
    /// Wartezeit nach `close` mit Code 26, der Dialog bleibt bestehen
    pub nicht_bereit_ms: u64,
    /// Code-26-Antworten in Folge pro Dialog; danach zaehlt der Versuch
    pub max_nicht_bereit: u32,
}

impl Default for ReconnectEinstellungen {
    fn default() -> Self {
        Self {
            max_versuche: 3,
            backoff_start_ms: 2_000,
            backoff_max_ms: 30_000,
            nicht_bereit_ms: 300,
            max_nicht_bereit: 10,
        }
    }
}
