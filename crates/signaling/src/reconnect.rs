//! ReconnectPolicy – Entscheidung ueber neue Verbindungsversuche
//!
//! Zaehlt fehlgeschlagene Versuche und berechnet den Backoff
//! `min(start * 2^(n-1), max)`. "Noch nicht bereit" (Code 26) erreicht die
//! Policy nur, wenn die `NichtBereitFolge` eines Versuchs erschoepft ist.

use std::time::Duration;

use klingel_core::LiveViewError;

use crate::config::ReconnectEinstellungen;

/// Ergebnis der Bewertung eines Fehlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entscheidung {
    /// Nach `warten` mit frischem Ticket erneut verbinden
    Wiederholen { warten: Duration },
    /// Keine weiteren Versuche; der Fehler ist endgueltig
    Aufgeben(LiveViewError),
}

/// Versuchszaehler mit Backoff
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectEinstellungen,
    versuche: u32,
}

impl ReconnectPolicy {
    pub fn neu(config: ReconnectEinstellungen) -> Self {
        Self { config, versuche: 0 }
    }

    /// Bisher angerechnete Versuche
    pub fn versuche(&self) -> u32 {
        self.versuche
    }

    /// Wartezeit vor Versuch Nr. `versuch` (ab 1)
    pub fn backoff(&self, versuch: u32) -> Duration {
        let faktor = 2u64.saturating_pow(versuch.saturating_sub(1));
        let ms = self
            .config
            .backoff_start_ms
            .saturating_mul(faktor)
            .min(self.config.backoff_max_ms);
        Duration::from_millis(ms)
    }

    /// Bewertet den Fehler eines Versuchs
    pub fn bewerten(&mut self, fehler: &LiveViewError) -> Entscheidung {
        if !fehler.ist_wiederholbar() {
            return Entscheidung::Aufgeben(fehler.clone());
        }
        if self.versuche >= self.config.max_versuche {
            return Entscheidung::Aufgeben(LiveViewError::SessionUnrecoverable {
                attempts: self.versuche,
            });
        }
        self.versuche += 1;
        Entscheidung::Wiederholen {
            warten: self.backoff(self.versuche),
        }
    }

    /// Session ist wieder aktiv
    pub fn erfolgreich(&mut self) {
        self.versuche = 0;
    }
}

// ---------------------------------------------------------------------------
// NichtBereitFolge
// ---------------------------------------------------------------------------

/// Begrenzte Folge von "noch nicht bereit"-Antworten auf demselben Dialog
///
/// Die Gegenstelle schliesst mit Code 26 solange die Kamera aufwacht. Der
/// Dialog bleibt bestehen; nach `nicht_bereit_ms` geht es auf demselben
/// Kanal weiter. Nach `max_nicht_bereit` Antworten in Folge ist Schluss.
#[derive(Debug, Clone)]
pub struct NichtBereitFolge {
    warten: Duration,
    max: u32,
    folge: u32,
}

impl NichtBereitFolge {
    pub fn neu(config: &ReconnectEinstellungen) -> Self {
        Self {
            warten: Duration::from_millis(config.nicht_bereit_ms),
            max: config.max_nicht_bereit,
            folge: 0,
        }
    }

    /// Wartezeit vor dem Weitermachen; `None` wenn die Folge erschoepft ist
    pub fn naechste(&mut self) -> Option<Duration> {
        if self.folge >= self.max {
            return None;
        }
        self.folge += 1;
        Some(self.warten)
    }

    pub fn folge(&self) -> u32 {
        self.folge
    }

    /// Gegenstelle hat Fortschritt gemeldet
    pub fn zuruecksetzen(&mut self) {
        self.folge = 0;
    }
}
