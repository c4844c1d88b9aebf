//! Fehlertypen fuer Klingel
//!
//! Zentraler Fehler-Enum fuer alles was ein Aufrufer einer Live-View-Session
//! zu sehen bekommt. Untermodule definieren eigene Fehler und konvertieren
//! via `From`.

use thiserror::Error;

/// Globaler Result-Alias fuer Klingel
pub type LiveViewResult<T> = std::result::Result<T, LiveViewError>;

/// Close-Code der Gegenstelle fuer "noch nicht bereit"
pub const CLOSE_NICHT_BEREIT: u32 = 26;

/// Phase in der ein Zeitlimit abgelaufen ist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Offer gesendet, Answer fehlt
    Answer,
    /// Answer erhalten, `session_created` / `camera_started` fehlt
    MediaStart,
    /// Gesamtes Start-Zeitlimit von `start()`
    Startup,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Answer => "answer",
            Self::MediaStart => "media_start",
            Self::Startup => "startup",
        };
        f.write_str(name)
    }
}

/// Alle Fehler die eine Live-View-Session nach aussen melden kann
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiveViewError {
    // --- Authentifizierung & Ticket ---
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    AuthFailure(String),

    #[error("Ticket-Anforderung fehlgeschlagen: {0}")]
    TicketFailure(String),

    // --- Verbindung ---
    #[error("WebSocket-Verbindung abgelehnt (status={status:?}): {reason}")]
    ConnectFailure { status: Option<u16>, reason: String },

    #[error("Verbindung verloren: {0}")]
    ConnectionLost(String),

    // --- Aushandlung ---
    #[error("Zeitlimit ueberschritten in Phase {phase}")]
    NegotiationTimeout { phase: TimeoutPhase },

    #[error("Protokollverletzung: {0}")]
    ProtocolViolation(String),

    #[error("Gegenstelle hat geschlossen (code={code:?}): {text}")]
    RemoteClose { code: Option<u32>, text: String },

    // --- Terminal ---
    #[error("Session nicht wiederherstellbar nach {attempts} Versuchen")]
    SessionUnrecoverable { attempts: u32 },

    #[error("Session wurde lokal beendet")]
    Stopped,

    // --- Medien ---
    #[error("Medien-Engine: {0}")]
    Media(String),

    // --- Konfiguration ---
    #[error("Ungueltige Session-Optionen: {0}")]
    InvalidOptions(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Internal(String),
}

impl LiveViewError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Erstellt einen Medien-Fehler
    pub fn medien(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    /// `true` fuer ein `close` mit Code 26 ("noch nicht bereit")
    pub fn ist_nicht_bereit(&self) -> bool {
        matches!(
            self,
            Self::RemoteClose {
                code: Some(CLOSE_NICHT_BEREIT),
                ..
            }
        )
    }

    /// Gibt true zurueck wenn ein neuer Verbindungsversuch sinnvoll ist
    ///
    /// Abgelehnte Konto-Credentials, ungueltige Optionen und lokale Stopps
    /// werden nie wiederholt, ebenso wenig bereits terminale Fehler.
    pub fn ist_wiederholbar(&self) -> bool {
        !matches!(
            self,
            Self::AuthFailure(_)
                | Self::Stopped
                | Self::SessionUnrecoverable { .. }
                | Self::InvalidOptions(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = LiveViewError::AuthFailure("401 Unauthorized".into());
        assert_eq!(
            e.to_string(),
            "Authentifizierung fehlgeschlagen: 401 Unauthorized"
        );
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(LiveViewError::NegotiationTimeout {
            phase: TimeoutPhase::Answer
        }
        .ist_wiederholbar());
        assert!(LiveViewError::ConnectFailure {
            status: Some(404),
            reason: "Not Found".into()
        }
        .ist_wiederholbar());
        assert!(!LiveViewError::AuthFailure("abgelehnt".into()).ist_wiederholbar());
        assert!(!LiveViewError::SessionUnrecoverable { attempts: 3 }.ist_wiederholbar());
        assert!(!LiveViewError::InvalidOptions("keepalive".into()).ist_wiederholbar());
    }

    #[test]
    fn nicht_bereit_nur_fuer_code_26() {
        let bereit = LiveViewError::RemoteClose {
            code: Some(26),
            text: "not ready yet".into(),
        };
        let anderer = LiveViewError::RemoteClose {
            code: Some(5),
            text: "negotiation error".into(),
        };
        let ohne = LiveViewError::RemoteClose {
            code: None,
            text: String::new(),
        };
        assert!(bereit.ist_nicht_bereit());
        assert!(!anderer.ist_nicht_bereit());
        assert!(!ohne.ist_nicht_bereit());
    }

    #[test]
    fn timeout_phase_in_meldung() {
        let e = LiveViewError::NegotiationTimeout {
            phase: TimeoutPhase::MediaStart,
        };
        assert!(e.to_string().contains("media_start"));
    }
}
