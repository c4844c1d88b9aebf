//! Fehlertypen fuer die Signalisierung

use klingel_auth::AuthError;
use klingel_core::LiveViewError;
use klingel_protocol::WireError;
use thiserror::Error;

/// Fehlertyp fuer Kanal und Endpunkt
#[derive(Debug, Error)]
pub enum SignalingError {
    /// WebSocket-Handshake abgelehnt oder nicht erreichbar
    #[error("Verbindungsaufbau fehlgeschlagen (status={status:?}): {grund}")]
    Verbindung { status: Option<u16>, grund: String },

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Nachricht konnte nicht kodiert oder dekodiert werden
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] WireError),

    /// Sende-Puffer voll und Zeitlimit abgelaufen
    #[error("Senden fehlgeschlagen: Zeitlimit")]
    SendeTimeout,

    /// Ungueltige Endpunkt-URL
    #[error("Ungueltiger Endpunkt: {0}")]
    Endpunkt(String),

    /// Authentifizierungsfehler
    #[error("Authentifizierungsfehler: {0}")]
    Auth(#[from] AuthError),

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Verbindungsfehler
    pub fn verbindung(status: Option<u16>, grund: impl Into<String>) -> Self {
        Self::Verbindung {
            status,
            grund: grund.into(),
        }
    }
}

impl From<SignalingError> for LiveViewError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::Verbindung { status, grund } => {
                LiveViewError::ConnectFailure { status, reason: grund }
            }
            SignalingError::VerbindungGetrennt | SignalingError::SendeTimeout => {
                LiveViewError::ConnectionLost(e.to_string())
            }
            SignalingError::Protokoll(w) => w.into(),
            SignalingError::Auth(a) => a.into(),
            SignalingError::Endpunkt(m) | SignalingError::Intern(m) => LiveViewError::Internal(m),
        }
    }
}

/// Result-Typ fuer die Signalisierung
pub type SignalingResult<T> = Result<T, SignalingError>;
