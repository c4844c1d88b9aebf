//! Fehler beim Kodieren und Dekodieren von Signalisierungs-Nachrichten

use klingel_core::LiveViewError;
use thiserror::Error;

pub type WireResult<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    /// Methode ist diesem Client unbekannt (z.B. `pong`) und wird uebersprungen
    #[error("Unbekannte Methode: {0}")]
    UnbekannteMethode(String),

    #[error("Ungueltiges JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ungueltiger Body fuer '{methode}': {grund}")]
    UngueltigerBody { methode: String, grund: String },
}

impl WireError {
    pub fn body(methode: impl Into<String>, grund: impl std::fmt::Display) -> Self {
        Self::UngueltigerBody {
            methode: methode.into(),
            grund: grund.to_string(),
        }
    }

    /// Unbekannte Methoden sind kein Fehler der Gegenstelle
    pub fn ist_ueberspringbar(&self) -> bool {
        matches!(self, Self::UnbekannteMethode(_))
    }
}

impl From<WireError> for LiveViewError {
    fn from(e: WireError) -> Self {
        LiveViewError::ProtocolViolation(e.to_string())
    }
}
