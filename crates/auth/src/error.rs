//! Fehlertypen fuer die Ticket-Verwaltung

use klingel_core::LiveViewError;
use thiserror::Error;

/// Alle moeglichen Fehler beim Beschaffen eines Tickets
#[derive(Debug, Error)]
pub enum AuthError {
    // --- Konto ---
    #[error("Konto-Credential abgelehnt: {0}")]
    Abgelehnt(String),

    // --- Netzwerk ---
    #[error("Ticket-Endpunkt voruebergehend nicht erreichbar: {0}")]
    Voruebergehend(String),

    #[error("Ungueltige Ticket-Antwort: {0}")]
    UngueltigeAntwort(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl AuthError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Nur voruebergehende Fehler werden mit Backoff wiederholt
    pub fn ist_voruebergehend(&self) -> bool {
        matches!(self, Self::Voruebergehend(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Voruebergehend(e.to_string())
    }
}

impl From<AuthError> for LiveViewError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Abgelehnt(msg) => LiveViewError::AuthFailure(msg),
            AuthError::Intern(msg) => LiveViewError::Internal(msg),
            andere => LiveViewError::TicketFailure(andere.to_string()),
        }
    }
}

/// Result-Alias fuer die Ticket-Verwaltung
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abgelehnt_wird_auth_failure() {
        let e: LiveViewError = AuthError::Abgelehnt("401".into()).into();
        assert!(matches!(e, LiveViewError::AuthFailure(_)));
        assert!(!e.ist_wiederholbar());
    }

    #[test]
    fn netzwerkfehler_wird_ticket_failure() {
        let e: LiveViewError = AuthError::Voruebergehend("timeout".into()).into();
        assert!(matches!(e, LiveViewError::TicketFailure(_)));
        assert!(e.ist_wiederholbar());
    }
}
