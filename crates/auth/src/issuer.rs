//! Ticket-Anforderung beim Konto-API
//!
//! `POST /api/v1/clap/ticket/request/signalsocket` mit dem Bearer-Token des
//! Kontos liefert `{ "ticket": "...", "region": "..." }`. Fehlt das Feld
//! `ticket` in einer sonst gueltigen Antwort, wird das Bearer-Token selbst
//! als Legacy-Ticket verwendet.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use klingel_core::kuerzen;

use crate::credentials::CredentialProvider;
use crate::error::{AuthError, AuthResult};

/// Standard-Endpunkt fuer Signalisierungs-Tickets
pub const TICKET_URL: &str = "https://app.ring.com/api/v1/clap/ticket/request/signalsocket";

/// Zeitlimit fuer eine einzelne Ticket-Anfrage
const ANFRAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Antwort des Ticket-Endpunkts
#[derive(Clone, PartialEq, Eq)]
pub struct TicketAntwort {
    pub ticket: String,
    pub region: Option<String>,
    /// `true` wenn das Bearer-Token als Ticket dient (alter Endpunkt)
    pub legacy: bool,
}

impl std::fmt::Debug for TicketAntwort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketAntwort")
            .field("ticket", &format_args!("{}...", kuerzen(&self.ticket)))
            .field("region", &self.region)
            .field("legacy", &self.legacy)
            .finish()
    }
}

/// Quelle fuer Signalisierungs-Tickets
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    /// Fordert ein neues Ticket an (eine einzelne Netzwerk-Anfrage)
    async fn ticket_anfordern(&self) -> AuthResult<TicketAntwort>;
}

/// Ticket-Anforderung ueber HTTPS
pub struct HttpTicketIssuer {
    client: reqwest::Client,
    url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTicketIssuer {
    pub fn neu(
        credentials: Arc<dyn CredentialProvider>,
        user_agent: &str,
    ) -> AuthResult<Self> {
        Self::mit_url(credentials, user_agent, TICKET_URL)
    }

    /// Wie `neu`, aber mit abweichendem Endpunkt
    pub fn mit_url(
        credentials: Arc<dyn CredentialProvider>,
        user_agent: &str,
        url: impl Into<String>,
    ) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(ANFRAGE_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| AuthError::intern(format!("HTTP-Client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            credentials,
        })
    }
}

#[async_trait]
impl TicketIssuer for HttpTicketIssuer {
    async fn ticket_anfordern(&self) -> AuthResult<TicketAntwort> {
        let token = self.credentials.bearer_token().await?;
        tracing::debug!(url = %self.url, "Fordere Signalisierungs-Ticket an");

        let antwort = self
            .client
            .post(&self.url)
            .bearer_auth(&token)
            .send()
            .await?;

        let status = antwort.status().as_u16();
        if status != 200 {
            let text = antwort.text().await.unwrap_or_default();
            return Err(status_zuordnen(status, &text));
        }

        let daten: Value = antwort
            .json()
            .await
            .map_err(|e| AuthError::UngueltigeAntwort(e.to_string()))?;
        antwort_auswerten(&daten, &token)
    }
}

/// Ordnet einen HTTP-Fehlerstatus einer Fehlerart zu
///
/// 401/403 bedeuten ein abgelehntes Konto-Credential, alles andere gilt
/// als voruebergehend.
pub fn status_zuordnen(status: u16, text: &str) -> AuthError {
    let meldung = format!("{status} {}", text.chars().take(120).collect::<String>());
    match status {
        401 | 403 => AuthError::Abgelehnt(meldung),
        _ => AuthError::Voruebergehend(meldung),
    }
}

/// Wertet die JSON-Antwort des Ticket-Endpunkts aus
pub fn antwort_auswerten(daten: &Value, bearer_token: &str) -> AuthResult<TicketAntwort> {
    let objekt = daten
        .as_object()
        .ok_or_else(|| AuthError::UngueltigeAntwort("kein JSON-Objekt".into()))?;

    let region = objekt
        .get("region")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    match objekt.get("ticket") {
        Some(Value::String(ticket)) if !ticket.is_empty() => Ok(TicketAntwort {
            ticket: ticket.clone(),
            region,
            legacy: false,
        }),
        Some(anderes) => Err(AuthError::UngueltigeAntwort(format!(
            "Feld 'ticket' ungueltig: {anderes}"
        ))),
        None => {
            tracing::warn!("Ticket-Antwort ohne 'ticket', verwende Legacy-Verbindung");
            Ok(TicketAntwort {
                ticket: bearer_token.to_string(),
                region: None,
                legacy: true,
            })
        }
    }
}
