//! Konto-Credentials des Aufrufers
//!
//! Anmeldung und Token-Refresh liegen ausserhalb dieses Crates; hier wird
//! nur das fertige Bearer-Token abgefragt.

use async_trait::async_trait;

use crate::error::AuthResult;

/// Liefert das langlebige Konto-Credential
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Aktuelles Bearer-Token fuer die Konto-API
    async fn bearer_token(&self) -> AuthResult<String>;

    /// Konto-ID, falls bekannt
    fn account_id(&self) -> Option<String>;
}

/// Feste Credentials (z.B. aus einer Konfigurationsdatei)
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
    account_id: Option<String>,
}

impl StaticCredentials {
    pub fn neu(token: impl Into<String>, account_id: Option<String>) -> Self {
        Self {
            token: token.into(),
            account_id,
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &format_args!("{}...", klingel_core::kuerzen(&self.token)))
            .field("account_id", &self.account_id)
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> AuthResult<String> {
        Ok(self.token.clone())
    }

    fn account_id(&self) -> Option<String> {
        self.account_id.clone()
    }
}
