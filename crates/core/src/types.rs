//! Gemeinsame Identifikationstypen fuer Klingel
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geraete-ID der Kamera / Tuerklingel (`doorbot_id` auf dem Draht)
///
/// Wird immer als JSON-Zahl serialisiert. Die Gegenstelle lehnt
/// `doorbot_id` als String mit einem generischen Fehlercode ab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Gibt den inneren Zahlenwert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Korrelations-ID einer einzelnen Aushandlung
///
/// Jeder Verbindungsversuch bekommt eine frische DialogId; Antworten mit
/// einer anderen ID gehoeren zu einem alten Versuch und werden verworfen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DialogId(pub String);

impl DialogId {
    /// Erstellt eine neue zufaellige DialogId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dialog:{}", self.0)
    }
}

/// Session-Credential der Gegenstelle (`session_id` im Ping-Body)
///
/// Entsteht bei `session_created` und ist nur fuer die Dauer einer
/// erfolgreichen Aushandlung gueltig.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredential(pub String);

impl SessionCredential {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Gekuerzte Darstellung fuer Logs
    pub fn kurz(&self) -> &str {
        kuerzen(&self.0)
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionCredential({}...)", self.kurz())
    }
}

/// ICE-Kandidat in der Feldbenennung der Gegenstelle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// Kuerzt Geheimnisse (Tickets, Tokens) fuer die Ausgabe in Logs
pub fn kuerzen(wert: &str) -> &str {
    match wert.char_indices().nth(10) {
        Some((idx, _)) => &wert[..idx],
        None => wert,
    }
}
