//! Konfiguration der WebRTC-Engine

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// STUN-Server und Grenzen fuer das ICE-Sammeln
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedienConfig {
    pub stun_server: Vec<String>,
    /// Hoechstens so lange auf ICE-Kandidaten warten bevor das Offer gilt
    pub sammeln_timeout_ms: u64,
    /// Mit so vielen Kandidaten ist das Offer brauchbar
    pub min_kandidaten: usize,
    /// Puffer zwischen Track-Leser und Frame-Pumpe
    pub frame_puffer: usize,
}

impl Default for MedienConfig {
    fn default() -> Self {
        Self {
            stun_server: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
                "stun:stun2.l.google.com:19302".into(),
            ],
            sammeln_timeout_ms: 6_000,
            min_kandidaten: 2,
            frame_puffer: 64,
        }
    }
}

impl MedienConfig {
    pub fn sammeln_timeout(&self) -> Duration {
        Duration::from_millis(self.sammeln_timeout_ms)
    }
}
