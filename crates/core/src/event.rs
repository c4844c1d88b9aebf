//! Verbindungszustand und interne Session-Ereignisse
//!
//! `ConnectionState` existiert genau einmal pro LiveSession und wird nur vom
//! Session-Task geschrieben. Monitor und Aushandlung melden ihre
//! Beobachtungen als `SessionEvent` ueber einen begrenzten Kanal an diesen
//! Task, statt gemeinsame Flags zu veraendern.

use serde::{Deserialize, Serialize};

use crate::error::LiveViewError;

/// Zustand einer Live-View-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Negotiating,
    Active,
    Degraded,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Endzustaende: keine automatischen Uebergaenge mehr
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Frames duerfen nur im Zustand `Active` an die Sink gehen
    pub fn nimmt_frames_an(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Ereignisse vom SessionMonitor an den Session-Task
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Ein Keepalive-Ping wurde erfolgreich eingereiht
    KeepaliveGesendet { anzahl: u64 },
    /// Anhaltende Stoerung (Keepalive, Transport, Socket) – Reconnect noetig
    Degradiert(LiveViewError),
    /// Gegenstelle hat die Session mit `close` beendet
    RemoteGeschlossen(LiveViewError),
    /// Maximale Session-Dauer erreicht – geordneter lokaler Stopp
    MaxDauerErreicht,
}
