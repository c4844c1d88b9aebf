//! Protokoll der Verbindungszustaende einer Session
//!
//! Beobachtet den `watch`-Kanal einer `LiveSession` und meldet jeden
//! Wechsel mit der Verweildauer im vorherigen Zustand.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use klingel_core::ConnectionState;

/// Ein beobachteter Zustandswechsel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uebergang {
    pub von: ConnectionState,
    pub nach: ConnectionState,
    /// Zeit im Zustand `von`
    pub dauer: Duration,
}

/// Startet einen Task der jeden Zustandswechsel loggt
///
/// Endet wenn die Session (der Sender) verworfen wird.
pub fn zustandsprotokoll_starten(zustand: watch::Receiver<ConnectionState>) -> JoinHandle<()> {
    zustandsprotokoll_mit(zustand, |u| {
        let dauer_ms = u.dauer.as_millis() as u64;
        match u.nach {
            ConnectionState::Degraded | ConnectionState::Failed => {
                tracing::warn!(von = %u.von, nach = %u.nach, dauer_ms, "Verbindungszustand")
            }
            _ => tracing::info!(von = %u.von, nach = %u.nach, dauer_ms, "Verbindungszustand"),
        }
    })
}

/// Wie `zustandsprotokoll_starten`, aber mit eigenem Empfaenger fuer Wechsel
pub fn zustandsprotokoll_mit<F>(
    mut zustand: watch::Receiver<ConnectionState>,
    mut melden: F,
) -> JoinHandle<()>
where
    F: FnMut(Uebergang) + Send + 'static,
{
    tokio::spawn(async move {
        let mut letzter = *zustand.borrow_and_update();
        let mut seit = Instant::now();

        while zustand.changed().await.is_ok() {
            let neu = *zustand.borrow_and_update();
            if neu == letzter {
                continue;
            }
            melden(Uebergang {
                von: letzter,
                nach: neu,
                dauer: seit.elapsed(),
            });
            letzter = neu;
            seit = Instant::now();
        }
        tracing::debug!(zustand = %letzter, "Zustandsprotokoll beendet");
    })
}
