//! Klingel Live-View – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und zeichnet den
//! Videostream eines Geraets fuer die konfigurierte Dauer auf.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use klingel_auth::StaticCredentials;
use klingel_core::DeviceId;
use klingel_liveview::config::{ENV_CONFIG, ENV_TOKEN};
use klingel_liveview::{DateiSink, LiveViewConfig};
use klingel_media::WebRtcEngineFactory;
use klingel_observability::{logging_initialisieren, zustandsprotokoll_starten};
use klingel_signaling::{LiveSession, SessionKomponenten};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var(ENV_CONFIG).unwrap_or_else(|_| "klingel.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let mut config = LiveViewConfig::laden(&config_pfad)?;
    config.token_ueberschreiben(std::env::var(ENV_TOKEN).ok());

    logging_initialisieren(&config.logging.level, &config.logging.format)?;
    config.pruefen()?;

    let device = DeviceId(config.geraet.id);
    let dauer = config.aufnahmedauer();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        device_id = %device,
        dauer_s = dauer.as_secs(),
        "Klingel Live-View wird initialisiert"
    );

    let credentials = Arc::new(StaticCredentials::neu(
        config.konto.token.clone(),
        config.konto.account_id.clone(),
    ));
    let medien = Arc::new(WebRtcEngineFactory::neu(config.medien.clone()));
    let komponenten = SessionKomponenten::standard(credentials, medien, &config.session)?;

    let sink = Arc::new(DateiSink::anlegen(&config.aufnahme.verzeichnis, device)?);
    let session = LiveSession::neu(device, komponenten, sink.clone(), config.session.clone());
    let protokoll = zustandsprotokoll_starten(session.zustand());

    if let Err(e) = session.start().await {
        tracing::error!(fehler = %e, "Live-View konnte nicht gestartet werden");
        session.stop().await;
        sink.abschliessen()?;
        return Err(e.into());
    }

    tracing::info!("Live-View aktiv. Warte auf Ende der Aufnahme oder Ctrl-C...");
    let ergebnis = tokio::select! {
        _ = tokio::time::sleep(dauer) => {
            tracing::info!("Aufnahmedauer erreicht");
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown-Signal empfangen, Live-View wird beendet");
            Ok(())
        }
        ende = session.wait_finished() => ende,
    };

    session.stop().await;
    sink.abschliessen()?;
    // Protokoll endet mit dem letzten Zustands-Sender
    drop(session);
    let _ = tokio::time::timeout(Duration::from_secs(1), protokoll).await;

    ergebnis.map_err(Into::into)
}
