//! Konfiguration des Live-View-Programms
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte; nur Token und Geraete-ID muessen gesetzt werden.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use klingel_media::MedienConfig;
use klingel_signaling::SessionOptions;

/// Umgebungsvariable fuer den Pfad der Konfigurationsdatei
pub const ENV_CONFIG: &str = "KLINGEL_CONFIG";
/// Umgebungsvariable die das Bearer-Token der Datei ueberschreibt
pub const ENV_TOKEN: &str = "KLINGEL_TOKEN";

/// Vollstaendige Programm-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveViewConfig {
    /// Konto-Zugang
    pub konto: KontoEinstellungen,
    /// Ziel-Geraet
    pub geraet: GeraetEinstellungen,
    /// Aufnahme-Ziel und -Dauer
    pub aufnahme: AufnahmeEinstellungen,
    /// Zeitwerte der Session
    pub session: SessionOptions,
    /// WebRTC (STUN, ICE-Sammeln)
    pub medien: MedienConfig,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Konto-Zugang
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KontoEinstellungen {
    /// Bearer-Token der Konto-API
    pub token: String,
    pub account_id: Option<String>,
}

impl std::fmt::Debug for KontoEinstellungen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KontoEinstellungen")
            .field("token", &format_args!("{}...", klingel_core::kuerzen(&self.token)))
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Ziel-Geraet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeraetEinstellungen {
    /// Numerische Geraete-ID (`doorbot_id`); 0 = nicht gesetzt
    pub id: u64,
}

/// Aufnahme-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AufnahmeEinstellungen {
    /// Zielverzeichnis fuer `.h264`-Dateien
    pub verzeichnis: PathBuf,
    /// Aufnahmedauer; wird auf die maximale Session-Dauer begrenzt
    pub dauer_sekunden: u64,
}

impl Default for AufnahmeEinstellungen {
    fn default() -> Self {
        Self {
            verzeichnis: PathBuf::from("aufnahmen"),
            dauer_sekunden: 30,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Ausdruck
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl LiveViewConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Setzt das Token aus der Umgebung, falls vorhanden
    pub fn token_ueberschreiben(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.konto.token = token;
        }
    }

    /// Prueft die Pflichtfelder
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.konto.token.trim().is_empty() {
            anyhow::bail!("Kein Bearer-Token konfiguriert ([konto] token oder {ENV_TOKEN})");
        }
        if self.geraet.id == 0 {
            anyhow::bail!("Keine Geraete-ID konfiguriert ([geraet] id)");
        }
        self.session
            .pruefen()
            .map_err(|e| anyhow::anyhow!("[session]: {e}"))
    }

    /// Aufnahmedauer, hoechstens die maximale Session-Dauer
    pub fn aufnahmedauer(&self) -> Duration {
        Duration::from_secs(self.aufnahme.dauer_sekunden).min(self.session.monitor.max_dauer())
    }
}
