//! Schreibt empfangene Frames als H.264-Elementarstrom (Annex-B) in eine Datei

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use klingel_core::{DeviceId, FrameSink, VideoFrame};

/// Datei-Ausgabe fuer eine Aufnahme
pub struct DateiSink {
    pfad: PathBuf,
    inhalt: Mutex<Zustand>,
}

struct Zustand {
    schreiber: BufWriter<File>,
    frames: u64,
    bytes: u64,
    /// Nach dem ersten Schreibfehler werden Frames verworfen
    defekt: bool,
}

impl DateiSink {
    /// Legt `<verzeichnis>/<geraet>_<UTC-Zeitstempel>.h264` an
    pub fn anlegen(verzeichnis: &Path, device: DeviceId) -> anyhow::Result<Self> {
        std::fs::create_dir_all(verzeichnis).map_err(|e| {
            anyhow::anyhow!("Verzeichnis '{}' nicht anlegbar: {e}", verzeichnis.display())
        })?;
        let pfad = verzeichnis.join(dateiname(device, chrono::Utc::now()));
        let datei = File::create(&pfad)
            .map_err(|e| anyhow::anyhow!("Datei '{}' nicht anlegbar: {e}", pfad.display()))?;

        tracing::info!(pfad = %pfad.display(), "Aufnahme-Datei angelegt");
        Ok(Self {
            pfad,
            inhalt: Mutex::new(Zustand {
                schreiber: BufWriter::new(datei),
                frames: 0,
                bytes: 0,
                defekt: false,
            }),
        })
    }

    pub fn pfad(&self) -> &Path {
        &self.pfad
    }

    /// (Frames, Bytes) bisher geschrieben
    pub fn statistik(&self) -> (u64, u64) {
        let z = self.inhalt.lock();
        (z.frames, z.bytes)
    }

    /// Schreibt gepufferte Daten auf die Platte
    pub fn abschliessen(&self) -> anyhow::Result<()> {
        let mut z = self.inhalt.lock();
        z.schreiber
            .flush()
            .map_err(|e| anyhow::anyhow!("Datei '{}' nicht schreibbar: {e}", self.pfad.display()))?;
        tracing::info!(
            pfad = %self.pfad.display(),
            frames = z.frames,
            bytes = z.bytes,
            "Aufnahme abgeschlossen"
        );
        Ok(())
    }
}

impl FrameSink for DateiSink {
    fn accept(&self, frame: VideoFrame) {
        let mut z = self.inhalt.lock();
        if z.defekt {
            return;
        }
        if let Err(e) = z.schreiber.write_all(&frame.data) {
            tracing::error!(
                pfad = %self.pfad.display(),
                fehler = %e,
                "Frame nicht schreibbar, Aufnahme angehalten"
            );
            z.defekt = true;
            return;
        }
        z.frames += 1;
        z.bytes += frame.data.len() as u64;
    }
}

fn dateiname(device: DeviceId, zeit: chrono::DateTime<chrono::Utc>) -> String {
    format!("{device}_{}.h264", zeit.format("%Y%m%dT%H%M%SZ"))
}
