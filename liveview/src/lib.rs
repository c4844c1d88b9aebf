//! klingel-liveview – Bibliotheks-Root
//!
//! Konfiguration und Datei-Ausgabe des Live-View-Programms; in `main.rs`
//! nur der Ablauf.

pub mod config;
pub mod sink;

pub use config::LiveViewConfig;
pub use sink::DateiSink;
