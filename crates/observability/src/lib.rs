//! # klingel-observability
//!
//! Observability-Crate fuer Klingel:
//! - Structured Logging via tracing-subscriber (Text oder JSON)
//! - Protokoll aller Wechsel des Verbindungszustands einer Session

pub mod logging;
pub mod zustand;

pub use logging::logging_initialisieren;
pub use zustand::{zustandsprotokoll_mit, zustandsprotokoll_starten, Uebergang};
