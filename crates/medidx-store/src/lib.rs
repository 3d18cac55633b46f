//! medidx-store
//!
//! Tabular persistence: the read-only treatment table and the append-only
//! diagnosis history log.
pub mod history;
pub mod treatment;

pub use history::{CsvHistoryStore, MemoryHistoryStore};
pub use treatment::{TreatmentDirectory, FALLBACK_TREATMENT};
