//! Schema definitions for tunnelwatch
//!
//! This crate contains the data structures shared by the core engine and the
//! console front-end. All types here implement JSON Schema generation so the
//! `--json` output of the CLI is self-describing.

pub mod capture;
pub mod records;

pub use capture::{current_timestamp, CaptureState, ProcessExit};
pub use records::{
    CapturedRecord, PredictionEntry, PredictionRecord, PredictionReport, PredictionSnapshot,
    MISSING_FIELD,
};
