//! Dose scheduling: frequency rules, dose generation, and the dose lifecycle.

pub mod frequency;
pub mod generator;
pub mod lifecycle;

pub use frequency::{expand, FrequencyRule};
pub use generator::{generate_doses, generate_horizon, GenerationReport, HorizonReport};
pub use lifecycle::{
    cancel_dose, correct_dose, dose_history, mark_missed, record_dose, record_prn_dose, skip_dose,
    sweep, SweepReport,
};
