pub mod enums;
pub mod filters;
pub mod medication;

pub use enums::{MedicationForm, MedicationStatus};
pub use filters::*;
pub use medication::*;
