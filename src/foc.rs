// FOC building blocks and the control laws run by the motor update cycle

pub mod control_law;
pub mod inductance_measurement;
pub mod resistance_measurement;
pub mod svpwm;
pub mod transforms;

// Re-export main types for easier access
pub use control_law::{AlphaBetaFrameController, ControlLaw};
pub use inductance_measurement::InductanceMeasurement;
pub use resistance_measurement::ResistanceMeasurement;
pub use svpwm::svm;
pub use transforms::clarke;
