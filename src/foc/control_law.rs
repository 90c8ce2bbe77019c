// Control law interface driven by the motor update cycle

use super::svpwm::svm;
use super::transforms::clarke;
use crate::error::MotorError;
use crate::phase::PhaseTriple;

/// A control law attached to an armed motor.
///
/// `on_measurement` is called once per current measurement and `get_output`
/// once per PWM update. Both run in interrupt context and must return
/// before the next timer update event.
pub trait ControlLaw {
    /// Clear integrators and internal state. Called when the motor is armed.
    fn reset(&mut self);

    /// Consume one current measurement
    ///
    /// # Arguments
    /// * `vbus_voltage` - DC bus voltage [V], NaN if unknown
    /// * `currents` - Phase currents [A], NaN while the DC calibration is not valid
    /// * `input_timestamp` - Timer tick at which the currents were sampled
    fn on_measurement(
        &mut self,
        vbus_voltage: f32,
        currents: PhaseTriple<f32>,
        input_timestamp: u32,
    ) -> Result<(), MotorError>;

    /// Produce the phase timings to apply at `output_timestamp`
    ///
    /// # Returns
    /// Phase timings in [0, 1] (0 = DC+, 1 = DC-). `CONTROLLER_INITIALIZING`
    /// while no output is available yet.
    fn get_output(&mut self, output_timestamp: u32) -> Result<PhaseTriple<f32>, MotorError>;
}

/// A control law working in the stationary αβ frame.
///
/// Measurements are Clarke-transformed and the modulation output is turned
/// into phase timings with SVM.
pub trait AlphaBetaFrameController {
    fn reset(&mut self);

    fn on_alpha_beta_measurement(
        &mut self,
        vbus_voltage: f32,
        i_alpha: f32,
        i_beta: f32,
        input_timestamp: u32,
    ) -> Result<(), MotorError>;

    /// # Returns
    /// Tuple of (mod_alpha, mod_beta)
    fn get_alpha_beta_output(&mut self, output_timestamp: u32) -> Result<(f32, f32), MotorError>;
}

impl<T: AlphaBetaFrameController> ControlLaw for T {
    fn reset(&mut self) {
        AlphaBetaFrameController::reset(self);
    }

    fn on_measurement(
        &mut self,
        vbus_voltage: f32,
        currents: PhaseTriple<f32>,
        input_timestamp: u32,
    ) -> Result<(), MotorError> {
        let (i_alpha, i_beta) = clarke(currents);
        self.on_alpha_beta_measurement(vbus_voltage, i_alpha, i_beta, input_timestamp)
    }

    fn get_output(&mut self, output_timestamp: u32) -> Result<PhaseTriple<f32>, MotorError> {
        let (mod_alpha, mod_beta) = self.get_alpha_beta_output(output_timestamp)?;
        if mod_alpha.is_nan() || mod_beta.is_nan() {
            return Err(MotorError::MODULATION_IS_NAN);
        }
        svm(mod_alpha, mod_beta).ok_or(MotorError::MODULATION_MAGNITUDE)
    }
}
