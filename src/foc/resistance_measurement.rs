// Phase resistance measurement by tracking a fixed test current

use super::control_law::AlphaBetaFrameController;
use crate::config::calibration::RESISTANCE_KI;
use crate::error::MotorError;

/// Drives a constant current along the alpha axis with a pure integrator.
///
/// Once the integrator has settled, the applied voltage divided by the test
/// current is the phase resistance.
pub struct ResistanceMeasurement {
    /// Integrator gain [(V/s)/A]
    ki: f32,
    /// Test current [A]
    test_current: f32,
    /// Voltage above which the measurement is aborted [V]
    max_voltage: f32,
    /// Time between two current measurements [s]
    current_meas_period: f32,
    /// Integrated phase voltage [V]
    test_voltage: f32,
    /// Modulation for the next output, NaN until the first valid measurement
    test_mod: f32,
}

impl ResistanceMeasurement {
    /// Create a new resistance measurement
    ///
    /// # Arguments
    /// * `test_current` - Current to drive through the phase [A]
    /// * `max_voltage` - Maximum test voltage [V]
    /// * `current_meas_period` - Time between two current measurements [s]
    pub fn new(test_current: f32, max_voltage: f32, current_meas_period: f32) -> Self {
        Self {
            ki: RESISTANCE_KI,
            test_current,
            max_voltage,
            current_meas_period,
            test_voltage: 0.0,
            test_mod: f32::NAN,
        }
    }

    /// Measured phase resistance [Ω]. NaN if the measurement failed.
    pub fn get_resistance(&self) -> f32 {
        self.test_voltage / self.test_current
    }

    /// Currently applied test voltage [V]
    pub fn test_voltage(&self) -> f32 {
        self.test_voltage
    }
}

impl AlphaBetaFrameController for ResistanceMeasurement {
    fn reset(&mut self) {
        self.test_voltage = 0.0;
        self.test_mod = f32::NAN;
    }

    fn on_alpha_beta_measurement(
        &mut self,
        vbus_voltage: f32,
        i_alpha: f32,
        _i_beta: f32,
        _input_timestamp: u32,
    ) -> Result<(), MotorError> {
        // DCオフセット推定が完了するまで電流は未確定
        if i_alpha.is_nan() {
            return Ok(());
        }

        self.test_voltage += (self.ki * self.current_meas_period) * (self.test_current - i_alpha);

        if libm::fabsf(self.test_voltage) > self.max_voltage {
            self.test_voltage = f32::NAN;
            Err(MotorError::PHASE_RESISTANCE_OUT_OF_RANGE)
        } else if vbus_voltage.is_nan() {
            Err(MotorError::UNKNOWN_VBUS_VOLTAGE)
        } else {
            let vfactor = 1.0 / ((2.0 / 3.0) * vbus_voltage);
            self.test_mod = self.test_voltage * vfactor;
            Ok(())
        }
    }

    fn get_alpha_beta_output(&mut self, _output_timestamp: u32) -> Result<(f32, f32), MotorError> {
        if self.test_mod.is_nan() {
            Err(MotorError::CONTROLLER_INITIALIZING)
        } else {
            Ok((self.test_mod, 0.0))
        }
    }
}
