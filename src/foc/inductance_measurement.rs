// Phase inductance measurement by square-wave voltage excitation

use super::control_law::AlphaBetaFrameController;
use crate::error::MotorError;

/// Toggles between a positive and negative test voltage on every output
/// and accumulates the resulting current ripple.
pub struct InductanceMeasurement {
    /// Timer clock used to convert timestamps to seconds [Hz]
    clock_hz: u32,
    /// Magnitude of the test voltage [V]
    voltage_magnitude: f32,
    /// Test voltage of the most recent output [V]
    test_voltage: f32,
    /// Bus voltage of the most recent measurement [V]
    vbus_voltage: f32,
    attached: bool,
    start_timestamp: u32,
    last_i_alpha: f32,
    last_input_timestamp: u32,
    /// Accumulated current ripple [A]
    delta_i: f32,
}

impl InductanceMeasurement {
    /// Create a new inductance measurement
    ///
    /// # Arguments
    /// * `test_voltage` - Magnitude of the square-wave test voltage [V]
    /// * `clock_hz` - Clock rate of the timestamps passed to the measurement [Hz]
    pub fn new(test_voltage: f32, clock_hz: u32) -> Self {
        let voltage_magnitude = libm::fabsf(test_voltage);
        Self {
            clock_hz,
            voltage_magnitude,
            test_voltage: voltage_magnitude,
            vbus_voltage: f32::NAN,
            attached: false,
            start_timestamp: 0,
            last_i_alpha: f32::NAN,
            last_input_timestamp: 0,
            delta_i: 0.0,
        }
    }

    /// Measured phase inductance [H]
    ///
    /// The finite timestep is not accounted for here; the current control
    /// loop discretization inverts the same discrepancy.
    pub fn get_inductance(&self) -> f32 {
        let dt = self.last_input_timestamp.wrapping_sub(self.start_timestamp) as f32
            / self.clock_hz as f32;
        libm::fabsf(self.test_voltage) / (self.delta_i / dt)
    }
}

impl AlphaBetaFrameController for InductanceMeasurement {
    fn reset(&mut self) {
        self.test_voltage = self.voltage_magnitude;
        self.vbus_voltage = f32::NAN;
        self.attached = false;
        self.last_i_alpha = f32::NAN;
        self.delta_i = 0.0;
    }

    fn on_alpha_beta_measurement(
        &mut self,
        vbus_voltage: f32,
        i_alpha: f32,
        _i_beta: f32,
        input_timestamp: u32,
    ) -> Result<(), MotorError> {
        if i_alpha.is_nan() || vbus_voltage.is_nan() {
            return Err(MotorError::UNKNOWN_VBUS_VOLTAGE);
        }
        self.vbus_voltage = vbus_voltage;

        if self.attached {
            let sign = if self.test_voltage >= 0.0 { 1.0 } else { -1.0 };
            self.delta_i += -sign * (i_alpha - self.last_i_alpha);
        } else {
            self.start_timestamp = input_timestamp;
            self.attached = true;
        }

        self.last_i_alpha = i_alpha;
        self.last_input_timestamp = input_timestamp;
        Ok(())
    }

    fn get_alpha_beta_output(&mut self, _output_timestamp: u32) -> Result<(f32, f32), MotorError> {
        // 最初の測定までバス電圧が不明
        if self.vbus_voltage.is_nan() {
            return Err(MotorError::CONTROLLER_INITIALIZING);
        }
        self.test_voltage = -self.test_voltage;
        let vfactor = 1.0 / ((2.0 / 3.0) * self.vbus_voltage);
        Ok((self.test_voltage * vfactor, 0.0))
    }
}
