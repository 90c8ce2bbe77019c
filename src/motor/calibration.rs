//! モーターキャリブレーション
//!
//! 相抵抗とインダクタンスを測定用の制御則で測定し、電流制御器のゲインを決定します。
//! 測定中はバックグラウンドタスクから一定周期でモーターの状態をポーリングします。

use core::marker::PhantomData;

use embedded_hal_async::delay::DelayNs;

use crate::config::calibration::{
    INDUCTANCE_MAX_POLLS, MAX_PHASE_INDUCTANCE, MIN_PHASE_INDUCTANCE, POLL_INTERVAL,
    RESISTANCE_MAX_POLLS,
};
use crate::config::MotorType;
use crate::error::MotorError;
use crate::foc::{ControlLaw, InductanceMeasurement, ResistanceMeasurement};
use crate::hardware::{AxisHooks, AxisState, GateDriver, PwmTimer, Supervisor};

use super::Motor;

/// 測定待ちの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitOutcome {
    /// モーターがディスアームされた（測定の終了または故障）
    Completed,
    /// 軸に別の状態が要求された
    Cancelled,
    /// ポーリング回数の上限に達した
    TimedOut,
}

/// アーム中の測定セッション
///
/// ドロップ時に必ずディスアームするため、借用した制御則がセッションより長く
/// 参照されることはありません。
struct ArmedSession<'m, 'l, T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    motor: &'m Motor<T, G, S, A>,
    _law: PhantomData<&'l mut ()>,
}

impl<'m, 'l, T, G, S, A> ArmedSession<'m, 'l, T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    fn arm(motor: &'m Motor<T, G, S, A>, law: &'l mut dyn ControlLaw) -> Self {
        // SAFETY: `law` は `'l` の間借用され、セッションのドロップでディスアームされる
        if !unsafe { motor.arm(Some(law)) } {
            warn!("Calibration could not arm the motor");
        }
        Self {
            motor,
            _law: PhantomData,
        }
    }
}

impl<T, G, S, A> Drop for ArmedSession<'_, '_, T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    fn drop(&mut self) {
        self.motor.disarm();
    }
}

impl<T, G, S, A> Motor<T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    /// モーターがアームされている間、一定周期で待つ
    ///
    /// # 引数
    /// * `delay` - 遅延プロバイダ
    /// * `max_polls` - 最大ポーリング回数
    pub async fn wait_while_armed<D: DelayNs>(&self, delay: &mut D, max_polls: u32) -> WaitOutcome {
        let interval_us = POLL_INTERVAL.as_micros() as u32;
        for _ in 0..max_polls {
            let (is_armed, requested_state) =
                self.with(|inner| (inner.is_armed, inner.axis.requested_state()));
            if requested_state != AxisState::Undefined {
                return WaitOutcome::Cancelled;
            }
            if !is_armed {
                return WaitOutcome::Completed;
            }
            delay.delay_us(interval_us).await;
        }
        WaitOutcome::TimedOut
    }

    /// 相抵抗を測定し、設定に保存
    ///
    /// # 引数
    /// * `delay` - 遅延プロバイダ
    /// * `test_current` - 試験電流 [A]
    /// * `max_voltage` - 最大試験電圧 [V]
    ///
    /// # 戻り値
    /// 測定期間の終わりまでアーム状態が維持され、有効な値が得られたか
    pub async fn measure_phase_resistance<D: DelayNs>(
        &self,
        delay: &mut D,
        test_current: f32,
        max_voltage: f32,
    ) -> bool {
        let period = self.with(|inner| inner.hardware.timing.current_meas_period());
        let mut control_law = ResistanceMeasurement::new(test_current, max_voltage, period);

        let (outcome, mut success) = {
            let _session = ArmedSession::arm(self, &mut control_law);
            let outcome = self.wait_while_armed(delay, RESISTANCE_MAX_POLLS).await;
            (outcome, self.is_armed())
        };

        let resistance = control_law.get_resistance();
        self.with(|inner| {
            inner.config.phase_resistance = resistance;
            if !resistance.is_finite() {
                inner.disarm_with_error(MotorError::PHASE_RESISTANCE_OUT_OF_RANGE);
                success = false;
            }
        });

        info!(
            "Phase resistance: {} ohm ({}, success={})",
            resistance,
            outcome,
            success
        );
        success
    }

    /// 相インダクタンスを測定し、設定に保存
    ///
    /// # 引数
    /// * `delay` - 遅延プロバイダ
    /// * `test_voltage` - 試験電圧 [V]
    ///
    /// # 戻り値
    /// 測定期間の終わりまでアーム状態が維持され、妥当な値が得られたか
    pub async fn measure_phase_inductance<D: DelayNs>(&self, delay: &mut D, test_voltage: f32) -> bool {
        let clock_hz = self.with(|inner| inner.hardware.timing.clock_hz);
        let mut control_law = InductanceMeasurement::new(test_voltage, clock_hz);

        let (outcome, mut success) = {
            let _session = ArmedSession::arm(self, &mut control_law);
            let outcome = self.wait_while_armed(delay, INDUCTANCE_MAX_POLLS).await;
            (outcome, self.is_armed())
        };

        let inductance = control_law.get_inductance();
        self.with(|inner| {
            inner.config.phase_inductance = inductance;
            // NaNも範囲外として扱う
            if !(MIN_PHASE_INDUCTANCE..=MAX_PHASE_INDUCTANCE).contains(&inductance) {
                inner.error |= MotorError::PHASE_INDUCTANCE_OUT_OF_RANGE;
                success = false;
            }
        });

        info!(
            "Phase inductance: {} H ({}, success={})",
            inductance,
            outcome,
            success
        );
        success
    }

    /// モーター種別に応じたキャリブレーションを実行
    ///
    /// 電流制御するモーターでは相抵抗とインダクタンスを測定し、電流制御器の
    /// ゲインを更新します。ジンバルモーターは測定しません。
    ///
    /// # 戻り値
    /// キャリブレーションに成功したか
    pub async fn run_calibration<D: DelayNs>(&self, delay: &mut D) -> bool {
        let config = self.config();

        match config.motor_type {
            MotorType::HighCurrent | MotorType::Acim => {
                let max_voltage = config.resistance_calib_max_voltage;
                if !self
                    .measure_phase_resistance(delay, config.calibration_current, max_voltage)
                    .await
                {
                    return false;
                }
                if !self.measure_phase_inductance(delay, max_voltage).await {
                    return false;
                }
            }
            MotorType::Gimbal => {}
        }

        self.with(|inner| {
            inner.update_current_controller_gains();
            inner.is_calibrated = true;
            info!("Motor calibrated: gains={}", inner.current_control);
        });
        true
    }
}
