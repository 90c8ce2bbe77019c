//! 更新サイクル
//!
//! PWMタイマーの更新イベントごとに1回、割り込みコンテキストで実行されます。
//! 中央揃えPWMの1周期には2回の更新イベントがあり、カウント方向で役割が決まります。
//!
//! - ダウンカウント開始時（ゼロ電流区間のサンプル）: DCオフセット推定とPWM更新
//! - アップカウント開始時（実電流のサンプル）: 電流測定、制限チェック、制御則への入力
//!
//! PWM更新で書き込んだデューティは次の更新イベントでラッチされるため、
//! 計算は次のイベントまでに完了している必要があります。

use libm::fabsf;

use crate::error::MotorError;
use crate::hardware::{AxisHooks, GateDriver, PwmTimer, Supervisor};
use crate::phase::PhaseTriple;

use super::{Motor, MotorInner};

impl<T, G, S, A> Motor<T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    /// タイマー更新割り込みから呼び出す
    ///
    /// サイクル全体が1つのクリティカルセクション内で実行されるため、
    /// バックグラウンドからの `arm`/`disarm` はサイクルの前後どちらかに確定します。
    /// 検出した故障はすべてディスアームとエラー記録で処理され、呼び出し元には返りません。
    ///
    /// タイマーの更新フラグ（UIF）はサイクルの先頭でクリアされます。以降に立った
    /// フラグは、デューティの確定が次の更新イベントに間に合わなかったことを示します。
    ///
    /// # 引数
    /// * `adc` - 直前のサンプリングで得た3相のADCコード。測定のない相は `None`
    pub fn tim_update_cb(&self, adc: PhaseTriple<Option<u16>>) {
        self.with(|inner| inner.update(adc));
    }
}

impl<T, G, S, A> MotorInner<T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    fn update(&mut self, adc: PhaseTriple<Option<u16>>) {
        self.timer.clear_update_flag();

        let timing = self.hardware.timing;
        self.last_update_timestamp = self
            .last_update_timestamp
            .wrapping_add(timing.ticks_per_update());

        // アップカウント中なら零ベクトル0（実電流）、ダウンカウント中なら零ベクトル7（ゼロ電流）をサンプル済み
        let counting_down = self.timer.is_counting_down();
        if counting_down == self.counting_down {
            self.disarm_with_error(MotorError::TIMER_UPDATE_MISSED);
            return;
        }
        self.counting_down = counting_down;

        let should_update_pwm = counting_down;
        let was_current_dc_calib = counting_down;
        let was_current_sense = !counting_down;

        if should_update_pwm {
            // 計算が失敗・遅延した場合に備えて50%デューティを仮設定
            self.apply_pwm_timings(timing.half_timings(), true);
        }

        // センサーのハードウェア限界に近い測定値は使わない
        let (codes, saturated) = self.adc_bounds.sanitize(adc);
        if saturated {
            self.disarm_with_error(MotorError::CURRENT_SENSE_SATURATION);
        }

        let currents = self
            .hardware
            .current_sense
            .sensor_mask
            .infer(self.scaling.convert(codes));

        if was_current_dc_calib {
            self.dc_calib.update(currents, timing.current_meas_period(), self.config.dc_calib_tau);
        }

        if was_current_sense {
            self.sense_currents(currents);
        }

        if should_update_pwm {
            self.update_pwm();
        }
    }

    fn sense_currents(&mut self, currents: PhaseTriple<f32>) {
        let dc_calib_valid = self.dc_calib.is_valid(self.config.dc_calib_tau, self.max_dc_calib);
        if currents.is_valid() && dc_calib_valid {
            let (current_meas, i_leak) = self.dc_calib.correct(currents);
            self.current_meas = current_meas;
            self.i_leak = i_leak;
        } else {
            self.current_meas = PhaseTriple::NAN;
            self.i_leak = f32::NAN;
        }

        if fabsf(self.i_leak) > self.config.i_leak_max {
            self.disarm_with_error(MotorError::I_LEAK_OUT_OF_RANGE);
        }

        // 過電圧・低電圧などシステムレベルのチェック
        if !self.supervisor.do_fast_checks() {
            self.disarm_with_error(MotorError::SYSTEM_LEVEL);
        }

        // a + b + c = 0 のとき Id² + Iq² = 2/3 × (Ia² + Ib² + Ic²)
        let i_trip = self.update_effective_current_lim() + self.config.current_lim_margin;
        if 2.0 / 3.0 * self.current_meas.sum_of_squares() > i_trip * i_trip {
            self.disarm_with_error(MotorError::CURRENT_LIMIT_VIOLATION);
        }

        if let Some(law) = self.control_law {
            let vbus_voltage = self.supervisor.vbus_voltage();
            // SAFETY: スロットに保持中
            let result = unsafe { law.get() }.on_measurement(
                vbus_voltage,
                self.current_meas,
                self.last_update_timestamp,
            );
            if let Err(err) = result {
                self.disarm_with_error(err);
            }
        }
    }

    fn update_pwm(&mut self) {
        let timing = self.hardware.timing;
        let mut i_bus = 0.0;

        // 出力は2更新イベント後に有効になる
        let result = match self.control_law {
            Some(law) => {
                let output_timestamp = self
                    .last_update_timestamp
                    .wrapping_add(2 * timing.ticks_per_update());
                // SAFETY: スロットに保持中
                unsafe { law.get() }.get_output(output_timestamp)
            }
            None => Err(MotorError::CONTROLLER_FAILED),
        };

        match result {
            Ok(pwm_timings) if self.is_armed => {
                // タイミング1がDC-、0がDC+に対応
                let weights = pwm_timings.map(|t| 0.5 - t);
                i_bus = weights
                    .zip_with(self.current_meas, |w, i| w * i)
                    .sum();

                let period = timing.period_clocks as f32;
                let next_timings = pwm_timings.map(|t| (t * period) as u16).into_array();
                self.apply_pwm_timings(next_timings, false);
            }
            Err(err) if self.is_armed => {
                // ソフトウェアでアーム済みでもハードウェア出力前なら初期化中は許容
                let initializing = err == MotorError::CONTROLLER_INITIALIZING
                    && !self.timer.is_output_enabled();
                if !initializing {
                    let err = if err.is_empty() {
                        MotorError::CONTROLLER_FAILED
                    } else {
                        err
                    };
                    self.disarm_with_error(err);
                }
            }
            _ => {}
        }

        if !self.is_armed {
            i_bus = 0.0;
        }
        self.i_bus = i_bus;

        if i_bus < self.config.i_bus_hard_min || i_bus > self.config.i_bus_hard_max {
            self.disarm_with_error(MotorError::I_BUS_OUT_OF_RANGE);
        }

        self.supervisor.update_brake_current(self.i_bus);
    }
}
