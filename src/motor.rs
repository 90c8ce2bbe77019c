//! モーター電流制御コア
//!
//! PWMタイマーの更新割り込みで実行される更新サイクルと、バックグラウンドタスクから
//! 呼ばれるアーム/ディスアーム・キャリブレーションが共有する状態を管理します。
//!
//! 共有状態はクリティカルセクションで保護され、割り込み側は1サイクル全体を
//! 1つのクリティカルセクション内で実行します。

mod calibration;
mod limits;
mod update_cycle;

use core::cell::RefCell;
use core::ptr::NonNull;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::current_sense::{AMPLIFIER_MARGIN, MAX_DC_CALIB_FRACTION, MAX_OUTPUT_SWING};
use crate::config::{HardwareConfig, MotorConfig};
use crate::current_sense::{AdcBounds, CurrentScaling, DcCalibration};
use crate::error::{MotorError, SetupError};
use crate::foc::ControlLaw;
use crate::hardware::{AxisHooks, GateDriver, PwmTimer, Supervisor};
use crate::phase::PhaseTriple;

pub use calibration::WaitOutcome;
pub use limits::{effective_current_limit, max_available_torque};

/// 電流制御器のゲイン
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentControlGains {
    /// 比例ゲイン [V/A]
    pub p_gain: f32,
    /// 積分ゲイン [V/(A·s)]
    pub i_gain: f32,
}

impl CurrentControlGains {
    /// 相抵抗とインダクタンスからゲインを求める（極零相殺）
    ///
    /// # 引数
    /// * `bandwidth` - 電流制御帯域 [rad/s]
    /// * `resistance` - 相抵抗 [Ω]
    /// * `inductance` - 相インダクタンス [H]
    pub fn from_plant(bandwidth: f32, resistance: f32, inductance: f32) -> Self {
        let p_gain = bandwidth * inductance;
        let plant_pole = resistance / inductance;
        Self {
            p_gain,
            i_gain: plant_pole * p_gain,
        }
    }
}

/// アーム中の制御則への参照（寿命を消去したポインタ）
#[derive(Clone, Copy)]
struct ControlLawPtr(NonNull<dyn ControlLaw>);

// アーム中のみ有効で、クリティカルセクション内でのみ参照される
unsafe impl Send for ControlLawPtr {}

impl ControlLawPtr {
    /// # Safety
    /// 制御則はスロットから外されるまで有効でなければならない
    unsafe fn new<'a>(law: &'a mut (dyn ControlLaw + 'a)) -> Self {
        let law: &'static mut dyn ControlLaw = core::mem::transmute(law);
        Self(NonNull::from(law))
    }

    /// # Safety
    /// スロットに保持されている間のみ呼び出せる
    unsafe fn get<'a>(mut self) -> &'a mut dyn ControlLaw {
        self.0.as_mut()
    }
}

/// A three-phase motor driven by a center-aligned PWM timer.
///
/// `tim_update_cb` must be called from the timer update interrupt; everything
/// else runs from a background task. All methods take `&self` so the motor can
/// live in a `static`.
pub struct Motor<T, G, S, A> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<MotorInner<T, G, S, A>>>,
}

struct MotorInner<T, G, S, A> {
    timer: T,
    gate_driver: G,
    supervisor: S,
    axis: A,

    config: MotorConfig,
    hardware: HardwareConfig,

    is_armed: bool,
    control_law: Option<ControlLawPtr>,
    error: MotorError,
    /// タイマーティック単位のタイムスタンプ
    last_update_timestamp: u32,
    /// 前回の更新イベントでのカウント方向
    counting_down: bool,

    adc_bounds: AdcBounds,
    scaling: CurrentScaling,
    dc_calib: DcCalibration,
    /// 上限電流 [A]（アンプの測定レンジ）
    max_allowed_current: f32,
    /// DCオフセットの許容値 [A]
    max_dc_calib: f32,

    current_meas: PhaseTriple<f32>,
    i_leak: f32,
    i_bus: f32,
    effective_current_lim: f32,

    is_calibrated: bool,
    current_control: CurrentControlGains,
}

impl<T, G, S, A> Motor<T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    /// 新しいモーターを作成（ディスアーム状態）
    ///
    /// 電流センスを使う前に [`setup`](Self::setup) を呼ぶ必要があります。
    ///
    /// # 引数
    /// * `timer` - 3相PWMタイマー
    /// * `gate_driver` - ゲートドライバ
    /// * `supervisor` - システム監視
    /// * `axis` - 軸側のフック
    /// * `config` - モーター設定
    /// * `hardware` - ハードウェア設定
    pub fn new(
        timer: T,
        gate_driver: G,
        supervisor: S,
        axis: A,
        config: MotorConfig,
        hardware: HardwareConfig,
    ) -> Self {
        let sense = hardware.current_sense;
        let counting_down = timer.is_counting_down();
        let mut inner = MotorInner {
            timer,
            gate_driver,
            supervisor,
            axis,
            config,
            hardware,
            is_armed: false,
            control_law: None,
            error: MotorError::empty(),
            last_update_timestamp: 0,
            counting_down,
            adc_bounds: sense.adc_bounds(),
            scaling: CurrentScaling::new(sense.adc_bits, sense.adc_vref, sense.shunt_conductance),
            dc_calib: DcCalibration::new(),
            max_allowed_current: 0.0,
            max_dc_calib: 0.0,
            current_meas: PhaseTriple::NAN,
            i_leak: f32::NAN,
            i_bus: 0.0,
            effective_current_lim: 0.0,
            is_calibrated: false,
            current_control: CurrentControlGains {
                p_gain: 0.0,
                i_gain: 0.0,
            },
        };
        inner.apply_config(config);

        Self {
            inner: Mutex::new(RefCell::new(inner)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MotorInner<T, G, S, A>) -> R) -> R {
        self.inner.lock(|inner| f(&mut inner.borrow_mut()))
    }

    /// ゲートドライバと電流センスアンプを設定
    ///
    /// 要求電流レンジを満たすアンプゲインを要求し、実際のゲインから
    /// 電流換算係数と使用可能な電流レンジを決定します。
    pub fn setup(&self) -> Result<(), SetupError> {
        self.with(|inner| inner.setup())
    }

    /// 設定を適用し、電流制御器のゲインを再計算
    pub fn apply_config(&self, config: MotorConfig) {
        self.with(|inner| inner.apply_config(config));
    }

    /// モーターをアームする
    ///
    /// 制御則と軸のコントローラをリセットし、アーム状態にします。出力は次の
    /// PWM更新で確定したデューティと同時に、ハードウェアの更新イベントで有効になります。
    /// ブレーキ抵抗が使用できない場合は何もせず `false` を返します。
    ///
    /// # Safety
    /// `control_law` は [`disarm`](Self::disarm) されるまで（故障による
    /// ディスアームを含む）有効でなければならず、その間に他から参照してはいけません。
    /// ディスアームを確認してから制御則を破棄すること。
    pub unsafe fn arm(&self, control_law: Option<&mut dyn ControlLaw>) -> bool {
        let control_law = match control_law {
            Some(law) => Some(ControlLawPtr::new(law)),
            None => None,
        };
        self.with(|inner| inner.arm(control_law))
    }

    /// モーターをディスアームする
    ///
    /// 戻った時点で全相がフローティングになり、次に `arm` されるまで出力されません。
    ///
    /// # 戻り値
    /// アーム状態だったか
    pub fn disarm(&self) -> bool {
        self.with(|inner| inner.disarm())
    }

    /// エラーを記録してディスアームする
    pub fn disarm_with_error(&self, error: MotorError) {
        self.with(|inner| inner.disarm_with_error(error));
    }

    /// ゲートドライバのチェック。異常時は `DRV_FAULT` でディスアーム
    pub fn do_checks(&self) -> bool {
        self.with(|inner| {
            inner.gate_driver.do_checks();
            if !inner.gate_driver.is_ready() {
                inner.disarm_with_error(MotorError::DRV_FAULT);
                return false;
            }
            true
        })
    }

    /// 現在のエラー
    pub fn error(&self) -> MotorError {
        self.with(|inner| inner.error)
    }

    pub fn clear_errors(&self) {
        self.with(|inner| inner.error = MotorError::empty());
    }

    pub fn is_armed(&self) -> bool {
        self.with(|inner| inner.is_armed)
    }

    pub fn is_calibrated(&self) -> bool {
        self.with(|inner| inner.is_calibrated)
    }

    pub fn config(&self) -> MotorConfig {
        self.with(|inner| inner.config)
    }

    pub fn current_control(&self) -> CurrentControlGains {
        self.with(|inner| inner.current_control)
    }

    /// 最新の相電流 [A]（DCオフセット推定が無効な間はNaN）
    pub fn current_meas(&self) -> PhaseTriple<f32> {
        self.with(|inner| inner.current_meas)
    }

    /// 最新のリーク電流 [A]
    pub fn i_leak(&self) -> f32 {
        self.with(|inner| inner.i_leak)
    }

    /// 最新のバス電流 [A]
    pub fn i_bus(&self) -> f32 {
        self.with(|inner| inner.i_bus)
    }

    pub fn dc_calib(&self) -> DcCalibration {
        self.with(|inner| inner.dc_calib)
    }

    /// アンプの測定レンジから決まる電流上限 [A]
    pub fn max_allowed_current(&self) -> f32 {
        self.with(|inner| inner.max_allowed_current)
    }

    pub fn last_update_timestamp(&self) -> u32 {
        self.with(|inner| inner.last_update_timestamp)
    }
}

impl<T, G, S, A> MotorInner<T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    fn setup(&mut self) -> Result<(), SetupError> {
        if !self.hardware.current_sense.has_valid_resolution() {
            error!("Unsupported ADC resolution: {} bits", self.hardware.current_sense.adc_bits);
            return Err(SetupError::AdcResolution);
        }

        // 要求レンジ以上になるようゲインを丸め、無理なら最大レンジ
        let max_unity_gain_current =
            AMPLIFIER_MARGIN * MAX_OUTPUT_SWING * self.hardware.current_sense.shunt_conductance;
        let requested_gain = max_unity_gain_current / self.config.requested_current_range;

        let Some(actual_gain) = self.gate_driver.config(requested_gain) else {
            error!("Gate driver rejected amplifier gain {}", requested_gain);
            return Err(SetupError::GainConfig);
        };

        self.scaling.set_amplifier_gain(actual_gain);
        self.max_allowed_current = max_unity_gain_current * self.scaling.rev_gain();
        self.max_dc_calib = MAX_DC_CALIB_FRACTION * self.max_allowed_current;

        if !self.gate_driver.init() {
            error!("Gate driver init failed");
            return Err(SetupError::GateDriverInit);
        }

        info!(
            "Current sense ready: gain={} V/V, range={} A",
            actual_gain,
            self.max_allowed_current
        );
        Ok(())
    }

    fn apply_config(&mut self, config: MotorConfig) {
        self.config = config;
        self.is_calibrated = config.pre_calibrated;
        self.update_current_controller_gains();
    }

    fn update_current_controller_gains(&mut self) {
        self.current_control = CurrentControlGains::from_plant(
            self.config.current_control_bandwidth,
            self.config.phase_resistance,
            self.config.phase_inductance,
        );
    }

    fn arm(&mut self, control_law: Option<ControlLawPtr>) -> bool {
        if !self.supervisor.brake_resistor_armed() {
            warn!("Arm refused: brake resistor not armed");
            return false;
        }

        self.control_law = control_law;

        // 積分器・目標値などをリセット
        self.axis.reset_controller();
        self.axis.reset_rotor_flux();
        if let Some(law) = self.control_law {
            // SAFETY: スロットに保持中
            unsafe { law.get() }.reset();
        }

        self.gate_driver.set_enabled(true);
        self.is_armed = true;
        true
    }

    fn disarm(&mut self) -> bool {
        let was_armed = self.is_armed;
        if was_armed {
            self.gate_driver.set_enabled(false);
        }
        self.is_armed = false;
        // 次の更新イベントで出力が再び有効にならないようにする
        self.timer.set_auto_output_enable(false);
        self.timer.disable_output();
        self.control_law = None;
        self.i_bus = 0.0;

        if was_armed {
            self.supervisor.update_brake_current(self.i_bus);
        }
        was_armed
    }

    fn disarm_with_error(&mut self, error: MotorError) {
        if !self.error.contains(error) {
            warn!("Motor error: {}", error);
        }
        self.error |= error;
        self.disarm();
    }

    /// デューティを書き込む（次の更新イベントで反映）
    ///
    /// # 引数
    /// * `timings` - 3相のコンペア値
    /// * `tentative` - 仮の書き込み（出力を有効にしない）
    fn apply_pwm_timings(&mut self, timings: [u16; 3], tentative: bool) {
        if !self.supervisor.brake_resistor_armed() {
            self.disarm_with_error(MotorError::BRAKE_RESISTOR_DISARMED);
        }

        self.timer.set_compare(timings);

        if !tentative && self.is_armed {
            // 次の更新イベントでMOEが自動的にセットされる
            self.timer.set_auto_output_enable(true);
        }

        // 書き込み中に更新イベントが発生した場合、シャドウレジスタの内容は不定
        if self.timer.update_pending() {
            self.disarm_with_error(MotorError::CONTROL_DEADLINE_MISSED);
        }
    }
}
