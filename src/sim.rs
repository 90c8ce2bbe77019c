//! テスト用のハードウェアシミュレーション
//!
//! PWMタイマー・ゲートドライバ・システム監視・軸をモックし、RL負荷のモーターを
//! 更新イベント単位で進めます。各イベントの処理順序は実機と同じです。
//!
//! 1. 直前にラッチされたデューティで負荷を積分
//! 2. カウント方向の反転
//! 3. ADCサンプル（ダウンカウント開始時はゼロ電流区間）
//! 4. シャドウレジスタのラッチ（AOEならMOEをセット）
//! 5. 更新割り込み

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use embedded_hal_async::delay::DelayNs;

use crate::config::current_sense::{DEFAULT_ADC_BITS, DEFAULT_ADC_VREF, DEFAULT_MAX_VOLT, DEFAULT_MIN_VOLT};
use crate::config::{CurrentSenseConfig, HardwareConfig, MotorConfig, PwmTiming};
use crate::current_sense::SensorMask;
use crate::error::MotorError;
use crate::foc::ControlLaw;
use crate::hardware::{AxisHooks, AxisState, CurrentLimiter, GateDriver, PwmTimer, Supervisor};
use crate::motor::Motor;
use crate::phase::PhaseTriple;

const TIMING: PwmTiming = PwmTiming {
    clock_hz: 168_000_000,
    period_clocks: 3500,
    repetition_counter: 2,
};

const SHUNT_CONDUCTANCE: f32 = 2000.0;

/// 更新イベントの間隔 [ns]
const EVENT_NS: u64 = 62_500;

/// タイマーレジスタ
#[derive(Debug, Default)]
pub struct TimerRegs {
    /// プリロードされたコンペア値
    pub shadow: [u16; 3],
    /// 出力中のコンペア値
    pub active: [u16; 3],
    pub aoe: bool,
    pub moe: bool,
    pub counting_down: bool,
    /// 更新イベントで立ち、ソフトウェアでクリアされる（UIF）
    pub update_flag: bool,
}

/// 3相RL負荷（中性点は浮いている）
#[derive(Debug)]
pub struct Plant {
    pub currents: PhaseTriple<f32>,
    pub resistance: f32,
    pub inductance: f32,
}

#[derive(Debug)]
pub struct SimState {
    pub timer: TimerRegs,
    pub compare_writes: u32,
    /// 書き込み中に更新イベントが発生したことにする
    pub deadline_overrun: bool,

    pub plant: Plant,
    /// ADCのオフセット [code]
    pub adc_offset: PhaseTriple<i32>,
    /// このイベント以降、A相のADCを飽和させる
    pub saturate_from_event: Option<u64>,
    pub events: u64,

    pub vbus: f32,
    pub brake_armed: bool,
    pub fast_checks_ok: bool,
    pub brake_current: f32,
    pub brake_updates: u32,

    pub gate_enabled: bool,
    pub gate_ready: bool,
    pub gate_initialized: bool,
    pub init_ok: bool,
    pub gain_ok: bool,
    pub requested_gain: f32,
    /// 要求に関わらず設定されるゲイン
    pub gain_step: Option<f32>,
    amplifier_gain: f32,

    pub requested_state: AxisState,
    pub controller_resets: u32,
    pub rotor_flux: f32,
    pub rotor_flux_resets: u32,
}

impl SimState {
    fn new() -> Self {
        Self {
            timer: TimerRegs::default(),
            compare_writes: 0,
            deadline_overrun: false,
            plant: Plant {
                currents: PhaseTriple::ZERO,
                resistance: 0.1,
                inductance: 200e-6,
            },
            adc_offset: PhaseTriple::new(5, -3, 2),
            saturate_from_event: None,
            events: 0,
            vbus: 24.0,
            brake_armed: true,
            fast_checks_ok: true,
            brake_current: 0.0,
            brake_updates: 0,
            gate_enabled: false,
            gate_ready: true,
            gate_initialized: false,
            init_ok: true,
            gain_ok: true,
            requested_gain: 0.0,
            gain_step: None,
            amplifier_gain: 0.0,
            requested_state: AxisState::Undefined,
            controller_resets: 0,
            rotor_flux: 0.0,
            rotor_flux_resets: 0,
        }
    }

    fn integrate_plant(&mut self, dt: f32) {
        if !self.timer.moe {
            self.plant.currents = PhaseTriple::ZERO;
            return;
        }

        let period = TIMING.period_clocks as f32;
        let vbus = self.vbus;
        let phase_voltages =
            PhaseTriple::from(self.timer.active).map(|t| vbus * (1.0 - t as f32 / period));
        let neutral = phase_voltages.sum() / 3.0;

        let r = self.plant.resistance;
        let l = self.plant.inductance;
        self.plant.currents = self.plant.currents.zip_with(phase_voltages, |i, v| {
            let v = v - neutral;
            if r > 0.0 {
                // 区間内で電圧一定として厳密に解く
                let i_ss = v / r;
                i_ss + (i - i_ss) * (-r * dt / l).exp()
            } else {
                i + v / l * dt
            }
        });
    }

    fn adc_code(&self, current: f32, offset: i32) -> u16 {
        let midpoint = 1i32 << (DEFAULT_ADC_BITS - 1);
        let counts = if self.amplifier_gain > 0.0 {
            let amps_per_code = DEFAULT_ADC_VREF / (1u32 << DEFAULT_ADC_BITS) as f32
                / self.amplifier_gain
                * SHUNT_CONDUCTANCE;
            (current / amps_per_code).round() as i32
        } else {
            0
        };
        (midpoint + offset + counts).clamp(0, (1 << DEFAULT_ADC_BITS) - 1) as u16
    }

    fn adc_for_currents(&self, currents: PhaseTriple<f32>, mask: SensorMask) -> PhaseTriple<Option<u16>> {
        let codes = currents.zip_with(self.adc_offset, |i, offset| self.adc_code(i, offset));
        PhaseTriple::new(
            (mask.0 & 0b001 != 0).then_some(codes.a),
            (mask.0 & 0b010 != 0).then_some(codes.b),
            (mask.0 & 0b100 != 0).then_some(codes.c),
        )
    }
}

pub struct MockTimer(Rc<RefCell<SimState>>);

impl PwmTimer for MockTimer {
    fn is_counting_down(&self) -> bool {
        self.0.borrow().timer.counting_down
    }

    fn set_compare(&mut self, timings: [u16; 3]) {
        let mut state = self.0.borrow_mut();
        state.timer.shadow = timings;
        state.compare_writes += 1;
    }

    fn set_auto_output_enable(&mut self, enable: bool) {
        self.0.borrow_mut().timer.aoe = enable;
    }

    fn disable_output(&mut self) {
        self.0.borrow_mut().timer.moe = false;
    }

    fn is_output_enabled(&self) -> bool {
        self.0.borrow().timer.moe
    }

    fn update_pending(&self) -> bool {
        let state = self.0.borrow();
        state.timer.update_flag || state.deadline_overrun
    }

    fn clear_update_flag(&mut self) {
        self.0.borrow_mut().timer.update_flag = false;
    }
}

pub struct MockGateDriver(Rc<RefCell<SimState>>);

impl GateDriver for MockGateDriver {
    fn config(&mut self, requested_gain: f32) -> Option<f32> {
        let mut state = self.0.borrow_mut();
        state.requested_gain = requested_gain;
        if !state.gain_ok {
            return None;
        }
        let gain = state.gain_step.unwrap_or(requested_gain);
        state.amplifier_gain = gain;
        Some(gain)
    }

    fn init(&mut self) -> bool {
        let mut state = self.0.borrow_mut();
        state.gate_initialized = true;
        state.init_ok
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.0.borrow_mut().gate_enabled = enabled;
    }

    fn is_ready(&self) -> bool {
        self.0.borrow().gate_ready
    }

    fn do_checks(&mut self) -> bool {
        self.0.borrow().gate_ready
    }
}

pub struct MockSupervisor(Rc<RefCell<SimState>>);

impl Supervisor for MockSupervisor {
    fn vbus_voltage(&self) -> f32 {
        self.0.borrow().vbus
    }

    fn brake_resistor_armed(&self) -> bool {
        self.0.borrow().brake_armed
    }

    fn do_fast_checks(&mut self) -> bool {
        self.0.borrow().fast_checks_ok
    }

    fn update_brake_current(&mut self, i_bus: f32) {
        let mut state = self.0.borrow_mut();
        state.brake_current = i_bus;
        state.brake_updates += 1;
    }
}

pub struct MockAxis {
    state: Rc<RefCell<SimState>>,
    limiters: Vec<&'static dyn CurrentLimiter>,
}

impl AxisHooks for MockAxis {
    fn reset_controller(&mut self) {
        self.state.borrow_mut().controller_resets += 1;
    }

    fn rotor_flux(&self) -> f32 {
        self.state.borrow().rotor_flux
    }

    fn reset_rotor_flux(&mut self) {
        let mut state = self.state.borrow_mut();
        state.rotor_flux = 0.0;
        state.rotor_flux_resets += 1;
    }

    fn current_limiters(&self) -> &[&dyn CurrentLimiter] {
        &self.limiters
    }

    fn requested_state(&self) -> AxisState {
        self.state.borrow().requested_state
    }
}

pub type SimMotor = Motor<MockTimer, MockGateDriver, MockSupervisor, MockAxis>;

/// モーターとシミュレートされたハードウェア
pub struct Sim {
    pub motor: SimMotor,
    state: Rc<RefCell<SimState>>,
    sensor_mask: SensorMask,
}

impl Sim {
    /// セットアップ前のモーター
    pub fn new(config: MotorConfig) -> Self {
        Self::build(config, SensorMask::ALL, Vec::new(), DEFAULT_ADC_BITS)
    }

    /// 電流リミッタ付きのモーター（セットアップ前）
    pub fn with_limiters(config: MotorConfig, limiters: Vec<&'static dyn CurrentLimiter>) -> Self {
        Self::build(config, SensorMask::ALL, limiters, DEFAULT_ADC_BITS)
    }

    /// ADC分解能を指定したモーター（セットアップ前）
    pub fn with_adc_bits(config: MotorConfig, adc_bits: u8) -> Self {
        Self::build(config, SensorMask::ALL, Vec::new(), adc_bits)
    }

    /// セットアップ済みで、DCオフセット推定のウォームアップが完了したモーター
    pub fn ready(config: MotorConfig) -> Self {
        Self::ready_with_mask(config, SensorMask::ALL)
    }

    pub fn ready_with_mask(config: MotorConfig, sensor_mask: SensorMask) -> Self {
        let sim = Self::build(config, sensor_mask, Vec::new(), DEFAULT_ADC_BITS);
        sim.motor.setup().unwrap();

        let warmup_meas = (crate::config::current_sense::DC_CALIB_WARMUP_TAUS * config.dc_calib_tau
            / TIMING.current_meas_period())
        .ceil() as u64;
        // 経過時間の積算誤差を見込んで少し長めに回す
        sim.run_events(2 * (warmup_meas + warmup_meas / 100 + 4));
        assert!(sim.motor.current_meas().is_valid());
        assert!(sim.motor.error().is_empty());
        sim
    }

    /// ウォームアップが短いテスト用設定
    pub fn test_config() -> MotorConfig {
        MotorConfig {
            dc_calib_tau: 0.01,
            ..MotorConfig::default()
        }
    }

    fn build(
        config: MotorConfig,
        sensor_mask: SensorMask,
        limiters: Vec<&'static dyn CurrentLimiter>,
        adc_bits: u8,
    ) -> Self {
        let state = Rc::new(RefCell::new(SimState::new()));
        let hardware = HardwareConfig {
            timing: TIMING,
            current_sense: CurrentSenseConfig {
                adc_bits,
                adc_vref: DEFAULT_ADC_VREF,
                min_volt: DEFAULT_MIN_VOLT,
                max_volt: DEFAULT_MAX_VOLT,
                shunt_conductance: SHUNT_CONDUCTANCE,
                sensor_mask,
            },
        };
        let motor = Motor::new(
            MockTimer(state.clone()),
            MockGateDriver(state.clone()),
            MockSupervisor(state.clone()),
            MockAxis {
                state: state.clone(),
                limiters,
            },
            config,
            hardware,
        );
        Self {
            motor,
            state,
            sensor_mask,
        }
    }

    pub fn state(&self) -> RefMut<'_, SimState> {
        self.state.borrow_mut()
    }

    /// 割り込みを呼ばずにハードウェアを1イベント進め、サンプルしたADCコードを返す
    fn advance(&self) -> PhaseTriple<Option<u16>> {
        let mut state = self.state.borrow_mut();
        state.integrate_plant(TIMING.interrupt_period());

        state.timer.counting_down = !state.timer.counting_down;
        let currents = if state.timer.counting_down {
            PhaseTriple::ZERO
        } else {
            state.plant.currents
        };
        let mut adc = state.adc_for_currents(currents, self.sensor_mask);
        if state.saturate_from_event.is_some_and(|from| state.events >= from) {
            adc.a = Some(4095);
        }

        state.timer.active = state.timer.shadow;
        state.timer.update_flag = true;
        if state.timer.aoe {
            state.timer.moe = true;
        }
        state.events += 1;
        adc
    }

    /// 1イベント進める
    pub fn step(&self) {
        let adc = self.advance();
        self.motor.tim_update_cb(adc);
    }

    pub fn run_events(&self, n: u64) {
        for _ in 0..n {
            self.step();
        }
    }

    /// 割り込みを取りこぼす
    pub fn skip_event(&self) {
        self.advance();
    }

    /// 指定したADCコードで1イベント進める
    pub fn step_with_adc(&self, adc: PhaseTriple<Option<u16>>) {
        self.advance();
        self.motor.tim_update_cb(adc);
    }

    /// 次の電流測定イベントを指定したADCコードで実行
    pub fn sense_with_adc(&self, adc: PhaseTriple<Option<u16>>) {
        if !self.state.borrow().timer.counting_down {
            self.step();
        }
        self.step_with_adc(adc);
    }

    /// 次のPWM更新イベントを指定したADCコードで実行
    pub fn commit_with_adc(&self, adc: PhaseTriple<Option<u16>>) {
        if self.state.borrow().timer.counting_down {
            self.step();
        }
        self.step_with_adc(adc);
    }

    /// 指定した相電流に対応するADCコード（オフセット込み）
    pub fn adc_for_currents(&self, currents: PhaseTriple<f32>) -> PhaseTriple<Option<u16>> {
        self.state.borrow().adc_for_currents(currents, self.sensor_mask)
    }

    /// 経過時間に応じてイベントを進める遅延
    pub fn delay(&self) -> SimDelay<'_> {
        SimDelay {
            sim: self,
            pending_ns: 0,
        }
    }
}

pub struct SimDelay<'a> {
    sim: &'a Sim,
    pending_ns: u64,
}

impl DelayNs for SimDelay<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.pending_ns += ns as u64;
        while self.pending_ns >= EVENT_NS {
            self.pending_ns -= EVENT_NS;
            self.sim.step();
        }
    }
}

/// 呼び出しを記録する制御則
#[derive(Debug, Default)]
pub struct LawLog {
    pub resets: u32,
    pub measurements: u32,
    pub outputs: u32,
    pub last_currents: PhaseTriple<f32>,
    pub last_input_timestamp: u32,
    pub last_output_timestamp: u32,
    pub last_vbus: f32,
}

pub struct MockLaw {
    output: Result<PhaseTriple<f32>, MotorError>,
    measurement: Result<(), MotorError>,
    log: Rc<RefCell<LawLog>>,
}

impl MockLaw {
    pub fn new(output: Result<PhaseTriple<f32>, MotorError>) -> (Self, Rc<RefCell<LawLog>>) {
        let log = Rc::new(RefCell::new(LawLog::default()));
        let law = Self {
            output,
            measurement: Ok(()),
            log: log.clone(),
        };
        (law, log)
    }

    pub fn log(&self) -> Rc<RefCell<LawLog>> {
        self.log.clone()
    }

    pub fn set_measurement_result(&mut self, result: Result<(), MotorError>) {
        self.measurement = result;
    }
}

impl ControlLaw for MockLaw {
    fn reset(&mut self) {
        self.log.borrow_mut().resets += 1;
    }

    fn on_measurement(
        &mut self,
        vbus_voltage: f32,
        currents: PhaseTriple<f32>,
        input_timestamp: u32,
    ) -> Result<(), MotorError> {
        let mut log = self.log.borrow_mut();
        log.measurements += 1;
        log.last_vbus = vbus_voltage;
        log.last_currents = currents;
        log.last_input_timestamp = input_timestamp;
        self.measurement
    }

    fn get_output(&mut self, output_timestamp: u32) -> Result<PhaseTriple<f32>, MotorError> {
        let mut log = self.log.borrow_mut();
        log.outputs += 1;
        log.last_output_timestamp = output_timestamp;
        self.output
    }
}
