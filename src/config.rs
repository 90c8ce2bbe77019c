//! Configuration module
//!
//! モーター設定（キャリブレーション間で不変）と、構築時に渡すハードウェア設定を提供します。

pub mod params;

pub use params::*;

use crate::current_sense::{AdcBounds, SensorMask};

/// モーター種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorType {
    /// 電流制御される通常のモーター
    HighCurrent,
    /// 電圧制御されるジンバルモーター（抵抗・インダクタンス測定なし）
    Gimbal,
    /// 誘導モーター
    Acim,
}

/// Motor configuration, immutable between calibration runs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorConfig {
    pub motor_type: MotorType,
    /// 設定電流制限 [A]
    pub current_lim: f32,
    /// トルク上限 [Nm]
    pub torque_lim: f32,
    /// トルク定数 [Nm/A]
    pub torque_constant: f32,
    /// 電流制御帯域 [rad/s]
    pub current_control_bandwidth: f32,
    /// 相抵抗 [Ω]
    pub phase_resistance: f32,
    /// 相インダクタンス [H]
    pub phase_inductance: f32,
    /// 抵抗測定時の試験電流 [A]
    pub calibration_current: f32,
    /// 抵抗測定時の最大電圧 [V]（インダクタンス測定の試験電圧も兼ねる）
    pub resistance_calib_max_voltage: f32,
    /// DCオフセットフィルタの時定数 [s]
    pub dc_calib_tau: f32,
    /// 許容リーク電流 [A]
    pub i_leak_max: f32,
    /// バス電流下限 [A]
    pub i_bus_hard_min: f32,
    /// バス電流上限 [A]
    pub i_bus_hard_max: f32,
    /// 電流制限に上乗せするトリップマージン [A]
    pub current_lim_margin: f32,
    /// 要求電流測定レンジ [A]
    pub requested_current_range: f32,
    /// 起動時にキャリブレーション済みとして扱う
    pub pre_calibrated: bool,
}

impl MotorConfig {
    pub const fn new() -> Self {
        Self {
            motor_type: MotorType::HighCurrent,
            current_lim: DEFAULT_CURRENT_LIM,
            torque_lim: DEFAULT_TORQUE_LIM,
            torque_constant: DEFAULT_TORQUE_CONSTANT,
            current_control_bandwidth: DEFAULT_CURRENT_CONTROL_BANDWIDTH,
            phase_resistance: 0.0,
            phase_inductance: 0.0,
            calibration_current: DEFAULT_CALIBRATION_CURRENT,
            resistance_calib_max_voltage: DEFAULT_RESISTANCE_CALIB_MAX_VOLTAGE,
            dc_calib_tau: DEFAULT_DC_CALIB_TAU,
            i_leak_max: DEFAULT_I_LEAK_MAX,
            i_bus_hard_min: f32::NEG_INFINITY,
            i_bus_hard_max: f32::INFINITY,
            current_lim_margin: DEFAULT_CURRENT_LIM_MARGIN,
            requested_current_range: DEFAULT_REQUESTED_CURRENT_RANGE,
            pre_calibrated: false,
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// PWMタイマーのタイミング
///
/// 中央揃えモードのタイマーは1 PWM周期あたり2回の更新イベントを発生させます。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmTiming {
    /// タイマークロック [Hz]
    pub clock_hz: u32,
    /// 自動リロード値（PWM周期の半分のカウント数）
    pub period_clocks: u16,
    /// リピティションカウンタ
    pub repetition_counter: u8,
}

impl PwmTiming {
    /// タイマーティック数 / 更新イベント
    pub const fn ticks_per_update(&self) -> u32 {
        self.period_clocks as u32 * (self.repetition_counter as u32 + 1)
    }

    /// 割り込み周期 [s]
    pub fn interrupt_period(&self) -> f32 {
        self.ticks_per_update() as f32 / self.clock_hz as f32
    }

    /// 電流測定周期 [s]（割り込み2回に1回）
    pub fn current_meas_period(&self) -> f32 {
        2.0 * self.interrupt_period()
    }

    /// 50%デューティのコンペア値
    pub const fn half_timings(&self) -> [u16; 3] {
        let half = self.period_clocks / 2;
        [half, half, half]
    }
}

/// 電流センス（シャント＋アンプ＋ADC）の構成
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentSenseConfig {
    /// ADC分解能 [bit]（`MIN_ADC_BITS..=MAX_ADC_BITS`）
    pub adc_bits: u8,
    /// ADC基準電圧 [V]
    pub adc_vref: f32,
    /// アンプ出力の有効範囲下限 [V]
    pub min_volt: f32,
    /// アンプ出力の有効範囲上限 [V]
    pub max_volt: f32,
    /// シャントのコンダクタンス [S]
    pub shunt_conductance: f32,
    /// 実装されている電流センサー
    pub sensor_mask: SensorMask,
}

impl CurrentSenseConfig {
    /// 対応するADC分解能か
    pub fn has_valid_resolution(&self) -> bool {
        (params::current_sense::MIN_ADC_BITS..=params::current_sense::MAX_ADC_BITS).contains(&self.adc_bits)
    }

    /// 飽和判定に使うADCコードの範囲
    pub fn adc_bounds(&self) -> AdcBounds {
        AdcBounds::from_voltage_range(self.adc_bits, self.adc_vref, self.min_volt, self.max_volt)
    }
}

/// Construction-time hardware parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HardwareConfig {
    pub timing: PwmTiming,
    pub current_sense: CurrentSenseConfig,
}
