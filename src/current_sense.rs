//! 電流センスモジュール
//!
//! ADC生値の飽和判定、電流への変換、欠損相の推定、DCオフセット推定フィルタを提供します。

use crate::config::current_sense::{DC_CALIB_WARMUP_TAUS, MAX_ADC_BITS, MIN_ADC_BITS};
use crate::phase::PhaseTriple;

/// 飽和判定に使うADCコードの有効範囲（両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcBounds {
    pub lower: u16,
    pub upper: u16,
}

impl AdcBounds {
    /// アンプ出力の有効電圧範囲からADCコードの範囲を求める
    ///
    /// # 引数
    /// * `adc_bits` - ADC分解能 [bit]
    /// * `adc_vref` - ADC基準電圧 [V]
    /// * `min_volt` - 有効範囲下限 [V]
    /// * `max_volt` - 有効範囲上限 [V]
    pub fn from_voltage_range(adc_bits: u8, adc_vref: f32, min_volt: f32, max_volt: f32) -> Self {
        let full_scale = (1u32 << clamp_adc_bits(adc_bits)) as f32;
        Self {
            lower: (full_scale * min_volt / adc_vref) as u16,
            upper: (full_scale * max_volt / adc_vref) as u16,
        }
    }

    pub fn contains(&self, code: u16) -> bool {
        code >= self.lower && code <= self.upper
    }

    /// 範囲外のコードを無効（`None`）に置き換える
    ///
    /// # 戻り値
    /// (置き換え後のコード, 飽和した相があったか)
    pub fn sanitize(&self, codes: PhaseTriple<Option<u16>>) -> (PhaseTriple<Option<u16>>, bool) {
        let mut saturated = false;
        let sanitized = codes.map(|code| match code {
            Some(code) if !self.contains(code) => {
                saturated = true;
                None
            }
            other => other,
        });
        (sanitized, saturated)
    }
}

/// 対応範囲外の分解能をシフト可能な範囲に収める
const fn clamp_adc_bits(adc_bits: u8) -> u8 {
    if adc_bits < MIN_ADC_BITS {
        MIN_ADC_BITS
    } else if adc_bits > MAX_ADC_BITS {
        MAX_ADC_BITS
    } else {
        adc_bits
    }
}

/// Which phases carry a physical current sensor (bit0 = A, bit1 = B, bit2 = C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorMask(pub u8);

impl SensorMask {
    pub const ALL: Self = Self(0b111);
    pub const NO_A: Self = Self(0b110);
    pub const NO_B: Self = Self(0b101);
    pub const NO_C: Self = Self(0b011);

    /// センサーのない相の電流を残り2相から推定する（a + b + c = 0）
    ///
    /// 3相すべてにセンサーがある場合は何もしません。
    pub fn infer(self, currents: PhaseTriple<f32>) -> PhaseTriple<f32> {
        let PhaseTriple { a, b, c } = currents;
        match self {
            Self::NO_A => PhaseTriple::new(-(b + c), b, c),
            Self::NO_B => PhaseTriple::new(a, -(c + a), c),
            Self::NO_C => PhaseTriple::new(a, b, -(a + b)),
            _ => currents,
        }
    }
}

/// ADCコードから相電流への変換
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentScaling {
    adc_bits: u8,
    adc_vref: f32,
    shunt_conductance: f32,
    /// アンプゲインの逆数
    rev_gain: f32,
}

impl CurrentScaling {
    /// ゲイン未設定（全電流0）の変換を作成
    ///
    /// `adc_bits` は `MIN_ADC_BITS..=MAX_ADC_BITS` に制限されます。
    pub const fn new(adc_bits: u8, adc_vref: f32, shunt_conductance: f32) -> Self {
        Self {
            adc_bits: clamp_adc_bits(adc_bits),
            adc_vref,
            shunt_conductance,
            rev_gain: 0.0,
        }
    }

    pub fn set_amplifier_gain(&mut self, gain: f32) {
        self.rev_gain = 1.0 / gain;
    }

    pub fn rev_gain(&self) -> f32 {
        self.rev_gain
    }

    /// ADCコードを相電流 [A] に変換（コード中央が0A）
    pub fn phase_current_from_adcval(&self, code: u16) -> f32 {
        let midpoint = 1i32 << (self.adc_bits - 1);
        let balanced = code as i32 - midpoint;
        let amp_out_volt = (self.adc_vref / (1u32 << self.adc_bits) as f32) * balanced as f32;
        let shunt_volt = amp_out_volt * self.rev_gain;
        shunt_volt * self.shunt_conductance
    }

    /// 3相分を変換。無効なコードはNaN
    pub fn convert(&self, codes: PhaseTriple<Option<u16>>) -> PhaseTriple<f32> {
        codes.map(|code| code.map_or(f32::NAN, |code| self.phase_current_from_adcval(code)))
    }
}

/// Exponentially filtered DC offset of each phase current.
///
/// ゼロ電流区間のサンプルで更新され、ウォームアップが完了し
/// オフセットが十分小さい場合のみ補正に使われます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcCalibration {
    offsets: PhaseTriple<f32>,
    /// 連続して更新されている時間 [s]
    running_since: f32,
}

impl DcCalibration {
    pub const fn new() -> Self {
        Self {
            offsets: PhaseTriple::ZERO,
            running_since: 0.0,
        }
    }

    pub fn offsets(&self) -> PhaseTriple<f32> {
        self.offsets
    }

    pub fn running_since(&self) -> f32 {
        self.running_since
    }

    /// ゼロ電流サンプルでフィルタを更新
    ///
    /// いずれかの相が無効ならフィルタとウォームアップ時間をリセットします。
    ///
    /// # 引数
    /// * `currents` - ゼロ電流区間で測定した相電流 [A]
    /// * `period` - 更新周期 [s]
    /// * `tau` - フィルタ時定数 [s]
    pub fn update(&mut self, currents: PhaseTriple<f32>, period: f32, tau: f32) {
        if currents.is_valid() {
            let k = (period / tau).min(1.0);
            self.offsets = self.offsets.zip_with(currents, |offset, i| offset + (i - offset) * k);
            self.running_since += period;
        } else {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.offsets = PhaseTriple::ZERO;
        self.running_since = 0.0;
    }

    /// 補正に使える状態か
    ///
    /// # 引数
    /// * `tau` - フィルタ時定数 [s]
    /// * `max_offset` - 許容するオフセットの絶対値 [A]
    pub fn is_valid(&self, tau: f32, max_offset: f32) -> bool {
        self.running_since >= tau * DC_CALIB_WARMUP_TAUS
            && libm::fabsf(self.offsets.a) < max_offset
            && libm::fabsf(self.offsets.b) < max_offset
            && libm::fabsf(self.offsets.c) < max_offset
    }

    /// オフセットを差し引き、残ったリーク電流を3相に均等配分して除去
    ///
    /// # 戻り値
    /// (補正後の相電流, リーク電流)
    pub fn correct(&self, currents: PhaseTriple<f32>) -> (PhaseTriple<f32>, f32) {
        let corrected = currents.zip_with(self.offsets, |i, offset| i - offset);
        let leak = corrected.sum();
        (corrected.map(|i| i - leak / 3.0), leak)
    }
}

impl Default for DcCalibration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 0.0001;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn test_adc_bounds_12bit() {
        let bounds = AdcBounds::from_voltage_range(12, 3.3, 0.3, 3.0);
        assert_eq!(bounds.lower, 372);
        assert_eq!(bounds.upper, 3723);
        assert!(bounds.contains(372));
        assert!(bounds.contains(3723));
        assert!(!bounds.contains(371));
        assert!(!bounds.contains(3724));
    }

    #[test]
    fn test_out_of_range_resolution_is_clamped() {
        let narrow = AdcBounds::from_voltage_range(0, 3.3, 0.3, 3.0);
        assert_eq!(narrow, AdcBounds::from_voltage_range(MIN_ADC_BITS, 3.3, 0.3, 3.0));

        let wide = AdcBounds::from_voltage_range(40, 3.3, 0.3, 3.0);
        assert_eq!(wide, AdcBounds::from_voltage_range(MAX_ADC_BITS, 3.3, 0.3, 3.0));
        assert!(wide.lower <= wide.upper);

        let mut scaling = CurrentScaling::new(0, 3.3, 1000.0);
        scaling.set_amplifier_gain(20.0);
        assert!(scaling.phase_current_from_adcval(1).is_finite());

        let mut scaling = CurrentScaling::new(40, 3.3, 1000.0);
        scaling.set_amplifier_gain(20.0);
        assert!(approx_eq(scaling.phase_current_from_adcval(1 << 15), 0.0));
    }

    #[test]
    fn test_sanitize_marks_saturated_codes_invalid() {
        let bounds = AdcBounds::from_voltage_range(12, 3.3, 0.3, 3.0);
        let (codes, saturated) = bounds.sanitize(PhaseTriple::new(Some(2048), Some(10), None));
        assert!(saturated);
        assert_eq!(codes, PhaseTriple::new(Some(2048), None, None));

        let (codes, saturated) = bounds.sanitize(PhaseTriple::new(Some(2048), None, Some(3000)));
        assert!(!saturated);
        assert_eq!(codes, PhaseTriple::new(Some(2048), None, Some(3000)));
    }

    #[test]
    fn test_infer_missing_phase() {
        let inferred = SensorMask::NO_A.infer(PhaseTriple::new(f32::NAN, 2.0, -1.5));
        assert_eq!(inferred, PhaseTriple::new(-0.5, 2.0, -1.5));
        assert_eq!(inferred.sum(), 0.0);

        let inferred = SensorMask::NO_B.infer(PhaseTriple::new(1.25, f32::NAN, 0.5));
        assert_eq!(inferred.sum(), 0.0);

        let inferred = SensorMask::NO_C.infer(PhaseTriple::new(-3.0, 1.0, f32::NAN));
        assert_eq!(inferred.c, 2.0);
    }

    #[test]
    fn test_all_sensors_keep_raw_sum() {
        let currents = PhaseTriple::new(1.0, 0.5, 0.25);
        assert_eq!(SensorMask::ALL.infer(currents), currents);
    }

    #[test]
    fn test_phase_current_from_adcval() {
        let mut scaling = CurrentScaling::new(12, 3.3, 2000.0);
        scaling.set_amplifier_gain(40.0);
        assert_eq!(scaling.phase_current_from_adcval(2048), 0.0);

        // 1 LSB = 3.3/4096 V → /40 → ×2000 S
        let lsb = 3.3 / 4096.0 / 40.0 * 2000.0;
        assert!(approx_eq(scaling.phase_current_from_adcval(2148), 100.0 * lsb));
        assert!(approx_eq(scaling.phase_current_from_adcval(1948), -100.0 * lsb));
    }

    #[test]
    fn test_convert_invalid_code_is_nan() {
        let mut scaling = CurrentScaling::new(12, 3.3, 2000.0);
        scaling.set_amplifier_gain(40.0);
        let currents = scaling.convert(PhaseTriple::new(Some(2048), None, Some(2048)));
        assert_eq!(currents.a, 0.0);
        assert!(currents.b.is_nan());
        assert!(!currents.is_valid());
    }

    #[test]
    fn test_dc_calibration_warm_up() {
        // k = 0.125、ウォームアップは 7.5 / 0.125 = 60 回
        let tau = 1.0;
        let period = 0.125;
        let mut calib = DcCalibration::new();
        let sample = PhaseTriple::new(0.05, -0.02, 0.01);

        for _ in 0..59 {
            calib.update(sample, period, tau);
        }
        assert!(!calib.is_valid(tau, 1.0));

        for _ in 0..2 {
            calib.update(sample, period, tau);
        }
        assert!(calib.is_valid(tau, 1.0));
        assert!((calib.offsets().a - 0.05).abs() < 0.001);
        assert!((calib.offsets().b + 0.02).abs() < 0.001);
    }

    #[test]
    fn test_dc_calibration_rejects_large_offset() {
        let mut calib = DcCalibration::new();
        for _ in 0..100 {
            calib.update(PhaseTriple::new(2.0, 0.0, 0.0), 1.0, 1.0);
        }
        assert!(!calib.is_valid(1.0, 1.5));
        assert!(calib.is_valid(1.0, 2.5));
    }

    #[test]
    fn test_dc_calibration_resets_on_invalid_sample() {
        let mut calib = DcCalibration::new();
        calib.update(PhaseTriple::new(0.1, 0.1, 0.1), 0.5, 1.0);
        assert!(calib.running_since() > 0.0);

        calib.update(PhaseTriple::new(0.1, f32::NAN, 0.1), 0.5, 1.0);
        assert_eq!(calib.running_since(), 0.0);
        assert_eq!(calib.offsets(), PhaseTriple::ZERO);
    }

    #[test]
    fn test_filter_coefficient_saturates_at_one() {
        let mut calib = DcCalibration::new();
        calib.update(PhaseTriple::new(0.3, -0.1, 0.2), 2.0, 1.0);
        assert_eq!(calib.offsets(), PhaseTriple::new(0.3, -0.1, 0.2));
    }

    #[test]
    fn test_correct_removes_leakage() {
        let mut calib = DcCalibration::new();
        calib.update(PhaseTriple::new(0.1, 0.1, 0.1), 1.0, 1.0);
        let (meas, leak) = calib.correct(PhaseTriple::new(1.1, -0.4, -0.4));
        assert!(approx_eq(leak, 0.0));
        assert!(approx_eq(meas.a, 1.0));

        let (meas, leak) = calib.correct(PhaseTriple::new(1.4, -0.2, -0.6));
        assert!(approx_eq(leak, 0.3));
        assert!(approx_eq(meas.sum(), 0.0));
    }
}
