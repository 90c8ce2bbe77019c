//! モーターエラーフラグ
//!
//! エラーはビットマスクとして蓄積され（スティッキー）、明示的にクリアされるまで保持されます。

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Sticky, OR-accumulated set of motor faults.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct MotorError(u32);

impl MotorError {
    pub const PHASE_RESISTANCE_OUT_OF_RANGE: Self = Self(1 << 0);
    pub const PHASE_INDUCTANCE_OUT_OF_RANGE: Self = Self(1 << 1);
    pub const DRV_FAULT: Self = Self(1 << 3);
    pub const CONTROL_DEADLINE_MISSED: Self = Self(1 << 4);
    pub const MODULATION_MAGNITUDE: Self = Self(1 << 7);
    pub const CURRENT_SENSE_SATURATION: Self = Self(1 << 10);
    pub const CURRENT_LIMIT_VIOLATION: Self = Self(1 << 12);
    pub const MODULATION_IS_NAN: Self = Self(1 << 16);
    pub const TIMER_UPDATE_MISSED: Self = Self(1 << 20);
    pub const CONTROLLER_INITIALIZING: Self = Self(1 << 21);
    pub const CONTROLLER_FAILED: Self = Self(1 << 23);
    pub const I_BUS_OUT_OF_RANGE: Self = Self(1 << 24);
    pub const BRAKE_RESISTOR_DISARMED: Self = Self(1 << 25);
    pub const SYSTEM_LEVEL: Self = Self(1 << 26);
    pub const I_LEAK_OUT_OF_RANGE: Self = Self(1 << 27);
    pub const UNKNOWN_VBUS_VOLTAGE: Self = Self(1 << 31);

    const NAMES: [(Self, &'static str); 16] = [
        (Self::PHASE_RESISTANCE_OUT_OF_RANGE, "PHASE_RESISTANCE_OUT_OF_RANGE"),
        (Self::PHASE_INDUCTANCE_OUT_OF_RANGE, "PHASE_INDUCTANCE_OUT_OF_RANGE"),
        (Self::DRV_FAULT, "DRV_FAULT"),
        (Self::CONTROL_DEADLINE_MISSED, "CONTROL_DEADLINE_MISSED"),
        (Self::MODULATION_MAGNITUDE, "MODULATION_MAGNITUDE"),
        (Self::CURRENT_SENSE_SATURATION, "CURRENT_SENSE_SATURATION"),
        (Self::CURRENT_LIMIT_VIOLATION, "CURRENT_LIMIT_VIOLATION"),
        (Self::MODULATION_IS_NAN, "MODULATION_IS_NAN"),
        (Self::TIMER_UPDATE_MISSED, "TIMER_UPDATE_MISSED"),
        (Self::CONTROLLER_INITIALIZING, "CONTROLLER_INITIALIZING"),
        (Self::CONTROLLER_FAILED, "CONTROLLER_FAILED"),
        (Self::I_BUS_OUT_OF_RANGE, "I_BUS_OUT_OF_RANGE"),
        (Self::BRAKE_RESISTOR_DISARMED, "BRAKE_RESISTOR_DISARMED"),
        (Self::SYSTEM_LEVEL, "SYSTEM_LEVEL"),
        (Self::I_LEAK_OUT_OF_RANGE, "I_LEAK_OUT_OF_RANGE"),
        (Self::UNKNOWN_VBUS_VOLTAGE, "UNKNOWN_VBUS_VOLTAGE"),
    ];

    const ALL_BITS: u32 = {
        let mut bits = 0;
        let mut i = 0;
        while i < Self::NAMES.len() {
            bits |= Self::NAMES[i].0 .0;
            i += 1;
        }
        bits
    };

    /// エラーなし
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// 未定義のビットを落としてビットマスクから復元
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `other` の全ビットが立っているか
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `other` のいずれかのビットが立っているか
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for MotorError {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MotorError {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MotorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("MotorError(NONE)");
        }
        f.write_str("MotorError(")?;
        let mut first = true;
        for (flag, name) in Self::NAMES.iter() {
            if self.contains(*flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str(")")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MotorError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "MotorError({=u32:#x})", self.0);
    }
}

/// Failure of [`Motor::setup`](crate::motor::Motor::setup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetupError {
    /// ゲートドライバが電流センスアンプのゲインを設定できなかった
    GainConfig,
    /// ゲートドライバの初期化に失敗
    GateDriverInit,
    /// ADC分解能が対応範囲外
    AdcResolution,
}
