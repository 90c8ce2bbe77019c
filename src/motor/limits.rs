//! 電流制限とトルク上限
//!
//! 毎サイクルの電流トリップ判定に使う実効電流制限と、上位制御が使う
//! 最大トルクを求めます。

use crate::config::limits::GIMBAL_VOLTAGE_HEADROOM;
use crate::config::{MotorConfig, MotorType};
use crate::hardware::{AxisHooks, CurrentLimiter, GateDriver, PwmTimer, Supervisor};

use super::{Motor, MotorInner};

const ONE_DIV_SQRT3: f32 = 0.577350269; // 1 / sqrt(3)

/// 実効電流制限 [A]
///
/// 設定値、ハードウェア（モーター種別）による制限、各リミッタの制限のうち最小のもの。
///
/// # 引数
/// * `config` - モーター設定
/// * `vbus_voltage` - バス電圧 [V]（ジンバルモーターの電圧制限に使用）
/// * `max_allowed_current` - 電流センスの測定レンジ [A]
/// * `limiters` - 追加の電流リミッタ
pub fn effective_current_limit(
    config: &MotorConfig,
    vbus_voltage: f32,
    max_allowed_current: f32,
    limiters: &[&dyn CurrentLimiter],
) -> f32 {
    let hardware_limit = match config.motor_type {
        // ジンバルモーターは電圧制御（電流 = 電圧として扱う）
        MotorType::Gimbal => GIMBAL_VOLTAGE_HEADROOM * ONE_DIV_SQRT3 * vbus_voltage,
        MotorType::HighCurrent | MotorType::Acim => max_allowed_current,
    };

    limiters.iter().fold(config.current_lim.min(hardware_limit), |lim, limiter| {
        lim.min(limiter.get_current_limit(config.current_lim))
    })
}

/// 最大トルク [Nm]
///
/// 誘導モーターでは回転子磁束に比例し、0になり得ます。
///
/// # 引数
/// * `config` - モーター設定
/// * `effective_current_lim` - 実効電流制限 [A]
/// * `rotor_flux` - 回転子磁束の推定値 [A]（誘導モーターのみ使用）
pub fn max_available_torque(config: &MotorConfig, effective_current_lim: f32, rotor_flux: f32) -> f32 {
    let max_torque = match config.motor_type {
        MotorType::Acim => effective_current_lim * config.torque_constant * rotor_flux,
        MotorType::HighCurrent | MotorType::Gimbal => effective_current_lim * config.torque_constant,
    };
    max_torque.max(0.0).min(config.torque_lim)
}

impl<T, G, S, A> MotorInner<T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    pub(super) fn update_effective_current_lim(&mut self) -> f32 {
        self.effective_current_lim = effective_current_limit(
            &self.config,
            self.supervisor.vbus_voltage(),
            self.max_allowed_current,
            self.axis.current_limiters(),
        );
        self.effective_current_lim
    }
}

impl<T, G, S, A> Motor<T, G, S, A>
where
    T: PwmTimer,
    G: GateDriver,
    S: Supervisor,
    A: AxisHooks,
{
    /// 実効電流制限を再計算して返す [A]
    ///
    /// 結果は次の電流トリップ判定まで保持されます。
    pub fn effective_current_lim(&self) -> f32 {
        self.with(|inner| inner.update_effective_current_lim())
    }

    /// 最後に計算された実効電流制限 [A]
    pub fn cached_effective_current_lim(&self) -> f32 {
        self.with(|inner| inner.effective_current_lim)
    }

    /// 最大トルク [Nm]（最後に計算された実効電流制限に基づく）
    pub fn max_available_torque(&self) -> f32 {
        self.with(|inner| {
            max_available_torque(&inner.config, inner.effective_current_lim, inner.axis.rotor_flux())
        })
    }
}
