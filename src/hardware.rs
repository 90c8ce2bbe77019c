//! ハードウェア抽象化モジュール
//!
//! 電流制御コアが必要とする周辺機能（PWMタイマー、ゲートドライバ）と、
//! システム側・軸側から受け取る情報のインターフェースを定義します。

#[cfg(all(feature = "stm32", target_arch = "arm"))]
pub mod stm32;

/// Center-aligned three-phase PWM timer.
///
/// コンペアレジスタはプリロード付きで、書き込んだ値は次の更新イベントで有効になります。
/// AOE（自動出力許可）がセットされていると、次の更新イベントでMOEがセットされます。
pub trait PwmTimer {
    /// 現在ダウンカウント中か
    fn is_counting_down(&self) -> bool;

    /// 3相のコンペア値を書き込む（次の更新イベントで反映）
    fn set_compare(&mut self, timings: [u16; 3]);

    /// AOEビットの設定
    fn set_auto_output_enable(&mut self, enable: bool);

    /// MOEビットをクリアし出力を即座に停止
    fn disable_output(&mut self);

    /// MOEビットがセットされているか
    fn is_output_enabled(&self) -> bool;

    /// 更新イベントが保留中か（UIFフラグ）
    fn update_pending(&self) -> bool;

    /// UIFフラグをクリア
    fn clear_update_flag(&mut self);
}

/// Gate driver with an integrated current-sense amplifier.
pub trait GateDriver {
    /// アンプゲインを要求し、実際に設定されたゲインを返す
    ///
    /// # 引数
    /// * `requested_gain` - 要求ゲイン [V/V]
    ///
    /// # 戻り値
    /// 設定されたゲイン。設定できなかった場合は `None`
    fn config(&mut self, requested_gain: f32) -> Option<f32>;

    /// ドライバを初期化する
    fn init(&mut self) -> bool;

    /// ゲート出力の有効/無効
    fn set_enabled(&mut self, enabled: bool);

    /// 通電可能な状態か
    fn is_ready(&self) -> bool;

    /// 故障を検出していないか
    fn do_checks(&mut self) -> bool;
}

/// System-level services shared by all axes.
pub trait Supervisor {
    /// バス電圧 [V]
    fn vbus_voltage(&self) -> f32;

    /// ブレーキ抵抗が使用可能か（インターロック）
    fn brake_resistor_armed(&self) -> bool;

    /// システムレベルの高速チェック。異常時は `false`
    fn do_fast_checks(&mut self) -> bool;

    /// バス電流の更新をブレーキ抵抗制御へ通知
    fn update_brake_current(&mut self, i_bus: f32);
}

/// An additional current limit imposed by the axis (e.g. thermistors).
pub trait CurrentLimiter {
    /// 基準となる電流制限から、このリミッタが許容する電流を返す
    fn get_current_limit(&self, base_current_lim: f32) -> f32;
}

/// 軸の要求状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AxisState {
    Undefined,
    Idle,
    MotorCalibration,
    ClosedLoopControl,
}

/// Services of the axis that owns the motor.
pub trait AxisHooks {
    /// 軸のコントローラをリセット
    fn reset_controller(&mut self);

    /// 回転子磁束 [A]（誘導モーター用）
    fn rotor_flux(&self) -> f32;

    /// 回転子磁束推定をリセット
    fn reset_rotor_flux(&mut self);

    /// 追加の電流リミッタ
    fn current_limiters(&self) -> &[&dyn CurrentLimiter];

    /// 現在要求されている軸の状態
    fn requested_state(&self) -> AxisState;
}
