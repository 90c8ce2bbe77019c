//! モーター制御とハードウェアの設定パラメータ

/// 設定電流制限 [A]（デフォルト値）
pub const DEFAULT_CURRENT_LIM: f32 = 10.0;

/// トルク上限 [Nm]（デフォルト値、制限なし）
pub const DEFAULT_TORQUE_LIM: f32 = f32::INFINITY;

/// トルク定数 [Nm/A]（デフォルト値）
pub const DEFAULT_TORQUE_CONSTANT: f32 = 0.04;

/// 電流制御帯域 [rad/s]（デフォルト値）
pub const DEFAULT_CURRENT_CONTROL_BANDWIDTH: f32 = 1000.0;

/// キャリブレーション電流 [A]（デフォルト値）
pub const DEFAULT_CALIBRATION_CURRENT: f32 = 10.0;

/// 抵抗測定時の最大印加電圧 [V]（デフォルト値）
pub const DEFAULT_RESISTANCE_CALIB_MAX_VOLTAGE: f32 = 2.0;

/// DCオフセットフィルタの時定数 [s]（デフォルト値）
pub const DEFAULT_DC_CALIB_TAU: f32 = 0.2;

/// 許容リーク電流 [A]（デフォルト値）
pub const DEFAULT_I_LEAK_MAX: f32 = 0.1;

/// 電流制限のトリップマージン [A]（デフォルト値）
pub const DEFAULT_CURRENT_LIM_MARGIN: f32 = 8.0;

/// 要求電流測定レンジ [A]（デフォルト値）
pub const DEFAULT_REQUESTED_CURRENT_RANGE: f32 = 60.0;

/// 電流センスアンプ設定
pub mod current_sense {
    /// アンプ出力振幅の使用率
    pub const AMPLIFIER_MARGIN: f32 = 0.90;

    /// アンプの最大出力振幅 [V]
    pub const MAX_OUTPUT_SWING: f32 = 1.35;

    /// DCオフセットが有効とみなされる上限（使用可能電流レンジに対する比率）
    pub const MAX_DC_CALIB_FRACTION: f32 = 0.1;

    /// DCオフセット推定が有効になるまでの時定数の倍数
    pub const DC_CALIB_WARMUP_TAUS: f32 = 7.5;

    /// 対応するADC分解能の範囲 [bit]
    pub const MIN_ADC_BITS: u8 = 1;
    pub const MAX_ADC_BITS: u8 = 16;

    /// ADC分解能 [bit]（デフォルト値）
    pub const DEFAULT_ADC_BITS: u8 = 12;

    /// ADC基準電圧 [V]（デフォルト値）
    pub const DEFAULT_ADC_VREF: f32 = 3.3;

    /// アンプ出力の有効範囲下限 [V]（デフォルト値）
    pub const DEFAULT_MIN_VOLT: f32 = 0.3;

    /// アンプ出力の有効範囲上限 [V]（デフォルト値）
    pub const DEFAULT_MAX_VOLT: f32 = 3.0;
}

/// キャリブレーション設定
pub mod calibration {
    use embassy_time::Duration;

    /// 抵抗測定の積分ゲイン [(V/s)/A]
    pub const RESISTANCE_KI: f32 = 10.0;

    /// 測定完了待ちのポーリング周期
    pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// 抵抗測定の最大ポーリング回数（約3秒）
    pub const RESISTANCE_MAX_POLLS: u32 = 3000;

    /// インダクタンス測定の最大ポーリング回数（約1.25秒）
    pub const INDUCTANCE_MAX_POLLS: u32 = 1250;

    /// 妥当とみなすインダクタンスの下限 [H]
    pub const MIN_PHASE_INDUCTANCE: f32 = 2e-6;

    /// 妥当とみなすインダクタンスの上限 [H]
    pub const MAX_PHASE_INDUCTANCE: f32 = 4000e-6;
}

/// 電流制限設定
pub mod limits {
    /// ジンバルモーター（電圧制御）のバス電圧使用率
    pub const GIMBAL_VOLTAGE_HEADROOM: f32 = 0.98;
}
