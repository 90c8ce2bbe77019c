//! ゲートドライバ
//!
//! イネーブル端子と故障出力（nFAULT）を持ち、電流センスアンプのゲインを
//! 離散的な段階から選ぶゲートドライバの実装です。

use embedded_hal::digital::{InputPin, OutputPin};

use crate::hardware::GateDriver;

/// DRV830x系の電流センスアンプゲイン [V/V]
pub const DRV830X_GAINS: [f32; 4] = [10.0, 20.0, 40.0, 80.0];

/// Gate driver with an enable pin, an active-low fault pin and a
/// programmable-gain current-sense amplifier.
pub struct PgaGateDriver<EN, NFAULT> {
    enable: EN,
    n_fault: NFAULT,
    /// 選択可能なゲイン（昇順）
    gains: &'static [f32],
    gain: Option<f32>,
    initialized: bool,
    faulted: bool,
}

impl<EN, NFAULT> PgaGateDriver<EN, NFAULT>
where
    EN: OutputPin,
    NFAULT: InputPin,
{
    /// # 引数
    /// * `enable` - イネーブル端子（High で動作）
    /// * `n_fault` - 故障出力（Low で故障）
    /// * `gains` - 選択可能なアンプゲイン（昇順）
    pub fn new(enable: EN, n_fault: NFAULT, gains: &'static [f32]) -> Self {
        Self {
            enable,
            n_fault,
            gains,
            gain: None,
            initialized: false,
            faulted: false,
        }
    }

    /// 設定済みのアンプゲイン
    pub fn gain(&self) -> Option<f32> {
        self.gain
    }

    /// 要求以下で最大のゲイン。なければ最小のゲイン
    fn snap_gain(&self, requested_gain: f32) -> Option<f32> {
        self.gains
            .iter()
            .copied()
            .filter(|&gain| gain <= requested_gain)
            .last()
            .or_else(|| self.gains.first().copied())
    }

    fn fault_asserted(&mut self) -> bool {
        // 読めない場合も故障扱い
        self.n_fault.is_low().unwrap_or(true)
    }
}

impl<EN, NFAULT> GateDriver for PgaGateDriver<EN, NFAULT>
where
    EN: OutputPin,
    NFAULT: InputPin,
{
    fn config(&mut self, requested_gain: f32) -> Option<f32> {
        let gain = self.snap_gain(requested_gain)?;
        self.gain = Some(gain);
        self.initialized = false;
        Some(gain)
    }

    fn init(&mut self) -> bool {
        if self.gain.is_none() {
            warn!("Gate driver init before gain config");
            return false;
        }

        // 初期化はディスエーブル状態で行う
        if self.enable.set_low().is_err() {
            return false;
        }
        self.faulted = self.fault_asserted();
        self.initialized = !self.faulted;

        if self.initialized {
            info!("Gate driver initialized");
        } else {
            warn!("Gate driver reports a fault");
        }
        self.initialized
    }

    fn set_enabled(&mut self, enabled: bool) {
        let result = if enabled {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        };
        if result.is_err() {
            self.faulted = true;
        }
    }

    fn is_ready(&self) -> bool {
        self.initialized && !self.faulted
    }

    fn do_checks(&mut self) -> bool {
        if self.fault_asserted() {
            self.faulted = true;
        }
        !self.faulted
    }
}
