//! STM32G4 TIM1による `PwmTimer` 実装
//!
//! コンペア値は `ComplementaryPwm` 経由で、方向・AOE/MOE・更新フラグはPACで直接操作します。

use embassy_stm32::{
    pac, peripherals,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};

use super::PwmTimer;

/// TIM1（中央揃え、3相相補PWM）
pub struct Tim1Pwm {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
}

impl Tim1Pwm {
    /// # 引数
    /// * `pwm` - 中央揃えモードで初期化済みのPWMペリフェラル（TIM1）
    pub fn new(mut pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        pwm.enable(Channel::Ch1);
        pwm.enable(Channel::Ch2);
        pwm.enable(Channel::Ch3);

        // 出力はアームされるまで停止
        let tim1 = pac::TIM1;
        tim1.bdtr().modify(|w| {
            w.set_aoe(false);
            w.set_moe(false);
        });

        Self { pwm }
    }
}

impl PwmTimer for Tim1Pwm {
    fn is_counting_down(&self) -> bool {
        pac::TIM1.cr1().read().dir() == pac::timer::vals::Dir::DOWN
    }

    fn set_compare(&mut self, timings: [u16; 3]) {
        self.pwm.set_duty(Channel::Ch1, timings[0]);
        self.pwm.set_duty(Channel::Ch2, timings[1]);
        self.pwm.set_duty(Channel::Ch3, timings[2]);
    }

    fn set_auto_output_enable(&mut self, enable: bool) {
        pac::TIM1.bdtr().modify(|w| w.set_aoe(enable));
    }

    fn disable_output(&mut self) {
        pac::TIM1.bdtr().modify(|w| w.set_moe(false));
    }

    fn is_output_enabled(&self) -> bool {
        pac::TIM1.bdtr().read().moe()
    }

    fn update_pending(&self) -> bool {
        pac::TIM1.sr().read().uif()
    }

    fn clear_update_flag(&mut self) {
        pac::TIM1.sr().modify(|w| w.set_uif(false));
    }
}
