//! 3相モーターの電流制御コア
//!
//! PWMタイマーの更新割り込みで電流を測定し、アームされた制御則の出力をPWMに
//! 反映します。DCオフセット補正、電流・リーク・バス電流の監視、相抵抗と
//! インダクタンスのキャリブレーションを含みます。
#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod config;
pub mod current_sense;
pub mod error;
pub mod foc;
pub mod gate_driver;
pub mod hardware;
pub mod motor;
pub mod phase;

#[cfg(test)]
mod sim;

pub use config::{HardwareConfig, MotorConfig, MotorType};
pub use error::{MotorError, SetupError};
pub use foc::ControlLaw;
pub use motor::{CurrentControlGains, Motor};
pub use phase::PhaseTriple;
