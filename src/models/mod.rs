//! 核心数据模型模块
//!
//! 定义 TypeTele 的核心数据结构：TypeRecord、ControlState、OperatorCommand、
//! FingerSample 等。

pub mod command;
pub mod control_state;
pub mod tracking;
pub mod type_record;

pub use command::{CommandParseError, HELP_TEXT, JogDirection, OperatorCommand};
pub use control_state::{
    BlendVector, ControlMode, ControlState, JointCommand, RecordingBuffer, clamp_unit,
};
pub use tracking::{Finger, FingerSample, FrameClock, TrackingFrame};
pub use type_record::{TypeDescriptor, TypeRecord, validate_type_name};
