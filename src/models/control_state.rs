//! 控制状态模型
//!
//! `ControlState` 只由控制循环持有和修改，进程退出即销毁，不做持久化。

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::time::Instant;

/// 混合系数：0 = 张开姿态，1 = 闭合姿态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlendVector {
    /// 所有关节共用一个系数
    Uniform(f64),
    /// 逐关节系数
    PerJoint(Vec<f64>),
}

impl Default for BlendVector {
    fn default() -> Self {
        BlendVector::Uniform(0.0)
    }
}

impl BlendVector {
    /// 第 `joint` 个关节的系数，限制在 [0, 1]
    ///
    /// 非有限值按 0 处理。
    pub fn at(&self, joint: usize) -> f64 {
        let raw = match self {
            BlendVector::Uniform(b) => *b,
            BlendVector::PerJoint(values) => values.get(joint).copied().unwrap_or(0.0),
        };
        clamp_unit(raw)
    }

    /// 逐关节系数的数量；`Uniform` 返回 None
    pub fn len(&self) -> Option<usize> {
        match self {
            BlendVector::Uniform(_) => None,
            BlendVector::PerJoint(values) => Some(values.len()),
        }
    }

    /// 平均系数（已限幅）
    pub fn mean(&self) -> f64 {
        match self {
            BlendVector::Uniform(b) => clamp_unit(*b),
            BlendVector::PerJoint(values) if values.is_empty() => 0.0,
            BlendVector::PerJoint(values) => {
                values.iter().map(|v| clamp_unit(*v)).sum::<f64>() / values.len() as f64
            }
        }
    }

    /// 折叠为均值后加上 `delta`，结果限制在 [0, 1]
    ///
    /// 累积误差小于 1e-9 时吸附到端点，连续点动可以精确到达张开/闭合姿态。
    pub fn stepped(&self, delta: f64) -> BlendVector {
        let value = self.mean() + delta;
        let value = if (value - 1.0).abs() < 1e-9 {
            1.0
        } else if value.abs() < 1e-9 {
            0.0
        } else {
            value
        };
        BlendVector::Uniform(clamp_unit(value))
    }
}

/// 将数值限制在 [0, 1]，NaN 视为 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// 发送给硬件的关节角度向量（类型库关节顺序，弧度）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointCommand(pub Vec<f64>);

impl JointCommand {
    pub fn new(angles: Vec<f64>) -> Self {
        Self(angles)
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for JointCommand {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// 控制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// 无激活类型，保持上一次指令
    Idle,
    /// 已激活类型，混合系数由追踪融合驱动
    TypeActive,
    /// 操作员点动，忽略追踪输入
    ManualJog,
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMode::Idle => write!(f, "idle"),
            ControlMode::TypeActive => write!(f, "type_active"),
            ControlMode::ManualJog => write!(f, "manual_jog"),
        }
    }
}

/// 类型录制缓冲区
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingBuffer {
    pub open_pose: Option<Vec<f64>>,
    pub close_pose: Option<Vec<f64>>,
}

impl RecordingBuffer {
    pub fn clear(&mut self) {
        self.open_pose = None;
        self.close_pose = None;
    }
}

/// 控制状态
#[derive(Debug, Clone)]
pub struct ControlState {
    /// 当前激活的类型
    pub active_type: Option<String>,
    /// 当前混合系数
    pub blend: BlendVector,
    /// 最近一次成功发送指令的时间
    pub last_command_time: Option<Instant>,
    /// 最近一次计算出的关节指令
    pub last_command: Option<JointCommand>,
    /// 控制模式
    pub mode: ControlMode,
    /// 录制中的姿态
    pub recording: RecordingBuffer,
    /// 手处于自由拖动（卸力）状态，此时不发送指令
    pub free_drag: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            active_type: None,
            blend: BlendVector::default(),
            last_command_time: None,
            last_command: None,
            mode: ControlMode::Idle,
            recording: RecordingBuffer::default(),
            free_drag: false,
        }
    }
}
