//! 姿态插值
//!
//! `angle[i] = open[i] + b[i] * (close[i] - open[i])`，再按关节范围限幅。
//! 纯函数，无状态，可以任意频率调用。

use crate::config::{FingerMapConfig, JointLimit};
use crate::error::{AppError, Result};
use crate::models::{BlendVector, Finger, JointCommand, TypeRecord};

/// 按混合系数在张开/闭合姿态之间插值
///
/// 混合系数超出 [0, 1] 时先限幅而不是报错，追踪噪声可能短暂越界。
/// 记录自带关节范围时优先使用，否则使用 `default_limits`。
pub fn interpolate(
    record: &TypeRecord,
    blend: &BlendVector,
    default_limits: &[JointLimit],
) -> Result<JointCommand> {
    let n = record.joint_count();
    if record.close_pose.len() != n {
        return Err(AppError::Validation(format!(
            "类型 '{}' 张开/闭合姿态长度不一致",
            record.name
        )));
    }
    if let Some(len) = blend.len() {
        if len != n {
            return Err(AppError::Validation(format!(
                "混合系数长度 {} 与关节数 {} 不一致",
                len, n
            )));
        }
    }

    let limits = record.joint_limits.as_deref().unwrap_or(default_limits);
    if limits.len() != n {
        return Err(AppError::Validation(format!(
            "关节范围数量 {} 与关节数 {} 不一致",
            limits.len(),
            n
        )));
    }
    if let Some(joint) = limits.iter().position(|limit| !limit.is_valid()) {
        return Err(AppError::Validation(format!(
            "关节 {} 的范围无效: {:?}",
            joint, limits[joint]
        )));
    }

    let angles = record
        .open_pose
        .iter()
        .zip(&record.close_pose)
        .zip(limits)
        .enumerate()
        .map(|(i, ((open, close), limit))| {
            let b = blend.at(i);
            let angle = if b >= 1.0 {
                *close
            } else if b <= 0.0 {
                *open
            } else {
                open + b * (close - open)
            };
            limit.clamp(angle)
        })
        .collect();

    Ok(JointCommand::new(angles))
}

/// 手指到关节的映射
#[derive(Debug, Clone, PartialEq)]
pub struct FingerJointMap {
    owners: Vec<Option<Finger>>,
}

impl FingerJointMap {
    /// 由配置构造；越界关节被忽略（配置校验阶段已拒绝）
    pub fn from_config(config: &FingerMapConfig, joint_count: usize) -> Self {
        let mut owners = vec![None; joint_count];
        let groups = [
            (Finger::Thumb, &config.thumb),
            (Finger::Index, &config.index),
            (Finger::Middle, &config.middle),
            (Finger::Ring, &config.ring),
            (Finger::Pinky, &config.pinky),
        ];
        for (finger, joints) in groups {
            for &joint in joints {
                if let Some(owner) = owners.get_mut(joint) {
                    *owner = Some(finger);
                }
            }
        }
        Self { owners }
    }

    pub fn joint_count(&self) -> usize {
        self.owners.len()
    }

    /// 将逐手指系数展开为逐关节系数
    ///
    /// 不属于任何手指的关节取已映射手指的平均系数。
    pub fn expand(&self, finger_blend: &[f64; 5]) -> BlendVector {
        let mapped: Vec<f64> = Finger::ALL
            .iter()
            .filter(|f| self.owners.contains(&Some(**f)))
            .map(|f| finger_blend[f.index()])
            .collect();
        let fallback = if mapped.is_empty() {
            0.0
        } else {
            mapped.iter().sum::<f64>() / mapped.len() as f64
        };

        BlendVector::PerJoint(
            self.owners
                .iter()
                .map(|owner| match owner {
                    Some(finger) => finger_blend[finger.index()],
                    None => fallback,
                })
                .collect(),
        )
    }
}
