//! 关节顺序与零位转换
//!
//! 类型库使用与驱动无关的关节顺序，电机端的顺序和零位由驱动决定：
//! `motor[j] = library[reorder[j]] + offset`。

use crate::error::{AppError, Result};

/// 类型库顺序与电机顺序之间的转换
#[derive(Debug, Clone, PartialEq)]
pub struct JointLayout {
    reorder: Vec<usize>,
    offset: f64,
}

impl JointLayout {
    /// `reorder` 必须是 `0..n` 的一个排列
    pub fn new(reorder: Vec<usize>, offset: f64) -> Result<Self> {
        let mut seen = vec![false; reorder.len()];
        for &i in &reorder {
            match seen.get_mut(i) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(AppError::Config(format!(
                        "关节重排 {:?} 不是有效的排列",
                        reorder
                    )));
                }
            }
        }
        Ok(Self { reorder, offset })
    }

    /// 恒等布局
    pub fn identity(joint_count: usize) -> Self {
        Self {
            reorder: (0..joint_count).collect(),
            offset: 0.0,
        }
    }

    pub fn joint_count(&self) -> usize {
        self.reorder.len()
    }

    /// 类型库顺序 -> 电机顺序
    pub fn to_motor(&self, angles: &[f64]) -> Result<Vec<f64>> {
        self.check_len(angles.len())?;
        Ok(self
            .reorder
            .iter()
            .map(|&src| angles[src] + self.offset)
            .collect())
    }

    /// 电机顺序 -> 类型库顺序
    pub fn from_motor(&self, motor: &[f64]) -> Result<Vec<f64>> {
        self.check_len(motor.len())?;
        let mut angles = vec![0.0; motor.len()];
        for (j, &dst) in self.reorder.iter().enumerate() {
            angles[dst] = motor[j] - self.offset;
        }
        Ok(angles)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.reorder.len() {
            return Err(AppError::Transport(format!(
                "关节数量 {} 与布局 {} 不一致",
                len,
                self.reorder.len()
            )));
        }
        Ok(())
    }
}
