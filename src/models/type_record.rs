//! 操作类型记录模型
//!
//! 一个操作类型（Manipulation Type）是一对经过标定的张开/闭合关节姿态，
//! 以类型名为键存放在类型库中。

use serde::{Deserialize, Serialize};

use crate::config::JointLimit;
use crate::error::{AppError, Result};

/// 类型记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRecord {
    /// 类型名（区分大小写，类型库主键）
    pub name: String,
    /// 张开姿态（弧度，类型库关节顺序）
    pub open_pose: Vec<f64>,
    /// 闭合姿态
    pub close_pose: Vec<f64>,
    /// 逐关节范围；缺省时使用手部模型的默认范围
    pub joint_limits: Option<Vec<JointLimit>>,
    /// 激活该类型时重置的混合系数；缺省时保持当前混合系数
    pub default_blend: Option<f64>,
}

impl TypeRecord {
    pub fn new(name: impl Into<String>, open_pose: Vec<f64>, close_pose: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            open_pose,
            close_pose,
            joint_limits: None,
            default_blend: None,
        }
    }

    pub fn with_limits(mut self, limits: Vec<JointLimit>) -> Self {
        self.joint_limits = Some(limits);
        self
    }

    pub fn with_default_blend(mut self, blend: f64) -> Self {
        self.default_blend = Some(blend);
        self
    }

    /// 关节数量
    pub fn joint_count(&self) -> usize {
        self.open_pose.len()
    }

    /// 校验记录是否适用于 `joint_count` 个关节的手部模型
    pub fn validate(&self, joint_count: usize) -> Result<()> {
        validate_type_name(&self.name)?;

        if self.open_pose.len() != self.close_pose.len() {
            return Err(AppError::Validation(format!(
                "类型 '{}' 张开/闭合姿态长度不一致: {} != {}",
                self.name,
                self.open_pose.len(),
                self.close_pose.len()
            )));
        }

        if self.open_pose.len() != joint_count {
            return Err(AppError::Validation(format!(
                "类型 '{}' 关节数为 {}，手部模型要求 {}",
                self.name,
                self.open_pose.len(),
                joint_count
            )));
        }

        if self
            .open_pose
            .iter()
            .chain(self.close_pose.iter())
            .any(|v| !v.is_finite())
        {
            return Err(AppError::Validation(format!(
                "类型 '{}' 包含非有限数值",
                self.name
            )));
        }

        if let Some(limits) = &self.joint_limits {
            if limits.len() != joint_count {
                return Err(AppError::Validation(format!(
                    "类型 '{}' 关节范围数量为 {}，要求 {}",
                    self.name,
                    limits.len(),
                    joint_count
                )));
            }
            if let Some((i, _)) = limits
                .iter()
                .enumerate()
                .find(|(_, l)| !(l.min.is_finite() && l.max.is_finite() && l.min <= l.max))
            {
                return Err(AppError::Validation(format!(
                    "类型 '{}' 第 {} 个关节范围无效",
                    self.name, i
                )));
            }
        }

        if let Some(blend) = self.default_blend {
            if !(0.0..=1.0).contains(&blend) {
                return Err(AppError::Validation(format!(
                    "类型 '{}' 默认混合系数 {} 不在 [0, 1] 内",
                    self.name, blend
                )));
            }
        }

        Ok(())
    }
}

/// 校验类型名：非空，且可安全用作文件名
pub fn validate_type_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("类型名不能为空".into()));
    }
    if name != name.trim() {
        return Err(AppError::Validation(format!(
            "类型名 '{}' 不能包含首尾空白",
            name
        )));
    }
    if name.starts_with('_') || name.starts_with('.') {
        return Err(AppError::Validation(format!(
            "类型名 '{}' 不能以 '_' 或 '.' 开头",
            name
        )));
    }
    if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
        return Err(AppError::Validation(format!(
            "类型名 '{}' 包含非法字符",
            name
        )));
    }
    Ok(())
}

/// 类型目录元数据，供检索使用
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// 类型名
    #[serde(rename = "id")]
    pub name: String,
    /// 显示名称
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// 姿态描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<String>,
    /// 典型意图短语
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents: Vec<String>,
    /// 用途说明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

impl TypeDescriptor {
    /// 仅含名称的描述
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 解析模型提示词中的单行目录
    pub fn catalog_line(&self) -> String {
        let intents = self
            .intents
            .iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}: {}; intents={}",
            self.name,
            self.pose.as_deref().unwrap_or(""),
            intents
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> TypeRecord {
        TypeRecord::new("box", vec![0.0; n], vec![1.0; n])
    }

    #[test]
    fn test_valid_record_passes() {
        assert!(record(16).validate(16).is_ok());
    }

    #[test]
    fn test_pose_length_mismatch_rejected() {
        let mut r = record(16);
        r.close_pose.pop();
        assert!(matches!(r.validate(16), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_joint_count_mismatch_rejected() {
        assert!(matches!(record(4).validate(16), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut r = record(4);
        r.open_pose[2] = f64::NAN;
        assert!(r.validate(4).is_err());
    }

    #[test]
    fn test_inverted_limit_rejected() {
        let r = record(2).with_limits(vec![JointLimit::new(0.0, 1.0), JointLimit::new(1.0, -1.0)]);
        assert!(r.validate(2).is_err());
    }

    #[test]
    fn test_default_blend_out_of_range_rejected() {
        assert!(record(2).with_default_blend(1.5).validate(2).is_err());
        assert!(record(2).with_default_blend(0.5).validate(2).is_ok());
    }

    #[test]
    fn test_type_name_rules() {
        assert!(validate_type_name("processed_tape").is_ok());
        assert!(validate_type_name("").is_err());
        assert!(validate_type_name("_type_info").is_err());
        assert!(validate_type_name("../escape").is_err());
        assert!(validate_type_name(" padded").is_err());
    }

    #[test]
    fn test_descriptor_deserializes_catalog_entry() {
        let json = r#"{"id":"box","name":"Box grasp","pose":"palm wrap","intents":["lift box","hold carton","carry","extra"]}"#;
        let d: TypeDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.name, "box");
        assert_eq!(d.label.as_deref(), Some("Box grasp"));
        assert_eq!(d.catalog_line(), "box: palm wrap; intents=lift box,hold carton,carry");
    }
}
