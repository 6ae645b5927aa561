use crate::config::config::AppConfig;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use std::path::{Path, PathBuf};

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 搜索路径：
    /// 1. ./typetele.toml
    /// 2. 环境变量（`TYPETELE_` 前缀，`__` 分隔层级）
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, figment::Error> {
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TYPETELE_").split("__"));

        figment.extract()
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        let hand = &config.hand;
        if hand.joint_count == 0 {
            return Err(ConfigValidationError::InvalidJointCount);
        }

        if let Some(limits) = &hand.joint_limits {
            if limits.len() != hand.joint_count {
                return Err(ConfigValidationError::LengthMismatch {
                    field: "hand.joint_limits".into(),
                    expected: hand.joint_count,
                    got: limits.len(),
                });
            }
        }

        let default = hand.default_limit;
        let overrides = hand.joint_limits.as_deref().unwrap_or(&[]);
        if std::iter::once(&default)
            .chain(overrides.iter())
            .any(|l| !(l[0] <= l[1]))
        {
            return Err(ConfigValidationError::InvalidLimit);
        }

        if let Some(neutral) = &hand.neutral_pose {
            if neutral.len() != hand.joint_count {
                return Err(ConfigValidationError::LengthMismatch {
                    field: "hand.neutral_pose".into(),
                    expected: hand.joint_count,
                    got: neutral.len(),
                });
            }
        }

        let map = &hand.finger_map;
        let mut owned = vec![false; hand.joint_count];
        for joint in map
            .thumb
            .iter()
            .chain(&map.index)
            .chain(&map.middle)
            .chain(&map.ring)
            .chain(&map.pinky)
        {
            match owned.get_mut(*joint) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(ConfigValidationError::InvalidFingerMap(*joint)),
            }
        }

        if config.control.tick_hz == 0 {
            return Err(ConfigValidationError::InvalidTickRate);
        }

        if !(config.control.jog_step > 0.0 && config.control.jog_step <= 1.0) {
            return Err(ConfigValidationError::InvalidJogStep);
        }

        if config.transport.kind == "bridge" {
            let mut sorted = config.transport.reorder.clone();
            sorted.sort_unstable();
            if sorted != (0..hand.joint_count).collect::<Vec<_>>() {
                return Err(ConfigValidationError::InvalidReorder);
            }
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("关节数量无效，必须大于 0")]
    InvalidJointCount,

    #[error("{field} 长度应为 {expected}，实际为 {got}")]
    LengthMismatch {
        field: String,
        expected: usize,
        got: usize,
    },

    #[error("关节范围无效，要求 min <= max")]
    InvalidLimit,

    #[error("手指映射无效：关节 {0} 越界或被重复映射")]
    InvalidFingerMap(usize),

    #[error("控制频率无效，必须大于 0")]
    InvalidTickRate,

    #[error("点动步长必须在 (0, 1] 内")]
    InvalidJogStep,

    #[error("电机重排序必须是 0..N 的一个排列")]
    InvalidReorder,
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("typetele.toml")
}

/// 检查配置文件是否存在
pub fn config_exists() -> bool {
    default_config_path().exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let config = ConfigLoader::load_from("/nonexistent/typetele.toml").unwrap();
        assert_eq!(config.hand.joint_count, 16);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[hand]\nmodel_id = \"mini\"\njoint_count = 4\n\n[hand.finger_map]\nindex = [0, 1]\nthumb = [2, 3]\nmiddle = []\nring = []\n\n[control]\ntick_hz = 50\n\n[transport]\nkind = \"sim\""
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.hand.model_id, "mini");
        assert_eq!(config.hand.joint_count, 4);
        assert_eq!(config.control.tick_hz, 50);
        assert!(config.hand.finger_map.middle.is_empty());
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_finger_joint() {
        let mut config = AppConfig::default();
        config.hand.finger_map.thumb = vec![0];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidFingerMap(0))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_neutral_pose() {
        let mut config = AppConfig::default();
        config.hand.neutral_pose = Some(vec![0.0; 3]);
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_tick_rate() {
        let mut config = AppConfig::default();
        config.control.tick_hz = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigValidationError::InvalidTickRate)
        ));
    }
}
