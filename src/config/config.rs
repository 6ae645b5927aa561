use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 单个关节的角度范围（弧度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub min: f64,
    pub max: f64,
}

impl JointLimit {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// 上下界均为有限值且 `min <= max`
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// 将角度限制在范围内；范围无效时不会 panic，结果偏向 `max`
    pub fn clamp(&self, angle: f64) -> f64 {
        angle.max(self.min).min(self.max)
    }
}

/// 手指到关节的映射（关节下标为类型库中的顺序）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FingerMapConfig {
    pub thumb: Vec<usize>,
    pub index: Vec<usize>,
    pub middle: Vec<usize>,
    pub ring: Vec<usize>,
    pub pinky: Vec<usize>,
}

impl Default for FingerMapConfig {
    // LEAP Hand 没有独立的小指
    fn default() -> Self {
        Self {
            index: (0..4).collect(),
            middle: (4..8).collect(),
            ring: (8..12).collect(),
            thumb: (12..16).collect(),
            pinky: Vec::new(),
        }
    }
}

/// 手部模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandConfig {
    /// 手型标识，同时作为类型库的命名空间目录
    pub model_id: String,
    /// 关节数量 N
    pub joint_count: usize,
    /// 全局默认关节范围 [min, max]
    pub default_limit: [f64; 2],
    /// 逐关节范围覆盖（长度须为 N）
    pub joint_limits: Option<Vec<[f64; 2]>>,
    /// 空闲状态下的安全姿态
    pub neutral_pose: Option<Vec<f64>>,
    /// 手指到关节的映射
    pub finger_map: FingerMapConfig,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            model_id: "leap".into(),
            joint_count: 16,
            default_limit: [-std::f64::consts::PI, std::f64::consts::PI],
            joint_limits: None,
            neutral_pose: None,
            finger_map: FingerMapConfig::default(),
        }
    }
}

impl HandConfig {
    /// 展开为逐关节范围
    pub fn limits(&self) -> Vec<JointLimit> {
        match &self.joint_limits {
            Some(limits) => limits.iter().map(|l| JointLimit::new(l[0], l[1])).collect(),
            None => vec![JointLimit::new(self.default_limit[0], self.default_limit[1]); self.joint_count],
        }
    }
}

/// 类型库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// 类型库根目录，记录位于 `<root>/<model_id>/<name>.txt`
    pub root: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("TypeLibrary"),
        }
    }
}

/// 指令检索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 解析模型服务地址（OpenAI 兼容接口）
    pub base_url: String,
    /// API 密钥
    pub api_key: String,
    /// 模型名称
    pub model: String,
    /// 单次请求超时（毫秒）
    pub timeout_ms: u64,
    /// 是否启用本地词法预匹配
    pub local_match: bool,
    /// 本地匹配直接命中阈值
    pub local_accept_threshold: f64,
    /// 两个候选分差小于该值视为歧义
    pub ambiguity_margin: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".into(),
            api_key: String::new(),
            model: "deepseek-chat".into(),
            timeout_ms: 8000,
            local_match: true,
            local_accept_threshold: 0.75,
            ambiguity_margin: 0.05,
        }
    }
}

/// 手势追踪融合配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// 指数滑动平均时间常数（毫秒），0 表示不平滑
    pub time_constant_ms: u64,
    /// 追踪进程连接的监听地址；不配置时只接受点动控制
    pub listen_addr: Option<String>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            time_constant_ms: 80,
            listen_addr: None,
        }
    }
}

/// 控制循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// 控制频率（Hz）
    pub tick_hz: u32,
    /// 单次点动步长
    pub jog_step: f64,
    /// 启动时激活的类型
    pub initial_type: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_hz: 100,
            jog_step: 0.05,
            initial_type: None,
        }
    }
}

/// 硬件链路配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// "bridge" 或 "sim"
    pub kind: String,
    /// 电机桥接进程地址
    pub bridge_addr: String,
    /// 连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 单次读写超时（毫秒）
    pub io_timeout_ms: u64,
    /// 类型库顺序 -> 电机顺序
    pub reorder: Vec<usize>,
    /// 电机零位偏移（弧度）
    pub offset: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: "bridge".into(),
            bridge_addr: "127.0.0.1:7400".into(),
            connect_timeout_ms: 2000,
            io_timeout_ms: 5,
            reorder: vec![9, 8, 10, 11, 5, 4, 6, 7, 1, 0, 2, 3, 12, 13, 14, 15],
            offset: 3.14159,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化日志格式
    pub structured: bool,
    /// 日志文件目录（按天滚动）
    pub log_dir: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
            file_prefix: "typetele.log".into(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 手部模型配置
    pub hand: HandConfig,
    /// 类型库配置
    pub library: LibraryConfig,
    /// 检索配置
    pub retrieval: RetrievalConfig,
    /// 追踪融合配置
    pub fusion: FusionConfig,
    /// 控制循环配置
    pub control: ControlConfig,
    /// 硬件链路配置
    pub transport: TransportConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}
