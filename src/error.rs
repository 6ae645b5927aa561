//! 错误处理模块
//!
//! 定义应用程序的错误类型和错误处理逻辑。

use thiserror::Error;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 类型记录校验失败（拒绝写入，不落盘）
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 指令解析服务暂不可用（可重试）
    #[error("检索服务不可用: {0}")]
    RetrievalUnavailable(String),

    /// 硬件链路错误（非致命，下一拍重发）
    #[error("硬件传输错误: {0}")]
    Transport(String),

    /// 类型库读写错误
    #[error("类型库 IO 错误: {0}")]
    StoreIo(String),

    /// 超时错误
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    /// 是否为瞬时错误（调用方可在下一次命令/下一拍重试）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RetrievalUnavailable(_) | AppError::Transport(_) | AppError::Timeout(_)
        )
    }

    /// 稳定的错误代码，用于结构化日志字段
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::RetrievalUnavailable(_) => "RETRIEVAL_UNAVAILABLE",
            AppError::Transport(_) => "TRANSPORT",
            AppError::StoreIo(_) => "STORE_IO",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Config(_) => "CONFIG",
            AppError::Serialization(_) => "SERIALIZATION",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::StoreIo(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::RetrievalUnavailable(format!("请求超时: {}", e))
        } else {
            AppError::RetrievalUnavailable(e.to_string())
        }
    }
}

impl From<regex::Error> for AppError {
    fn from(e: regex::Error) -> Self {
        AppError::Internal(format!("正则表达式错误: {}", e))
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;
