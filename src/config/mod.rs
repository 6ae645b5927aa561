//! 配置管理模块
//!
//! 提供应用程序配置加载和管理功能，支持 TOML 配置文件和环境变量覆盖。
//! 配置在启动时构造一次，以引用方式传递给各个组件。

pub mod config;
pub mod loader;

pub use config::{
    AppConfig, ControlConfig, FingerMapConfig, FusionConfig, HandConfig, JointLimit,
    LibraryConfig, LoggingConfig, RetrievalConfig, TransportConfig,
};
pub use loader::{ConfigLoader, ConfigValidationError};
