//! TypeTele - 基于操作类型的灵巧手遥操作
//!
//! 操作员用自然语言或语音选择一个操作类型（标定好的张开/闭合姿态对），
//! 再由实时手势追踪在两个姿态之间连续调节，按固定频率向灵巧手发送关节指令。

pub mod config;
pub mod console;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;
pub mod transport;
