//! 硬件传输层
//!
//! 控制循环只依赖 `HandTransport` trait，具体链路（电机桥接进程或模拟手）
//! 在启动时由配置选择。

pub mod bridge;
pub mod layout;
pub mod simulated;

use async_trait::async_trait;
use tracing::info;

use crate::config::TransportConfig;
use crate::error::{AppError, Result};
use crate::models::JointCommand;

pub use bridge::BridgeTransport;
pub use layout::JointLayout;
pub use simulated::SimulatedHand;

/// 手部硬件链路
///
/// 指令和位置都使用类型库关节顺序，顺序与零位转换由实现负责。
#[async_trait]
pub trait HandTransport: Send {
    /// 发送一条关节指令（幂等，失败时调用方下一拍重发）
    async fn send(&mut self, command: &JointCommand) -> Result<()>;

    /// 读取手的当前关节位置
    async fn read_position(&mut self) -> Result<JointCommand>;

    /// 开启/关闭自由拖动（卸力），开启期间操作员可以手动摆放手指
    async fn set_free_drag(&mut self, enabled: bool) -> Result<()>;
}

/// 根据配置创建传输
pub async fn create_transport(
    config: &TransportConfig,
    joint_count: usize,
) -> Result<Box<dyn HandTransport>> {
    match config.kind.as_str() {
        "bridge" => {
            let layout = JointLayout::new(config.reorder.clone(), config.offset)?;
            if layout.joint_count() != joint_count {
                return Err(AppError::Config(format!(
                    "关节重排长度 {} 与关节数 {} 不一致",
                    layout.joint_count(),
                    joint_count
                )));
            }
            let transport = BridgeTransport::connect(config, layout).await?;
            Ok(Box::new(transport))
        }
        "sim" => {
            info!("Using simulated hand with {} joints", joint_count);
            Ok(Box::new(SimulatedHand::new(joint_count)))
        }
        other => Err(AppError::Config(format!("未知的传输类型: {}", other))),
    }
}
