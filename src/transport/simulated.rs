//! 进程内模拟手
//!
//! 记录每一条指令，可注入发送失败；克隆共享同一份状态，便于测试观察。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::JointCommand;
use crate::transport::HandTransport;

#[derive(Debug)]
struct SimState {
    position: Vec<f64>,
    sent: Vec<JointCommand>,
    failures_pending: usize,
    offline: bool,
    free_drag: bool,
}

/// 模拟手
#[derive(Debug, Clone)]
pub struct SimulatedHand {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHand {
    /// 初始位置全为 0
    pub fn new(joint_count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                position: vec![0.0; joint_count],
                sent: Vec::new(),
                failures_pending: 0,
                offline: false,
                free_drag: false,
            })),
        }
    }

    /// 已成功送达的全部指令
    pub fn sent(&self) -> Vec<JointCommand> {
        self.state.lock().sent.clone()
    }

    pub fn last_sent(&self) -> Option<JointCommand> {
        self.state.lock().sent.last().cloned()
    }

    /// 接下来 `count` 次发送失败
    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().failures_pending = count;
    }

    /// 模拟链路断开/恢复
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// 直接设置当前位置（模拟操作员手动摆放）
    pub fn set_position(&self, position: Vec<f64>) {
        self.state.lock().position = position;
    }

    pub fn position(&self) -> Vec<f64> {
        self.state.lock().position.clone()
    }

    pub fn is_free_drag(&self) -> bool {
        self.state.lock().free_drag
    }
}

#[async_trait]
impl HandTransport for SimulatedHand {
    async fn send(&mut self, command: &JointCommand) -> Result<()> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(AppError::Transport("模拟手离线".into()));
        }
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(AppError::Transport("模拟发送失败".into()));
        }
        if command.len() != state.position.len() {
            return Err(AppError::Transport(format!(
                "关节数量 {} 与模拟手 {} 不一致",
                command.len(),
                state.position.len()
            )));
        }
        debug!("Simulated hand command: {:?}", command.0);
        state.position = command.0.clone();
        state.sent.push(command.clone());
        Ok(())
    }

    async fn read_position(&mut self) -> Result<JointCommand> {
        let state = self.state.lock();
        if state.offline {
            return Err(AppError::Transport("模拟手离线".into()));
        }
        Ok(JointCommand::new(state.position.clone()))
    }

    async fn set_free_drag(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(AppError::Transport("模拟手离线".into()));
        }
        debug!("Simulated hand free drag: {}", enabled);
        state.free_drag = enabled;
        Ok(())
    }
}
