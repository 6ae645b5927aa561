//! 控制循环
//!
//! 固定频率运行的状态机，唯一持有 `ControlState`。每一拍：
//! 1. 处理操作员命令
//! 2. 处理后台检索结果（过期结果丢弃）
//! 3. 读取最新的追踪混合系数
//! 4. 计算并发送一条关节指令
//!
//! 自由拖动期间（录制新类型时）跳过第 4 步，操作员手动摆放手指；
//! 保存成功、切换类型或点动时退出自由拖动，恢复发送。
//!
//! 子系统失败只记录日志、保持状态，循环本身不会因此退出。

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, JointLimit};
use crate::models::{
    BlendVector, ControlMode, ControlState, JogDirection, JointCommand, OperatorCommand, TypeRecord,
};
use crate::observability::ControlMetrics;
use crate::services::interpolation::interpolate;
use crate::services::retrieval::{Resolution, RetrievalAdapter, RetrievalOutcome, RetrievalWorker};
use crate::storage::TypeRepository;
use crate::transport::HandTransport;

/// 操作员命令通道容量
const COMMAND_QUEUE: usize = 64;

/// 一拍的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// 指令已送达
    Sent(JointCommand),
    /// 发送失败，下一拍重发
    SendFailed(JointCommand),
    /// 没有可发送的指令
    Holding,
}

/// 外部输入通道的发送端
pub struct ControlChannels {
    pub commands: mpsc::Sender<OperatorCommand>,
    pub tracking: watch::Sender<BlendVector>,
}

/// 控制循环
pub struct ControlLoop {
    tick_hz: u32,
    jog_step: f64,
    default_limits: Vec<JointLimit>,
    neutral_pose: Option<JointCommand>,
    repository: Arc<dyn TypeRepository>,
    transport: Box<dyn HandTransport>,
    retrieval: RetrievalWorker,
    retrieval_rx: mpsc::UnboundedReceiver<RetrievalOutcome>,
    commands: mpsc::Receiver<OperatorCommand>,
    tracking: watch::Receiver<BlendVector>,
    state: ControlState,
    active_record: Option<TypeRecord>,
    metrics: ControlMetrics,
    quit: bool,
}

impl ControlLoop {
    pub fn new(
        config: &AppConfig,
        repository: Arc<dyn TypeRepository>,
        transport: Box<dyn HandTransport>,
        retrieval: Arc<RetrievalAdapter>,
    ) -> (Self, ControlChannels) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (tracking_tx, tracking_rx) = watch::channel(BlendVector::default());
        let (worker, retrieval_rx) = RetrievalWorker::new(retrieval, repository.clone());

        let control = Self {
            tick_hz: config.control.tick_hz,
            jog_step: config.control.jog_step,
            default_limits: config.hand.limits(),
            neutral_pose: config.hand.neutral_pose.clone().map(JointCommand::new),
            repository,
            transport,
            retrieval: worker,
            retrieval_rx,
            commands: command_rx,
            tracking: tracking_rx,
            state: ControlState::default(),
            active_record: None,
            metrics: ControlMetrics::default(),
            quit: false,
        };

        (
            control,
            ControlChannels {
                commands: command_tx,
                tracking: tracking_tx,
            },
        )
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// 共享计数器的句柄
    pub fn metrics(&self) -> ControlMetrics {
        self.metrics.clone()
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    /// 按固定频率运行，直到收到 `Quit` 或命令通道关闭
    pub async fn run(mut self) -> ControlState {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Control loop running at {} Hz", self.tick_hz);
        while !self.quit {
            interval.tick().await;
            self.tick().await;
        }
        self.leave_free_drag().await;
        info!("Control loop stopped in {} mode", self.state.mode);

        self.state
    }

    /// 执行一拍
    pub async fn tick(&mut self) -> TickOutcome {
        self.metrics.record_tick();

        self.drain_commands().await;
        self.drain_retrievals().await;
        self.read_tracking();

        if self.state.free_drag {
            return TickOutcome::Holding;
        }
        let Some(command) = self.next_command() else {
            return TickOutcome::Holding;
        };

        match self.transport.send(&command).await {
            Ok(()) => {
                self.state.last_command_time = Some(Instant::now());
                self.metrics.record_sent();
                TickOutcome::Sent(command)
            }
            Err(e) => {
                self.metrics.record_transport_error();
                warn!(error_code = e.code(), "Joint command not delivered, retrying next tick: {}", e);
                TickOutcome::SendFailed(command)
            }
        }
    }

    async fn drain_commands(&mut self) {
        while !self.quit {
            match self.commands.try_recv() {
                Ok(command) => self.apply(command).await,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Operator command channel closed, stopping");
                    self.quit = true;
                }
            }
        }
    }

    async fn apply(&mut self, command: OperatorCommand) {
        debug!("Operator command: {:?}", command);
        match command {
            OperatorCommand::FreeDrag(true) => {
                self.enter_free_drag().await;
            }
            OperatorCommand::FreeDrag(false) => self.leave_free_drag().await,
            OperatorCommand::RecordOpen => self.record_pose(true).await,
            OperatorCommand::RecordClose => self.record_pose(false).await,
            OperatorCommand::Save(name) => self.save(name).await,
            OperatorCommand::Reset => {
                self.state.recording.clear();
                info!("Recorded poses cleared");
            }
            OperatorCommand::Jog(direction) => {
                self.leave_free_drag().await;
                self.jog(direction);
            }
            OperatorCommand::Select(name) => {
                self.retrieval.invalidate();
                self.activate(&name).await;
            }
            OperatorCommand::Retrieve(text) => {
                self.metrics.record_retrieval();
                self.retrieval.submit(text);
            }
            OperatorCommand::Quit => {
                info!("Quit requested");
                self.quit = true;
            }
        }
    }

    async fn drain_retrievals(&mut self) {
        while let Ok(outcome) = self.retrieval_rx.try_recv() {
            if !self.retrieval.is_current(outcome.generation) {
                self.metrics.record_stale_result();
                debug!("Discarding stale retrieval for '{}'", outcome.query);
                continue;
            }

            match outcome.result {
                Ok(Resolution::Resolved(name)) => self.activate(&name).await,
                Ok(Resolution::NoMatch) => {
                    self.metrics.record_retrieval_failure();
                    info!("No type matches '{}'", outcome.query);
                }
                Ok(Resolution::Ambiguous(candidates)) => {
                    self.metrics.record_retrieval_failure();
                    info!(
                        "'{}' is ambiguous between: {}",
                        outcome.query,
                        candidates.join(", ")
                    );
                }
                Err(e) => {
                    self.metrics.record_retrieval_failure();
                    warn!(
                        error_code = e.code(),
                        "Retrieval for '{}' failed, keeping current type: {}", outcome.query, e
                    );
                }
            }
        }
    }

    fn read_tracking(&mut self) {
        // 追踪会话结束后发送端可能已关闭，最后一帧仍然有效
        let blend = {
            let latest = self.tracking.borrow_and_update();
            if !latest.has_changed() {
                return;
            }
            latest.clone()
        };
        if self.state.mode == ControlMode::TypeActive {
            self.state.blend = blend;
        }
    }

    /// 本拍要发送的指令；无激活类型时保持上一条
    fn next_command(&mut self) -> Option<JointCommand> {
        if let Some(record) = &self.active_record {
            match interpolate(record, &self.state.blend, &self.default_limits) {
                Ok(command) => {
                    self.state.last_command = Some(command.clone());
                    return Some(command);
                }
                Err(e) => warn!("Interpolation for '{}' failed: {}", record.name, e),
            }
        }
        self.state
            .last_command
            .clone()
            .or_else(|| self.neutral_pose.clone())
    }

    async fn activate(&mut self, name: &str) {
        let record = match self.repository.get(name).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error_code = e.code(), "Cannot activate type '{}': {}", name, e);
                return;
            }
        };

        if let Some(blend) = record.default_blend {
            self.state.blend = BlendVector::Uniform(blend);
        }
        self.leave_free_drag().await;
        if self.state.active_type.as_deref() != Some(name) {
            self.metrics.record_type_switch();
        }
        self.state.active_type = Some(record.name.clone());
        self.state.mode = ControlMode::TypeActive;
        self.active_record = Some(record);
        info!("Active type: {}", name);
    }

    fn jog(&mut self, direction: JogDirection) {
        self.state.blend = match direction {
            JogDirection::Open => self.state.blend.stepped(-self.jog_step),
            JogDirection::Close => self.state.blend.stepped(self.jog_step),
            JogDirection::JumpOpen => BlendVector::Uniform(0.0),
            JogDirection::JumpClose => BlendVector::Uniform(1.0),
        };
        self.state.mode = ControlMode::ManualJog;
        debug!("Jog {:?}, blend {:.3}", direction, self.state.blend.mean());
    }

    /// 让手卸力并停止发送指令；返回是否处于自由拖动
    async fn enter_free_drag(&mut self) -> bool {
        if self.state.free_drag {
            return true;
        }
        match self.transport.set_free_drag(true).await {
            Ok(()) => {
                self.state.free_drag = true;
                info!("Free drag enabled, pose the hand by hand");
                true
            }
            Err(e) => {
                warn!(error_code = e.code(), "Cannot enable free drag: {}", e);
                false
            }
        }
    }

    async fn leave_free_drag(&mut self) {
        if !self.state.free_drag {
            return;
        }
        // 即使关闭请求失败也恢复发送，位置指令会让手重新受控
        if let Err(e) = self.transport.set_free_drag(false).await {
            warn!(error_code = e.code(), "Cannot disable free drag: {}", e);
        }
        self.state.free_drag = false;
        info!("Free drag disabled, resuming joint commands");
    }

    async fn record_pose(&mut self, open: bool) {
        let which = if open { "open" } else { "close" };
        if !self.enter_free_drag().await {
            warn!("Not recording {} pose while the hand is under position control", which);
            return;
        }
        let pose = match self.transport.read_position().await {
            Ok(position) => position.into_inner(),
            Err(e) => {
                warn!("Cannot read hand position for {} pose: {}", which, e);
                return;
            }
        };
        if pose.len() != self.repository.joint_count() {
            warn!(
                "Hand reported {} joints, expected {}",
                pose.len(),
                self.repository.joint_count()
            );
            return;
        }

        if open {
            self.state.recording.open_pose = Some(pose);
        } else {
            self.state.recording.close_pose = Some(pose);
        }
        info!("Recorded {} pose", which);
    }

    async fn save(&mut self, name: String) {
        let recording = &self.state.recording;
        let (Some(open), Some(close)) = (recording.open_pose.clone(), recording.close_pose.clone())
        else {
            warn!("Record both open and close poses before saving '{}'", name);
            return;
        };

        let record = TypeRecord::new(name.clone(), open, close);
        match self.repository.put(record.clone()).await {
            Ok(()) => {
                self.metrics.record_save();
                info!("Type '{}' saved", name);
                if self.state.active_type.as_deref() == Some(name.as_str()) {
                    self.active_record = Some(record);
                }
                self.leave_free_drag().await;
            }
            Err(e) => warn!(
                error_code = e.code(),
                "Saving type '{}' failed, recorded poses kept: {}", name, e
            ),
        }
    }
}
