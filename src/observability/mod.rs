//! 可观测性模块
//!
//! 提供结构化日志初始化和控制循环计数器。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};

// ===== Logging =====

/// 初始化全局 tracing 订阅者
///
/// `RUST_LOG` 优先于配置中的日志级别。配置了 `log_dir` 时按天滚动写入文件，
/// 返回的 guard 需要保持到进程退出，否则尾部日志会丢失。
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Config(format!("日志级别无效 '{}': {}", config.level, e)))?;

    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        // stdout 留给操作员控制台
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);

    let installed = if config.structured {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| AppError::Config(format!("日志初始化失败: {}", e)))?;

    Ok(guard)
}

// ===== Control Metrics =====

/// 控制循环指标
#[derive(Clone, Default)]
pub struct ControlMetrics {
    pub ticks_total: Arc<AtomicU64>,
    pub commands_sent: Arc<AtomicU64>,
    pub transport_errors: Arc<AtomicU64>,
    pub retrievals_total: Arc<AtomicU64>,
    pub retrieval_failures: Arc<AtomicU64>,
    pub stale_results: Arc<AtomicU64>,
    pub type_switches: Arc<AtomicU64>,
    pub saves_total: Arc<AtomicU64>,
}

impl ControlMetrics {
    pub fn record_tick(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retrieval(&self) {
        self.retrievals_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retrieval_failure(&self) {
        self.retrieval_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_result(&self) {
        self.stale_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_type_switch(&self) {
        self.type_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save(&self) {
        self.saves_total.fetch_add(1, Ordering::Relaxed);
    }

    /// 生成 Prometheus 文本格式指标
    pub fn gather(&self) -> String {
        let counters = [
            ("control_ticks_total", "Control loop ticks", &self.ticks_total),
            ("joint_commands_sent_total", "Joint commands delivered", &self.commands_sent),
            ("transport_errors_total", "Failed joint command sends", &self.transport_errors),
            ("retrievals_total", "Retrieval submissions", &self.retrievals_total),
            ("retrieval_failures_total", "Retrievals that failed or found nothing", &self.retrieval_failures),
            ("retrieval_stale_total", "Superseded retrieval results discarded", &self.stale_results),
            ("type_switches_total", "Active type changes", &self.type_switches),
            ("type_saves_total", "Type records saved", &self.saves_total),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}
