//! 追踪融合服务
//!
//! 将逐帧的手指张开程度转换为平滑后的逐关节混合系数：
//! - 指数滑动平均抑制单帧抖动，`alpha = 1 - exp(-dt / tau)`
//! - 被遮挡（未知）的手指保持上一次有效值
//! - 输入输出都限制在 [0, 1]

use futures_util::future::ready;
use futures_util::stream::{Stream, StreamExt};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use crate::config::FusionConfig;
use crate::error::Result;
use crate::models::{BlendVector, Finger, FingerSample, FrameClock, TrackingFrame, clamp_unit};
use crate::services::interpolation::FingerJointMap;

/// 追踪融合器
#[derive(Debug, Clone)]
pub struct TrackingFusion {
    time_constant: Duration,
    map: FingerJointMap,
    /// 逐手指闭合程度（0 = 张开）
    state: [f64; 5],
    seen: [bool; 5],
    last_timestamp: Option<Duration>,
}

impl TrackingFusion {
    pub fn new(config: &FusionConfig, map: FingerJointMap) -> Self {
        Self {
            time_constant: Duration::from_millis(config.time_constant_ms),
            map,
            state: [0.0; 5],
            seen: [false; 5],
            last_timestamp: None,
        }
    }

    /// 处理一帧样本，返回新的混合系数
    pub fn update(&mut self, sample: &FingerSample) -> BlendVector {
        let dt = match self.last_timestamp {
            Some(last) => sample.timestamp.saturating_sub(last),
            None => Duration::ZERO,
        };
        self.last_timestamp = Some(sample.timestamp);
        let alpha = self.alpha(dt);

        for finger in Finger::ALL {
            let i = finger.index();
            let Some(openness) = sample.finger(finger) else {
                continue;
            };
            if !openness.is_finite() {
                continue;
            }
            let target = 1.0 - clamp_unit(openness);
            self.state[i] = if self.seen[i] {
                clamp_unit(self.state[i] + alpha * (target - self.state[i]))
            } else {
                target
            };
            self.seen[i] = true;
        }

        self.current()
    }

    /// 当前混合系数（不消费新样本）
    pub fn current(&self) -> BlendVector {
        self.map.expand(&self.state)
    }

    /// 开始新的追踪会话：保留手指状态，重置时间基准
    pub fn restart_session(&mut self) {
        self.last_timestamp = None;
    }

    fn alpha(&self, dt: Duration) -> f64 {
        if self.time_constant.is_zero() {
            return 1.0;
        }
        1.0 - (-dt.as_secs_f64() / self.time_constant.as_secs_f64()).exp()
    }
}

/// 消费一个追踪会话的样本流，把每次融合结果写入单槽通道
///
/// 返回处理的帧数。接收端全部关闭时提前结束。
pub async fn run_fusion<S>(
    samples: S,
    fusion: &mut TrackingFusion,
    tx: &watch::Sender<BlendVector>,
) -> u64
where
    S: Stream<Item = FingerSample>,
{
    fusion.restart_session();
    let mut samples = Box::pin(samples);
    let mut frames: u64 = 0;
    while let Some(sample) = samples.next().await {
        let blend = fusion.update(&sample);
        frames += 1;
        if tx.send(blend).is_err() {
            debug!("Blend receiver dropped, stopping fusion");
            break;
        }
    }
    info!("Tracking session ended after {} frames", frames);
    frames
}

/// 在后台任务中运行 [`run_fusion`]
///
/// 样本流结束即任务结束；下一次会话重新调用即可。
pub fn spawn_fusion<S>(
    samples: S,
    mut fusion: TrackingFusion,
    tx: watch::Sender<BlendVector>,
) -> JoinHandle<TrackingFusion>
where
    S: Stream<Item = FingerSample> + Send + 'static,
{
    tokio::spawn(async move {
        run_fusion(samples, &mut fusion, &tx).await;
        fusion
    })
}

/// 把换行分隔的 JSON 帧解析为样本流
///
/// 格式错误的行被跳过，读错误结束会话。第一帧带 `t_ms` 时整个会话使用
/// 追踪时钟（之后缺少时间戳的帧被丢弃），否则使用接收时间。
pub fn tracking_frames<R>(reader: R) -> impl Stream<Item = FingerSample> + Send
where
    R: AsyncBufRead + Unpin + Send,
{
    let started = Instant::now();
    let mut clock = None;
    LinesStream::new(reader.lines())
        .take_while(|line| {
            if let Err(e) = line {
                warn!("Tracking stream read error: {}", e);
            }
            ready(line.is_ok())
        })
        .filter_map(move |line| {
            let sample = match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => match serde_json::from_str::<TrackingFrame>(&line) {
                    Ok(frame) => {
                        let clock = *clock.get_or_insert_with(|| FrameClock::for_first(&frame));
                        let sample = frame.into_sample(clock, started.elapsed());
                        if sample.is_none() {
                            warn!("Dropping tracking frame without t_ms");
                        }
                        sample
                    }
                    Err(e) => {
                        warn!("Skipping malformed tracking frame: {}", e);
                        None
                    }
                },
                Err(_) => None,
            };
            ready(sample)
        })
}

/// 接受追踪进程的连接，每个连接是一个会话，依次处理
///
/// 手指状态在会话之间保留。混合系数的接收端关闭后返回。
pub async fn serve_tracking(
    listener: TcpListener,
    mut fusion: TrackingFusion,
    tx: watch::Sender<BlendVector>,
) -> Result<()> {
    info!("Waiting for hand tracking on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Tracking session started from {}", peer);
        run_fusion(tracking_frames(BufReader::new(stream)), &mut fusion, &tx).await;
        if tx.is_closed() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerMapConfig;

    fn map() -> FingerJointMap {
        let config = FingerMapConfig {
            thumb: vec![0],
            index: vec![1],
            middle: vec![2],
            ring: vec![3],
            pinky: vec![],
        };
        FingerJointMap::from_config(&config, 4)
    }

    fn fusion(tau_ms: u64) -> TrackingFusion {
        TrackingFusion::new(
            &FusionConfig {
                time_constant_ms: tau_ms,
                listen_addr: None,
            },
            map(),
        )
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_first_sample_taken_directly() {
        let mut f = fusion(100);
        let blend = f.update(&FingerSample::uniform(ms(0), 0.25));
        assert_eq!(blend, BlendVector::PerJoint(vec![0.75; 4]));
    }

    #[test]
    fn test_zero_time_constant_disables_smoothing() {
        let mut f = fusion(0);
        f.update(&FingerSample::uniform(ms(0), 1.0));
        let blend = f.update(&FingerSample::uniform(ms(10), 0.0));
        assert_eq!(blend.at(0), 1.0);
    }

    #[test]
    fn test_ema_suppresses_single_frame_jitter() {
        let mut f = fusion(100);
        f.update(&FingerSample::uniform(ms(0), 1.0));
        let blend = f.update(&FingerSample::uniform(ms(16), 0.0));
        let expected = 1.0 - (-0.016f64 / 0.1).exp();
        assert!((blend.at(0) - expected).abs() < 1e-12);
        assert!(blend.at(0) < 0.2);
    }

    #[test]
    fn test_converges_to_steady_input() {
        let mut f = fusion(50);
        f.update(&FingerSample::uniform(ms(0), 1.0));
        let mut blend = BlendVector::default();
        for i in 1..=100 {
            blend = f.update(&FingerSample::uniform(ms(i * 20), 0.0));
        }
        assert!((blend.at(0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_occluded_finger_holds_last_value() {
        let mut f = fusion(0);
        f.update(&FingerSample::uniform(ms(0), 0.2));
        let blend = f.update(&FingerSample::new(
            ms(30),
            [None, Some(1.0), None, None, None],
        ));
        assert!((blend.at(0) - 0.8).abs() < 1e-12);
        assert_eq!(blend.at(1), 0.0);
        assert!((blend.at(2) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_never_seen_finger_stays_open() {
        let mut f = fusion(0);
        let blend = f.update(&FingerSample::new(ms(0), [None, Some(0.0), None, None, None]));
        assert_eq!(blend.at(0), 0.0);
        assert_eq!(blend.at(1), 1.0);
    }

    #[test]
    fn test_out_of_range_input_clamped() {
        let mut f = fusion(0);
        let blend = f.update(&FingerSample::uniform(ms(0), -0.5));
        assert_eq!(blend.at(0), 1.0);
        let blend = f.update(&FingerSample::uniform(ms(10), 7.0));
        assert_eq!(blend.at(0), 0.0);
    }

    #[test]
    fn test_non_finite_input_treated_as_unknown() {
        let mut f = fusion(0);
        f.update(&FingerSample::uniform(ms(0), 0.5));
        let blend = f.update(&FingerSample::uniform(ms(10), f64::NAN));
        assert_eq!(blend.at(0), 0.5);
    }

    #[tokio::test]
    async fn test_spawn_fusion_publishes_latest_blend() {
        let (tx, mut rx) = watch::channel(BlendVector::default());
        let samples = tokio_stream::iter(vec![
            FingerSample::uniform(ms(0), 1.0),
            FingerSample::uniform(ms(10), 0.0),
        ]);

        let handle = spawn_fusion(samples, fusion(0), tx);
        let fusion = handle.await.unwrap();

        assert!(rx.has_changed().unwrap_or(true));
        let latest = rx.borrow_and_update().clone();
        assert_eq!(latest, BlendVector::PerJoint(vec![1.0; 4]));
        assert_eq!(fusion.current(), latest);
    }

    #[tokio::test]
    async fn test_tracking_frames_skip_malformed_lines() {
        let input: &[u8] = b"{\"t_ms\":0,\"thumb\":1.0}\nnot json\n\n{\"t_ms\":20,\"index\":0.5}\n";
        let samples: Vec<FingerSample> = tracking_frames(input).collect().await;

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].finger(Finger::Thumb), Some(1.0));
        assert_eq!(samples[1].timestamp, ms(20));
        assert_eq!(samples[1].finger(Finger::Index), Some(0.5));
    }

    #[tokio::test]
    async fn test_tracking_frames_keep_first_frame_timebase() {
        let timed: &[u8] = b"{\"t_ms\":100,\"thumb\":1.0}\n{\"thumb\":0.0}\n{\"t_ms\":120,\"thumb\":0.5}\n";
        let samples: Vec<FingerSample> = tracking_frames(timed).collect().await;
        assert_eq!(
            samples.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![ms(100), ms(120)]
        );

        let untimed: &[u8] = b"{\"thumb\":1.0}\n{\"t_ms\":999999,\"thumb\":0.0}\n";
        let samples: Vec<FingerSample> = tracking_frames(untimed).collect().await;
        assert_eq!(samples.len(), 2);
        assert!(samples[1].timestamp < Duration::from_secs(1));
        assert!(samples[1].timestamp >= samples[0].timestamp);
    }

    #[tokio::test]
    async fn test_serve_tracking_feeds_watch_channel() {
        use tokio::io::AsyncWriteExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = watch::channel(BlendVector::default());
        tokio::spawn(serve_tracking(listener, fusion(0), tx));

        let mut tracker = tokio::net::TcpStream::connect(addr).await.unwrap();
        tracker
            .write_all(b"{\"t_ms\":0,\"thumb\":0.0,\"index\":0.0,\"middle\":0.0,\"ring\":0.0}\n")
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow(), BlendVector::PerJoint(vec![1.0; 4]));
    }
}
