//! 手势追踪样本

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 手指
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// 单帧追踪样本
///
/// `openness[f]` 为该手指的张开程度（1 = 完全张开），`None` 表示被遮挡或未检出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerSample {
    /// 采集时间（相对于追踪会话起点）
    pub timestamp: Duration,
    /// 按 `Finger::ALL` 顺序排列的张开程度
    pub openness: [Option<f64>; 5],
}

impl FingerSample {
    pub fn new(timestamp: Duration, openness: [Option<f64>; 5]) -> Self {
        Self {
            timestamp,
            openness,
        }
    }

    /// 所有手指取同一个张开程度
    pub fn uniform(timestamp: Duration, openness: f64) -> Self {
        Self::new(timestamp, [Some(openness); 5])
    }

    pub fn finger(&self, finger: Finger) -> Option<f64> {
        self.openness[finger.index()]
    }
}

/// 追踪进程发送的一帧（每行一个 JSON 对象）
///
/// 例如 `{"t_ms": 1234, "thumb": 0.8, "index": null, "middle": 0.1}`，缺省字段视为未检出。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TrackingFrame {
    /// 采集时间（毫秒）；会话第一帧缺省时整个会话使用接收时间
    pub t_ms: Option<u64>,
    pub thumb: Option<f64>,
    pub index: Option<f64>,
    pub middle: Option<f64>,
    pub ring: Option<f64>,
    pub pinky: Option<f64>,
}

/// 一个追踪会话使用的时间基准，由会话的第一帧决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClock {
    /// 使用追踪进程给出的 `t_ms`
    Tracker,
    /// 使用本地接收时间，忽略帧内时间戳
    Receiver,
}

impl FrameClock {
    pub fn for_first(frame: &TrackingFrame) -> Self {
        if frame.t_ms.is_some() {
            FrameClock::Tracker
        } else {
            FrameClock::Receiver
        }
    }
}

impl TrackingFrame {
    /// 按会话时间基准转换为样本
    ///
    /// 追踪时钟下缺少 `t_ms` 的帧无法放到时间轴上，返回 None。
    pub fn into_sample(self, clock: FrameClock, received: Duration) -> Option<FingerSample> {
        let timestamp = match clock {
            FrameClock::Tracker => Duration::from_millis(self.t_ms?),
            FrameClock::Receiver => received,
        };
        Some(FingerSample::new(
            timestamp,
            [self.thumb, self.index, self.middle, self.ring, self.pinky],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_missing_fingers_are_unknown() {
        let frame: TrackingFrame = serde_json::from_str(r#"{"t_ms":40,"thumb":0.8,"index":null}"#).unwrap();
        let sample = frame.into_sample(FrameClock::Tracker, Duration::from_secs(9)).unwrap();
        assert_eq!(sample.timestamp, Duration::from_millis(40));
        assert_eq!(sample.finger(Finger::Thumb), Some(0.8));
        assert_eq!(sample.finger(Finger::Index), None);
        assert_eq!(sample.finger(Finger::Pinky), None);
    }

    #[test]
    fn test_receiver_clock_ignores_frame_timestamps() {
        let untimed: TrackingFrame = serde_json::from_str(r#"{"ring":0.5}"#).unwrap();
        assert_eq!(FrameClock::for_first(&untimed), FrameClock::Receiver);

        let timed = TrackingFrame {
            t_ms: Some(90_000),
            ..Default::default()
        };
        let sample = timed.into_sample(FrameClock::Receiver, Duration::from_millis(7)).unwrap();
        assert_eq!(sample.timestamp, Duration::from_millis(7));
    }

    #[test]
    fn test_tracker_clock_drops_untimed_frames() {
        let untimed: TrackingFrame = serde_json::from_str(r#"{"ring":0.5}"#).unwrap();
        assert!(untimed.into_sample(FrameClock::Tracker, Duration::from_millis(7)).is_none());
    }
}
