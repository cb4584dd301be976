use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use crate::error::{JobError, JobResult};
use crate::media_probe::{MediaInfo, MediaProbe};

/// 一秒对应的微秒数，草稿里的时间统一使用微秒
pub const SEC: u64 = 1_000_000;

/// 时间轴上的一个片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// 素材路径
    pub source: PathBuf,
    /// 素材内的起始偏移（始终为 0）
    pub source_start_us: u64,
    /// 实际放置的时长
    pub duration_us: u64,
    /// 在时间轴上的起点
    pub start_us: u64,
    /// 素材自然时长与画面尺寸
    #[serde(skip)]
    pub media: MediaInfo,
}

impl Segment {
    pub fn end_us(&self) -> u64 {
        self.start_us.saturating_add(self.duration_us)
    }
}

/// 单轨时间轴
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub segments: Vec<Segment>,
}

impl Timeline {
    pub fn total_duration_us(&self) -> u64 {
        self.segments.last().map(Segment::end_us).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// 把秒数上限换算为微秒，至少为 1 微秒
pub fn seconds_to_micros(secs: f64) -> u64 {
    ((secs * SEC as f64) as u64).max(1)
}

/// 按输入顺序排布片段
///
/// 游标从 0 开始，每个素材放置 `min(自然时长, 上限)`，之后游标前进相同的长度，
/// 因此片段之间没有空隙也没有重叠。时长为 0 或无法读取的素材直接让任务失败。
pub fn layout(
    videos: &[PathBuf],
    clip_limit_us: Option<u64>,
    probe: &dyn MediaProbe,
) -> JobResult<Timeline> {
    let start = Instant::now();
    let mut cursor = 0u64;
    let mut segments = Vec::with_capacity(videos.len());

    for (index, source) in videos.iter().enumerate() {
        let media = probe_duration(probe, source)?;

        let duration_us = match clip_limit_us {
            Some(limit) => media.duration_us.min(limit),
            None => media.duration_us,
        };

        let end_us = cursor.checked_add(duration_us).ok_or_else(|| {
            warn!("素材 {} 让时间轴总长溢出", source.display());
            JobError::UnreadableMedia {
                path: source.clone(),
                reason: format!("duration {}us overflows the timeline", media.duration_us),
            }
        })?;

        debug!(
            "片段 #{}: {} 自然时长 {}us，放置 [{}, {})",
            index,
            source.display(),
            media.duration_us,
            cursor,
            end_us
        );

        segments.push(Segment {
            source: source.clone(),
            source_start_us: 0,
            duration_us,
            start_us: cursor,
            media,
        });
        cursor = end_us;
    }

    info!(
        "✅ [时间轴] 排布 {} 个片段，总时长 {:.2}秒，耗时: {:.2}秒",
        segments.len(),
        cursor as f64 / SEC as f64,
        start.elapsed().as_secs_f64()
    );

    Ok(Timeline { segments })
}

fn probe_duration(probe: &dyn MediaProbe, source: &Path) -> JobResult<MediaInfo> {
    let media = probe.probe(source).map_err(|e| {
        warn!("无法读取素材 {}: {}", source.display(), e);
        JobError::UnreadableMedia {
            path: source.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    if media.duration_us == 0 {
        warn!("素材 {} 的时长为 0", source.display());
        return Err(JobError::UnreadableMedia {
            path: source.to_path_buf(),
            reason: "duration is zero".to_string(),
        });
    }

    Ok(media)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_probe::ProbeError;
    use std::collections::HashMap;

    struct FixedProbe(HashMap<PathBuf, u64>);

    impl FixedProbe {
        fn new(clips: &[(&str, u64)]) -> Self {
            Self(
                clips
                    .iter()
                    .map(|(p, d)| (PathBuf::from(p), *d))
                    .collect(),
            )
        }
    }

    impl MediaProbe for FixedProbe {
        fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
            self.0
                .get(path)
                .map(|d| MediaInfo::with_duration(*d))
                .ok_or_else(|| ProbeError::Open("no such clip".to_string()))
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn spans(timeline: &Timeline) -> Vec<(u64, u64)> {
        timeline
            .segments
            .iter()
            .map(|s| (s.start_us, s.end_us()))
            .collect()
    }

    #[test]
    fn places_clips_back_to_back() {
        let probe = FixedProbe::new(&[("/a.mp4", 5 * SEC), ("/b.mp4", 8 * SEC)]);
        let timeline = layout(&paths(&["/a.mp4", "/b.mp4"]), None, &probe).unwrap();
        assert_eq!(spans(&timeline), vec![(0, 5 * SEC), (5 * SEC, 13 * SEC)]);
        assert_eq!(timeline.total_duration_us(), 13 * SEC);
        assert!(timeline.segments.iter().all(|s| s.source_start_us == 0));
    }

    #[test]
    fn clamps_each_clip_to_limit() {
        let probe = FixedProbe::new(&[("/a.mp4", 5 * SEC), ("/b.mp4", 8 * SEC)]);
        let timeline =
            layout(&paths(&["/a.mp4", "/b.mp4"]), Some(3 * SEC), &probe).unwrap();
        assert_eq!(spans(&timeline), vec![(0, 3 * SEC), (3 * SEC, 6 * SEC)]);
    }

    #[test]
    fn short_clip_is_not_padded() {
        let probe = FixedProbe::new(&[("/a.mp4", 2 * SEC), ("/b.mp4", 9 * SEC)]);
        let limit = seconds_to_micros(4.5);
        let timeline = layout(&paths(&["/a.mp4", "/b.mp4"]), Some(limit), &probe).unwrap();
        assert_eq!(timeline.segments[0].duration_us, 2 * SEC);
        assert_eq!(timeline.segments[1].duration_us, limit);
        assert!(timeline.segments.iter().all(|s| s.duration_us <= limit));
    }

    #[test]
    fn no_gaps_and_total_is_sum() {
        let durations = [1_234_567u64, 40_000, 3 * SEC, 999, 7 * SEC + 1];
        let names: Vec<String> = (0..durations.len()).map(|i| format!("/clip{}.mp4", i)).collect();
        let clips: Vec<(&str, u64)> = names
            .iter()
            .map(String::as_str)
            .zip(durations.iter().copied())
            .collect();
        let probe = FixedProbe::new(&clips);
        let sources: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();

        let timeline = layout(&sources, None, &probe).unwrap();
        assert_eq!(timeline.len(), durations.len());
        assert_eq!(timeline.segments[0].start_us, 0);
        for pair in timeline.segments.windows(2) {
            assert_eq!(pair[1].start_us, pair[0].end_us());
        }
        assert_eq!(timeline.total_duration_us(), durations.iter().sum::<u64>());
    }

    #[test]
    fn keeps_input_order_for_every_permutation() {
        let probe = FixedProbe::new(&[("/a.mp4", SEC), ("/b.mp4", 2 * SEC), ("/c.mp4", 3 * SEC)]);
        let orders = [
            ["/a.mp4", "/b.mp4", "/c.mp4"],
            ["/a.mp4", "/c.mp4", "/b.mp4"],
            ["/b.mp4", "/a.mp4", "/c.mp4"],
            ["/b.mp4", "/c.mp4", "/a.mp4"],
            ["/c.mp4", "/a.mp4", "/b.mp4"],
            ["/c.mp4", "/b.mp4", "/a.mp4"],
        ];
        for order in orders {
            let sources = paths(&order);
            let timeline = layout(&sources, None, &probe).unwrap();
            let placed: Vec<PathBuf> = timeline.segments.iter().map(|s| s.source.clone()).collect();
            assert_eq!(placed, sources);
        }
    }

    #[test]
    fn zero_duration_clip_fails_the_job() {
        let probe = FixedProbe::new(&[("/a.mp4", 5 * SEC), ("/empty.mp4", 0)]);
        let err = layout(&paths(&["/a.mp4", "/empty.mp4"]), None, &probe).unwrap_err();
        match err {
            JobError::UnreadableMedia { path, .. } => assert_eq!(path, PathBuf::from("/empty.mp4")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unreadable_clip_fails_the_job() {
        let probe = FixedProbe::new(&[("/a.mp4", 5 * SEC)]);
        let err = layout(&paths(&["/a.mp4", "/broken.mp4"]), Some(SEC), &probe).unwrap_err();
        assert!(matches!(err, JobError::UnreadableMedia { .. }));
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let probe = FixedProbe::new(&[("/a.mp4", u64::MAX - 10), ("/b.mp4", 20)]);
        let err = layout(&paths(&["/a.mp4", "/b.mp4"]), None, &probe).unwrap_err();
        match err {
            JobError::UnreadableMedia { path, .. } => assert_eq!(path, PathBuf::from("/b.mp4")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn tiny_limit_never_rounds_to_zero() {
        assert_eq!(seconds_to_micros(3.0), 3 * SEC);
        assert_eq!(seconds_to_micros(1e-9), 1);
    }
}
