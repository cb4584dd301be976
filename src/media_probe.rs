use ffmpeg_next as ffmpeg;
use anyhow::{Context, Result};
use std::path::Path;
use crate::timeline::SEC;

/// 素材的基本信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    /// 自然时长（微秒）
    pub duration_us: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaInfo {
    pub fn with_duration(duration_us: u64) -> Self {
        Self {
            duration_us,
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("cannot open media: {0}")]
    Open(String),
    #[error("no video stream found")]
    NoVideoStream,
    #[error("duration is unknown")]
    UnknownDuration,
}

/// 素材时长探测能力
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// 基于 FFmpeg 的素材探测器
pub struct FfmpegProbe;

impl FfmpegProbe {
    pub fn new() -> Result<Self> {
        ffmpeg::init().context("初始化 FFmpeg 失败")?;

        // 只保留错误级别日志，避免探测时刷屏
        unsafe {
            ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
        }

        Ok(Self)
    }
}

impl MediaProbe for FfmpegProbe {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let ictx = ffmpeg::format::input(path).map_err(|e| ProbeError::Open(e.to_string()))?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or(ProbeError::NoVideoStream)?;

        // 容器时长以 AV_TIME_BASE（微秒）为单位；缺失时退回到视频流自身的时长
        let container_duration = ictx.duration();
        let duration_us = if container_duration > 0 {
            rescale_to_micros(container_duration, 1, ffmpeg::ffi::AV_TIME_BASE as i64)
        } else {
            let time_base = video_stream.time_base();
            let stream_duration = video_stream.duration();
            if stream_duration <= 0 || time_base.denominator() <= 0 {
                return Err(ProbeError::UnknownDuration);
            }
            rescale_to_micros(
                stream_duration,
                time_base.numerator() as i64,
                time_base.denominator() as i64,
            )
        };

        let (width, height) =
            match ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
                .and_then(|ctx| ctx.decoder().video())
            {
                Ok(decoder) => (Some(decoder.width()), Some(decoder.height())),
                Err(_) => (None, None),
            };

        Ok(MediaInfo {
            duration_us,
            width,
            height,
        })
    }
}

/// 把 `value * num / den` 秒换算为微秒
fn rescale_to_micros(value: i64, num: i64, den: i64) -> u64 {
    let micros = value as i128 * num as i128 * SEC as i128 / den as i128;
    micros.clamp(0, u64::MAX as i128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescales_common_time_bases() {
        assert_eq!(rescale_to_micros(5_000_000, 1, 1_000_000), 5 * SEC);
        assert_eq!(rescale_to_micros(90_000, 1, 90_000), SEC);
        assert_eq!(rescale_to_micros(15_360, 1, 15_360), SEC);
        assert_eq!(rescale_to_micros(-1, 1, 1_000), 0);
    }
}
