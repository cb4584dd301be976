use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use crate::error::{JobError, JobResult};

/// 支持导出的帧率
pub const SUPPORTED_FPS: [u32; 5] = [24, 25, 30, 50, 60];

/// job_id 的最大长度（同时作为草稿目录名）
const MAX_JOB_ID_LEN: usize = 128;

/// Windows 文件名不允许出现的字符
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// 画布宽高（请求原始值，允许非法值以便校验器给出明确错误）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasInput {
    pub width: Option<Value>,
    pub height: Option<Value>,
}

/// 拼接附加选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatOptions {
    /// 每个素材可用的最长秒数
    pub max_each_video_seconds: Option<Value>,
}

/// `POST /concat` 的请求体
///
/// 所有字段在反序列化阶段都是可选的，缺失字段由 [`validate`] 按优先级报告。
/// 数值字段保留原始 JSON 值，类型不对（如 `"fps": "30"`）同样交给校验器。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatRequest {
    /// 任务 ID，同时作为草稿名称
    pub job_id: Option<String>,
    /// 剪映草稿根目录的绝对路径
    pub drafts_root: Option<String>,
    /// 导出成品 MP4 的绝对路径
    pub output_path: Option<String>,
    pub canvas: Option<CanvasInput>,
    pub fps: Option<Value>,
    /// 待拼接视频的绝对路径列表，顺序即拼接顺序
    pub videos: Option<Vec<String>>,
    pub options: Option<ConcatOptions>,
}

/// 画布尺寸（已校验）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

/// 校验通过的拼接任务
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: String,
    pub drafts_root: PathBuf,
    pub output_path: PathBuf,
    pub canvas: Canvas,
    pub fps: u32,
    pub videos: Vec<PathBuf>,
    pub max_each_video_seconds: Option<f64>,
}

/// 校验请求，返回第一个不满足的约束
///
/// 顺序：job_id → drafts_root → output_path → fps → videos 非空 → 每个视频路径
/// → canvas → max_each_video_seconds。只做只读的 stat 调用。
pub fn validate(raw: &ConcatRequest) -> JobResult<JobRequest> {
    let job_id = validate_job_id(raw.job_id.as_deref())?;
    let drafts_root = validate_drafts_root(raw.drafts_root.as_deref())?;
    let output_path = validate_output_path(raw.output_path.as_deref())?;
    let fps = validate_fps(raw.fps.as_ref())?;
    let videos = validate_videos(raw.videos.as_deref(), &output_path)?;
    let canvas = validate_canvas(raw.canvas.as_ref())?;
    let max_each_video_seconds = validate_clip_limit(
        raw.options
            .as_ref()
            .and_then(|o| o.max_each_video_seconds.as_ref()),
    )?;

    Ok(JobRequest {
        job_id,
        drafts_root,
        output_path,
        canvas,
        fps,
        videos,
        max_each_video_seconds,
    })
}

fn validate_job_id(value: Option<&str>) -> JobResult<String> {
    let value = value
        .map(str::trim)
        .ok_or_else(|| JobError::validation("job_id is required"))?;

    if value.is_empty() {
        return Err(JobError::validation("job_id must not be empty"));
    }
    if value.chars().count() > MAX_JOB_ID_LEN {
        return Err(JobError::validation(format!(
            "job_id is longer than {} characters",
            MAX_JOB_ID_LEN
        )));
    }
    if value == "." || value == ".." {
        return Err(JobError::validation(format!("job_id is not a valid name: {}", value)));
    }
    if let Some(ch) = value
        .chars()
        .find(|c| INVALID_NAME_CHARS.contains(c) || c.is_control())
    {
        return Err(JobError::validation(format!(
            "job_id contains invalid character {:?}: {}",
            ch, value
        )));
    }

    Ok(value.to_string())
}

fn validate_drafts_root(value: Option<&str>) -> JobResult<PathBuf> {
    let path = required_absolute("drafts_root", value)?;

    let metadata = fs::metadata(&path).map_err(|_| {
        JobError::validation(format!("drafts_root does not exist: {}", path.display()))
    })?;
    if !metadata.is_dir() {
        return Err(JobError::validation(format!(
            "drafts_root is not a directory: {}",
            path.display()
        )));
    }
    // 只看只读属性；Windows 上目录的只读属性并不阻止写入，真正写不进去时在草稿阶段报 DraftWrite
    if metadata.permissions().readonly() {
        return Err(JobError::validation(format!(
            "drafts_root is not writable: {}",
            path.display()
        )));
    }

    Ok(path)
}

fn validate_output_path(value: Option<&str>) -> JobResult<PathBuf> {
    let path = required_absolute("output_path", value)?;

    let is_mp4 = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false);
    if !is_mp4 {
        return Err(JobError::validation(format!(
            "output_path must point to an .mp4 file: {}",
            path.display()
        )));
    }

    let parent_is_dir = path.parent().map(Path::is_dir).unwrap_or(false);
    if !parent_is_dir {
        return Err(JobError::validation(format!(
            "output_path parent directory does not exist: {}",
            path.display()
        )));
    }

    Ok(path)
}

fn validate_fps(value: Option<&Value>) -> JobResult<u32> {
    let fps = value.ok_or_else(|| JobError::validation("fps is required"))?;
    SUPPORTED_FPS
        .iter()
        .copied()
        .find(|supported| integer(fps) == Some(i64::from(*supported)))
        .ok_or_else(|| {
            JobError::validation(format!(
                "unsupported fps {}, expected one of {:?}",
                fps, SUPPORTED_FPS
            ))
        })
}

fn validate_videos(value: Option<&[String]>, output_path: &Path) -> JobResult<Vec<PathBuf>> {
    let videos = value.unwrap_or_default();
    if videos.is_empty() {
        return Err(JobError::validation("videos must not be empty"));
    }

    let videos = videos
        .iter()
        .map(|raw| {
            let path = PathBuf::from(raw);
            if !path.is_absolute() {
                return Err(JobError::validation(format!(
                    "video path must be absolute: {}",
                    path.display()
                )));
            }
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => Ok(path),
                Ok(_) => Err(JobError::validation(format!(
                    "video path is not a regular file: {}",
                    path.display()
                ))),
                Err(_) => Err(JobError::validation(format!(
                    "video file does not exist: {}",
                    path.display()
                ))),
            }
        })
        .collect::<JobResult<Vec<_>>>()?;

    // 导出前会删除已有的输出文件，不能让它指向某个素材
    if let Some(clash) = videos.iter().find(|v| same_file(v, output_path)) {
        return Err(JobError::validation(format!(
            "output_path must not be one of the videos: {}",
            clash.display()
        )));
    }

    Ok(videos)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// JSON 数值按整数读取，`30.0` 视为 30，其余类型返回 None
fn integer(value: &Value) -> Option<i64> {
    match value.as_i64() {
        Some(v) => Some(v),
        None => value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64),
    }
}

fn validate_canvas(value: Option<&CanvasInput>) -> JobResult<Canvas> {
    let canvas = value.ok_or_else(|| JobError::validation("canvas is required"))?;
    let dimension = |name: &str, v: Option<&Value>| -> JobResult<u32> {
        match v {
            Some(v) => match integer(v) {
                Some(n) if n > 0 && n <= i64::from(u32::MAX) => Ok(n as u32),
                _ => Err(JobError::validation(format!(
                    "canvas.{} must be a positive integer, got {}",
                    name, v
                ))),
            },
            None => Err(JobError::validation(format!("canvas.{} is required", name))),
        }
    };

    Ok(Canvas {
        width: dimension("width", canvas.width.as_ref())?,
        height: dimension("height", canvas.height.as_ref())?,
    })
}

fn validate_clip_limit(value: Option<&Value>) -> JobResult<Option<f64>> {
    match value {
        None => Ok(None),
        Some(raw) => match raw.as_f64() {
            Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(secs)),
            _ => Err(JobError::validation(format!(
                "options.max_each_video_seconds must be a positive number, got {}",
                raw
            ))),
        },
    }
}

fn required_absolute(field: &str, value: Option<&str>) -> JobResult<PathBuf> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| JobError::validation(format!("{} is required", field)))?;
    let path = PathBuf::from(value);
    if !path.is_absolute() {
        return Err(JobError::validation(format!(
            "{} must be an absolute path: {}",
            field,
            path.display()
        )));
    }
    Ok(path)
}
