use std::path::PathBuf;
use std::time::Duration;

/// 任务失败时所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 任务准入（单任务锁）
    Admission,
    /// 请求校验
    Validate,
    /// 时间轴排布
    Layout,
    /// 草稿写入
    Draft,
    /// 剪映导出
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Admission => "admission",
            Stage::Validate => "validate",
            Stage::Layout => "layout",
            Stage::Draft => "draft",
            Stage::Export => "export",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 拼接任务的错误分类
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("cannot read media duration of {path}: {reason}")]
    UnreadableMedia { path: PathBuf, reason: String },

    #[error("draft already exists: {0}")]
    DraftAlreadyExists(PathBuf),

    #[error("failed to write draft {path}: {source}")]
    DraftWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("editor controller unavailable: {0}")]
    ControllerUnavailable(String),

    #[error("unsupported export fps {0}, expected one of 24/25/30/50/60")]
    UnsupportedFps(u32),

    #[error("export did not finish within {}s (last confirmed state: {last_state})", .waited.as_secs())]
    ExportTimeout { waited: Duration, last_state: String },

    #[error("export failed (last confirmed state: {last_state}): {reason}")]
    ExportRejected { last_state: String, reason: String },

    #[error("editor reported export finished but output is missing or empty: {0}")]
    OutputMissing(PathBuf),

    #[error("another job is in progress, wait for it to finish")]
    JobInProgress,
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// 错误所属的流水线阶段
    pub fn stage(&self) -> Stage {
        match self {
            JobError::JobInProgress => Stage::Admission,
            JobError::Validation(_) => Stage::Validate,
            JobError::UnreadableMedia { .. } => Stage::Layout,
            JobError::DraftAlreadyExists(_) | JobError::DraftWrite { .. } => Stage::Draft,
            JobError::ControllerUnavailable(_)
            | JobError::UnsupportedFps(_)
            | JobError::ExportTimeout { .. }
            | JobError::ExportRejected { .. }
            | JobError::OutputMissing(_) => Stage::Export,
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;
