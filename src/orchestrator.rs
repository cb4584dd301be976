use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use crate::controller::EditorController;
use crate::draft::build_draft;
use crate::error::{JobError, JobResult, Stage};
use crate::exporter::{ExportCoordinator, ExportSettings};
use crate::media_probe::MediaProbe;
use crate::request::{validate, ConcatRequest};
use crate::timeline::{layout, seconds_to_micros};

/// 单任务占位标记，同一时刻只允许一个任务驱动剪映
#[derive(Debug, Default)]
pub struct JobSlot {
    busy: AtomicBool,
}

/// 持有期间占住 [`JobSlot`]，drop 时释放（包括 panic 展开）
#[derive(Debug)]
pub struct JobSlotGuard<'a> {
    slot: &'a JobSlot,
}

impl JobSlot {
    pub fn try_acquire(&self) -> Option<JobSlotGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobSlotGuard { slot: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for JobSlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

/// 拼接成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatOutcome {
    pub job_id: String,
    pub draft_name: String,
    pub output_path: PathBuf,
}

/// 拼接失败：出错的阶段与诊断信息
#[derive(Debug)]
pub struct JobFailure {
    pub stage: Stage,
    pub error: JobError,
}

impl From<JobError> for JobFailure {
    fn from(error: JobError) -> Self {
        Self {
            stage: error.stage(),
            error,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.error)
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// 串起校验 → 排布 → 草稿 → 导出
pub struct JobOrchestrator {
    probe: Arc<dyn MediaProbe>,
    exporter: ExportCoordinator,
    slot: JobSlot,
}

impl JobOrchestrator {
    pub fn new(
        probe: Arc<dyn MediaProbe>,
        controller: Arc<dyn EditorController>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            probe,
            exporter: ExportCoordinator::new(controller, settings),
            slot: JobSlot::default(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// 执行一个拼接任务
    ///
    /// 已有任务在执行时立即返回 [`JobError::JobInProgress`]，不排队。
    /// 后续阶段失败时不会清理已写入的草稿，留给人工排查。
    pub fn run(&self, raw: &ConcatRequest) -> Result<ConcatOutcome, JobFailure> {
        let _guard = self.slot.try_acquire().ok_or_else(|| {
            warn!("已有任务在执行，拒绝新任务 {:?}", raw.job_id);
            JobFailure::from(JobError::JobInProgress)
        })?;

        let total_start = Instant::now();
        let result = self.run_stages(raw).map_err(JobFailure::from);
        match &result {
            Ok(outcome) => info!(
                "🎬 [任务] {} 完成，总耗时: {:.2}秒，输出: {}",
                outcome.job_id,
                total_start.elapsed().as_secs_f64(),
                outcome.output_path.display()
            ),
            Err(failure) => error!("❌ [任务] 失败 {}", failure),
        }
        result
    }

    fn run_stages(&self, raw: &ConcatRequest) -> JobResult<ConcatOutcome> {
        let job = validate(raw)?;
        info!(
            "🎬 [任务] {} 开始: {} 个素材，画布 {}x{}，{} fps",
            job.job_id,
            job.videos.len(),
            job.canvas.width,
            job.canvas.height,
            job.fps
        );

        let clip_limit = job.max_each_video_seconds.map(seconds_to_micros);
        let timeline = layout(&job.videos, clip_limit, self.probe.as_ref())?;

        let draft = build_draft(&job.drafts_root, &job.job_id, job.canvas, job.fps, &timeline)?;

        let output_path = self
            .exporter
            .export(draft.name(), &job.output_path, job.fps)?;

        Ok(ConcatOutcome {
            job_id: job.job_id.clone(),
            draft_name: draft.name().to_string(),
            output_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_exclusive_until_guard_drops() {
        let slot = JobSlot::default();
        let guard = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn slot_is_released_on_panic() {
        let slot = JobSlot::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = slot.try_acquire().unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!slot.is_busy());
    }

    #[test]
    fn failure_display_names_stage() {
        let failure = JobFailure::from(JobError::validation("fps is required"));
        assert_eq!(failure.stage, Stage::Validate);
        assert_eq!(failure.to_string(), "[validate] invalid request: fps is required");
    }
}
