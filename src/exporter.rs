use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use crate::controller::{
    ControllerError, EditorController, ExportFramerate, ExportProgress, ExportResolution,
};
use crate::error::{JobError, JobResult};

/// 导出握手的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    WindowFocused,
    ConfigSet {
        resolution: ExportResolution,
        framerate: ExportFramerate,
    },
    ExportTriggered,
    ExportConfirmed,
    ExportFailed,
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportState::Idle => f.write_str("Idle"),
            ExportState::WindowFocused => f.write_str("WindowFocused"),
            ExportState::ConfigSet {
                resolution,
                framerate,
            } => write!(f, "ConfigSet({}, {})", resolution, framerate),
            ExportState::ExportTriggered => f.write_str("ExportTriggered"),
            ExportState::ExportConfirmed => f.write_str("ExportConfirmed"),
            ExportState::ExportFailed => f.write_str("ExportFailed"),
        }
    }
}

/// 导出参数
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub resolution: ExportResolution,
    /// 等待剪映导出完成的最长时间
    pub timeout: Duration,
    /// 两次状态查询之间的间隔
    pub poll_interval: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            resolution: ExportResolution::Res1080P,
            timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// 驱动剪映完成一次导出
///
/// 握手顺序固定：聚焦窗口 → 设置分辨率/帧率 → 触发导出 → 轮询完成。
/// 任何一步失败都直接结束并报告最后确认的状态，不做重试。
pub struct ExportCoordinator {
    controller: Arc<dyn EditorController>,
    settings: ExportSettings,
}

impl ExportCoordinator {
    pub fn new(controller: Arc<dyn EditorController>, settings: ExportSettings) -> Self {
        Self {
            controller,
            settings,
        }
    }

    pub fn export(&self, draft_name: &str, output_path: &Path, fps: u32) -> JobResult<PathBuf> {
        let mut state = ExportState::Idle;
        let result = self.run_handshake(&mut state, draft_name, output_path, fps);

        match &result {
            Ok(_) => info!("✅ [导出] {} 导出完成: {}", draft_name, output_path.display()),
            Err(e) => {
                warn!(
                    "❌ [导出] {} 导出失败，最后确认的状态 {}: {}",
                    draft_name, state, e
                );
                transition(&mut state, ExportState::ExportFailed);
            }
        }
        result
    }

    fn run_handshake(
        &self,
        state: &mut ExportState,
        draft_name: &str,
        output_path: &Path,
        fps: u32,
    ) -> JobResult<PathBuf> {
        self.controller.focus_window().map_err(|e| match e {
            ControllerError::TimedOut { .. } => rejected(*state, controller_reason(e)),
            e => JobError::ControllerUnavailable(controller_reason(e)),
        })?;
        transition(state, ExportState::WindowFocused);

        let framerate = ExportFramerate::from_fps(fps).ok_or(JobError::UnsupportedFps(fps))?;
        let resolution = self.settings.resolution;
        self.controller
            .configure_export(resolution, framerate)
            .map_err(|e| rejected(*state, controller_reason(e)))?;
        transition(
            state,
            ExportState::ConfigSet {
                resolution,
                framerate,
            },
        );

        // 先删掉旧文件，导出后的完整性检查才有意义
        if output_path.exists() {
            fs::remove_file(output_path).map_err(|e| {
                rejected(
                    *state,
                    format!("cannot remove stale output {}: {}", output_path.display(), e),
                )
            })?;
        }
        self.controller
            .start_export(draft_name, output_path)
            .map_err(|e| rejected(*state, controller_reason(e)))?;
        transition(state, ExportState::ExportTriggered);

        self.wait_for_completion(*state)?;
        verify_output(output_path)?;
        transition(state, ExportState::ExportConfirmed);

        Ok(output_path.to_path_buf())
    }

    fn wait_for_completion(&self, state: ExportState) -> JobResult<()> {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;

        loop {
            match self.controller.poll_export() {
                Ok(ExportProgress::Finished) => return Ok(()),
                Ok(ExportProgress::Failed(reason)) => return Err(rejected(state, reason)),
                Ok(ExportProgress::Running) => {}
                // 状态查询本身卡住，等同于等不到导出完成
                Err(ControllerError::TimedOut { .. }) => {
                    return Err(JobError::ExportTimeout {
                        waited: started.elapsed(),
                        last_state: state.to_string(),
                    })
                }
                Err(e) => return Err(rejected(state, controller_reason(e))),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(JobError::ExportTimeout {
                    waited: started.elapsed(),
                    last_state: state.to_string(),
                });
            }
            thread::sleep(self.settings.poll_interval.min(deadline - now));
        }
    }
}

fn transition(state: &mut ExportState, next: ExportState) {
    info!("[导出] {} → {}", state, next);
    *state = next;
}

fn rejected(state: ExportState, reason: String) -> JobError {
    JobError::ExportRejected {
        last_state: state.to_string(),
        reason,
    }
}

fn controller_reason(err: ControllerError) -> String {
    err.to_string()
}

/// 剪映报告完成后，确认输出文件确实存在且非空
fn verify_output(output_path: &Path) -> JobResult<()> {
    match fs::metadata(output_path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(JobError::OutputMissing(output_path.to_path_buf())),
    }
}
