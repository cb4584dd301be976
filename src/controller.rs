//! 剪映窗口自动化能力
//!
//! 导出协调器只通过 [`EditorController`] 这四个动作和剪映交互：聚焦窗口、设置导出参数、
//! 触发导出、查询导出状态。实际的窗口操作由外部自动化助手程序完成。

use std::fmt;
use std::path::{Path, PathBuf};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 剪映导出分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResolution {
    Res480P,
    Res720P,
    Res1080P,
    Res2K,
    Res4K,
}

impl ExportResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportResolution::Res480P => "480p",
            ExportResolution::Res720P => "720p",
            ExportResolution::Res1080P => "1080p",
            ExportResolution::Res2K => "2k",
            ExportResolution::Res4K => "4k",
        }
    }
}

impl Default for ExportResolution {
    fn default() -> Self {
        ExportResolution::Res1080P
    }
}

impl fmt::Display for ExportResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "480p" => Ok(ExportResolution::Res480P),
            "720p" => Ok(ExportResolution::Res720P),
            "1080p" => Ok(ExportResolution::Res1080P),
            "2k" => Ok(ExportResolution::Res2K),
            "4k" => Ok(ExportResolution::Res4K),
            other => Err(format!("unknown export resolution: {}", other)),
        }
    }
}

/// 剪映导出帧率选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFramerate {
    Fr24,
    Fr25,
    Fr30,
    Fr50,
    Fr60,
}

impl ExportFramerate {
    /// 把帧率映射到剪映支持的选项
    pub fn from_fps(fps: u32) -> Option<Self> {
        match fps {
            24 => Some(ExportFramerate::Fr24),
            25 => Some(ExportFramerate::Fr25),
            30 => Some(ExportFramerate::Fr30),
            50 => Some(ExportFramerate::Fr50),
            60 => Some(ExportFramerate::Fr60),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFramerate::Fr24 => "24fps",
            ExportFramerate::Fr25 => "25fps",
            ExportFramerate::Fr30 => "30fps",
            ExportFramerate::Fr50 => "50fps",
            ExportFramerate::Fr60 => "60fps",
        }
    }
}

impl fmt::Display for ExportFramerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次状态查询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportProgress {
    Running,
    Finished,
    /// 剪映明确报告失败，或出现阻塞导出的弹窗
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("editor window not found: {0}")]
    WindowNotFound(String),
    /// 单个动作在限定时间内没有返回
    #[error("{step} did not return within {waited:?}")]
    TimedOut { step: String, waited: Duration },
    #[error("{0}")]
    Fault(String),
}

/// 剪映窗口自动化能力
pub trait EditorController: Send + Sync {
    fn focus_window(&self) -> Result<(), ControllerError>;

    fn configure_export(
        &self,
        resolution: ExportResolution,
        framerate: ExportFramerate,
    ) -> Result<(), ControllerError>;

    fn start_export(&self, draft_name: &str, output_path: &Path) -> Result<(), ControllerError>;

    fn poll_export(&self) -> Result<ExportProgress, ControllerError>;
}

/// 未配置自动化助手时使用，所有导出都会以“控制器不可用”失败
pub struct UnconfiguredController;

impl EditorController for UnconfiguredController {
    fn focus_window(&self) -> Result<(), ControllerError> {
        Err(ControllerError::WindowNotFound(
            "no controller_command configured".to_string(),
        ))
    }

    fn configure_export(
        &self,
        _resolution: ExportResolution,
        _framerate: ExportFramerate,
    ) -> Result<(), ControllerError> {
        Err(ControllerError::Fault("no controller_command configured".to_string()))
    }

    fn start_export(&self, _draft_name: &str, _output_path: &Path) -> Result<(), ControllerError> {
        Err(ControllerError::Fault("no controller_command configured".to_string()))
    }

    fn poll_export(&self) -> Result<ExportProgress, ControllerError> {
        Err(ControllerError::Fault("no controller_command configured".to_string()))
    }
}

/// 助手程序找不到剪映窗口时使用的退出码
pub const EXIT_WINDOW_NOT_FOUND: i32 = 2;

/// 通过外部自动化助手程序驱动剪映
///
/// 每个动作是一次子进程调用：
///
/// ```text
/// <helper> focus
/// <helper> configure --resolution 1080p --framerate 30fps
/// <helper> export --draft <草稿名> --output <输出路径>
/// <helper> status        # stdout: running | done | failed: <原因>
/// ```
///
/// 退出码 0 表示成功，[`EXIT_WINDOW_NOT_FOUND`] 表示没有找到剪映窗口，其余视为故障。
/// 超过 `step_timeout` 仍未退出的调用会被杀掉，并报告 [`ControllerError::TimedOut`]。
pub struct HelperController {
    program: PathBuf,
    base_args: Vec<String>,
    step_timeout: Duration,
}

/// 单次助手调用的默认时限
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct HelperOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl HelperController {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    fn run(&self, args: &[&str]) -> Result<HelperOutput, ControllerError> {
        debug!("调用自动化助手: {} {:?}", self.program.display(), args);
        let step = args.first().copied().unwrap_or_default();

        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ControllerError::Fault(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        // 输出管道在后台读取，避免助手写满管道后卡住
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.step_timeout => {
                    warn!("自动化助手 `{}` 超过 {:?} 未返回，终止进程", step, self.step_timeout);
                    kill(&mut child);
                    return Err(ControllerError::TimedOut {
                        step: step.to_string(),
                        waited: started.elapsed(),
                    });
                }
                Ok(None) => thread::sleep(CHILD_POLL_INTERVAL),
                Err(e) => {
                    kill(&mut child);
                    return Err(ControllerError::Fault(format!(
                        "failed to wait for {}: {}",
                        self.program.display(),
                        e
                    )));
                }
            }
        };

        Ok(HelperOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            code: status.code(),
        })
    }

    fn run_checked(&self, args: &[&str]) -> Result<HelperOutput, ControllerError> {
        let output = self.run(args)?;
        match output.code {
            Some(0) => Ok(output),
            Some(EXIT_WINDOW_NOT_FOUND) => Err(ControllerError::WindowNotFound(
                describe(&output, "editor window not found"),
            )),
            code => Err(ControllerError::Fault(format!(
                "helper `{}` exited with {:?}: {}",
                args.first().copied().unwrap_or_default(),
                code,
                describe(&output, "no output")
            ))),
        }
    }
}

impl EditorController for HelperController {
    fn focus_window(&self) -> Result<(), ControllerError> {
        self.run_checked(&["focus"]).map(|_| ())
    }

    fn configure_export(
        &self,
        resolution: ExportResolution,
        framerate: ExportFramerate,
    ) -> Result<(), ControllerError> {
        self.run_checked(&[
            "configure",
            "--resolution",
            resolution.as_str(),
            "--framerate",
            framerate.as_str(),
        ])
        .map(|_| ())
    }

    fn start_export(&self, draft_name: &str, output_path: &Path) -> Result<(), ControllerError> {
        let output = output_path.to_string_lossy();
        self.run_checked(&["export", "--draft", draft_name, "--output", &*output])
            .map(|_| ())
    }

    fn poll_export(&self) -> Result<ExportProgress, ControllerError> {
        let output = self.run_checked(&["status"])?;
        parse_status(&output.stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).trim().to_string()
        })
    })
}

fn collect(reader: Option<thread::JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn describe(output: &HelperOutput, fallback: &str) -> String {
    if !output.stderr.is_empty() {
        output.stderr.clone()
    } else if !output.stdout.is_empty() {
        output.stdout.clone()
    } else {
        fallback.to_string()
    }
}

/// 解析 `status` 输出的第一行
fn parse_status(stdout: &str) -> Result<ExportProgress, ControllerError> {
    let line = stdout.lines().next().unwrap_or_default().trim();
    let (state, detail) = match line.split_once(':') {
        Some((state, detail)) => (state.trim(), detail.trim()),
        None => (line, ""),
    };

    match state.to_ascii_lowercase().as_str() {
        "running" | "exporting" => Ok(ExportProgress::Running),
        "done" | "finished" => Ok(ExportProgress::Finished),
        "failed" | "blocked" => Ok(ExportProgress::Failed(if detail.is_empty() {
            state.to_string()
        } else {
            detail.to_string()
        })),
        _ => Err(ControllerError::Fault(format!(
            "unrecognised helper status: {:?}",
            line
        ))),
    }
}
