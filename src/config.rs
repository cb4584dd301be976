use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use crate::controller::{
    EditorController, ExportResolution, HelperController, UnconfiguredController,
    DEFAULT_STEP_TIMEOUT,
};
use crate::exporter::ExportSettings;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_EXPORT_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const CONFIG_FILE_NAME: &str = "video-concat.ini";

/// 服务配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP 监听地址
    pub bind: String,
    /// 剪映自动化助手程序（未设置时导出会以“控制器不可用”失败）
    pub controller_command: Option<PathBuf>,
    /// 每次调用助手时放在子命令之前的参数
    pub controller_args: Vec<String>,
    /// 单次调用助手的超时（秒），超时的助手进程会被终止
    pub step_timeout_secs: u64,
    /// 导出分辨率
    pub export_resolution: ExportResolution,
    /// 等待导出完成的超时（秒）
    pub export_timeout_secs: u64,
    /// 导出状态轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        PartialConfig::default().resolve()
    }
}

impl ServiceConfig {
    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            resolution: self.export_resolution,
            timeout: Duration::from_secs(self.export_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    /// 根据配置创建剪映控制器
    pub fn controller(&self) -> Arc<dyn EditorController> {
        match &self.controller_command {
            Some(program) => Arc::new(
                HelperController::new(program.clone(), self.controller_args.clone())
                    .with_step_timeout(Duration::from_secs(self.step_timeout_secs.max(1))),
            ),
            None => Arc::new(UnconfiguredController),
        }
    }
}

/// 某一个来源（命令行、环境变量、配置文件）提供的配置，未提供的字段为 None
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub bind: Option<String>,
    pub controller_command: Option<PathBuf>,
    pub controller_args: Option<Vec<String>>,
    pub step_timeout_secs: Option<u64>,
    pub export_resolution: Option<ExportResolution>,
    pub export_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl PartialConfig {
    /// 用 `lower` 补齐自己没有的字段
    pub fn or(self, lower: PartialConfig) -> PartialConfig {
        PartialConfig {
            bind: self.bind.or(lower.bind),
            controller_command: self.controller_command.or(lower.controller_command),
            controller_args: self.controller_args.or(lower.controller_args),
            step_timeout_secs: self.step_timeout_secs.or(lower.step_timeout_secs),
            export_resolution: self.export_resolution.or(lower.export_resolution),
            export_timeout_secs: self.export_timeout_secs.or(lower.export_timeout_secs),
            poll_interval_ms: self.poll_interval_ms.or(lower.poll_interval_ms),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    /// 缺失字段使用默认值
    pub fn resolve(self) -> ServiceConfig {
        ServiceConfig {
            bind: self.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            controller_command: self.controller_command,
            controller_args: self.controller_args.unwrap_or_default(),
            step_timeout_secs: self
                .step_timeout_secs
                .unwrap_or(DEFAULT_STEP_TIMEOUT.as_secs()),
            export_resolution: self.export_resolution.unwrap_or_default(),
            export_timeout_secs: self.export_timeout_secs.unwrap_or(DEFAULT_EXPORT_TIMEOUT_SECS),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
        }
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(config_file: Option<&Path>, cli: PartialConfig) -> Result<ServiceConfig> {
        // 显式指定的配置文件必须能读取；默认位置找不到则忽略
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };

        Ok(cli.or(Self::load_from_env()).or(file_config).resolve())
    }

    /// 从环境变量加载配置
    fn load_from_env() -> PartialConfig {
        PartialConfig {
            bind: env::var("VIDEO_CONCAT_BIND").ok(),
            controller_command: env::var_os("VIDEO_CONCAT_CONTROLLER")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            controller_args: env::var("VIDEO_CONCAT_CONTROLLER_ARGS")
                .ok()
                .map(|v| split_args(&v)),
            step_timeout_secs: env::var("VIDEO_CONCAT_STEP_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
            export_resolution: env::var("VIDEO_CONCAT_RESOLUTION")
                .ok()
                .and_then(|v| v.parse().ok()),
            export_timeout_secs: env::var("VIDEO_CONCAT_EXPORT_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
            poll_interval_ms: env::var("VIDEO_CONCAT_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok()),
            log_level: env::var("LOG_LEVEL").ok(),
        }
    }

    /// 从INI配置文件加载配置
    pub fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = configparser::ini::Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 先读具体的节，没有则退回 [DEFAULT]
        let get = |section: &str, key: &str| {
            config_parser
                .get(section, key)
                .or_else(|| config_parser.get("DEFAULT", key))
                .filter(|v| !v.trim().is_empty())
        };

        let export_resolution = match get("export", "resolution") {
            Some(v) => Some(v.parse::<ExportResolution>().map_err(|e| {
                anyhow::anyhow!("配置文件 {} 中的分辨率无效: {}", config_path.display(), e)
            })?),
            None => None,
        };

        Ok(PartialConfig {
            bind: get("video_concat", "bind"),
            controller_command: get("controller", "command").map(PathBuf::from),
            controller_args: get("controller", "args").map(|v| split_args(&v)),
            step_timeout_secs: get("controller", "step_timeout_secs").and_then(|v| v.parse().ok()),
            export_resolution,
            export_timeout_secs: get("export", "timeout_secs").and_then(|v| v.parse().ok()),
            poll_interval_ms: get("export", "poll_interval_ms").and_then(|v| v.parse().ok()),
            log_level: get("logging", "level"),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        let mut candidates = vec![
            // 1. 当前目录的 video-concat.ini
            PathBuf::from(CONFIG_FILE_NAME),
            // 2. 当前目录的 .video-concat.ini
            PathBuf::from(format!(".{}", CONFIG_FILE_NAME)),
        ];
        // 3. 用户主目录的 .video-concat.ini
        if let Some(home) = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
            candidates.push(PathBuf::from(home).join(format!(".{}", CONFIG_FILE_NAME)));
        }
        // 4. /etc/video-concat.ini (Linux/macOS)
        candidates.push(PathBuf::from("/etc").join(CONFIG_FILE_NAME));

        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load_from_file(path),
            None => Err(anyhow::anyhow!("未找到配置文件")),
        }
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let mut config_parser = configparser::ini::Ini::new();
        config_parser.set("video_concat", "bind", Some(DEFAULT_BIND.to_string()));
        config_parser.set("controller", "command", Some("".to_string()));
        config_parser.set("controller", "args", Some("".to_string()));
        config_parser.set(
            "controller",
            "step_timeout_secs",
            Some(DEFAULT_STEP_TIMEOUT.as_secs().to_string()),
        );
        config_parser.set(
            "export",
            "resolution",
            Some(ExportResolution::default().to_string()),
        );
        config_parser.set(
            "export",
            "timeout_secs",
            Some(DEFAULT_EXPORT_TIMEOUT_SECS.to_string()),
        );
        config_parser.set(
            "export",
            "poll_interval_ms",
            Some(DEFAULT_POLL_INTERVAL_MS.to_string()),
        );
        config_parser.set("logging", "level", Some("info".to_string()));

        config_parser
            .write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_bind_locally_and_export_1080p() {
        let config = ServiceConfig::default();
        assert_eq!(config.bind, "127.0.0.1:8787");
        assert_eq!(config.export_resolution, ExportResolution::Res1080P);
        assert_eq!(config.export_timeout_secs, 1800);
        assert!(config.controller_command.is_none());
        assert_eq!(config.export_settings().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn higher_source_wins() {
        let cli = PartialConfig {
            bind: Some("0.0.0.0:9000".to_string()),
            ..Default::default()
        };
        let env = PartialConfig {
            bind: Some("127.0.0.1:1".to_string()),
            export_timeout_secs: Some(60),
            ..Default::default()
        };
        let file = PartialConfig {
            export_timeout_secs: Some(120),
            poll_interval_ms: Some(250),
            ..Default::default()
        };

        let config = cli.or(env).or(file).resolve();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.export_timeout_secs, 60);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn default_file_round_trips_through_loader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("video-concat.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let partial = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(partial.bind.as_deref(), Some(DEFAULT_BIND));
        assert!(partial.controller_command.is_none());
        assert_eq!(partial.export_resolution, Some(ExportResolution::Res1080P));
        assert_eq!(partial.export_timeout_secs, Some(1800));
        assert_eq!(partial.step_timeout_secs, Some(60));
    }

    #[test]
    fn reads_controller_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.ini");
        fs::write(
            &path,
            "[controller]\ncommand = C:/tools/jy-helper.exe\nargs = --screen 0\nstep_timeout_secs = 15\n\n[export]\nresolution = 4K\n",
        )
        .unwrap();

        let partial = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(
            partial.controller_command,
            Some(PathBuf::from("C:/tools/jy-helper.exe"))
        );
        assert_eq!(
            partial.controller_args,
            Some(vec!["--screen".to_string(), "0".to_string()])
        );
        assert_eq!(partial.step_timeout_secs, Some(15));
        assert_eq!(partial.export_resolution, Some(ExportResolution::Res4K));
    }

    #[test]
    fn invalid_resolution_in_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.ini");
        fs::write(&path, "[export]\nresolution = 8k\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(ConfigLoader::load_config(
            Some(&dir.path().join("nope.ini")),
            PartialConfig::default()
        )
        .is_err());
    }
}
