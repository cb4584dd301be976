//! 剪映草稿的生成与落盘
//!
//! 草稿是 `drafts_root/<草稿名>/` 目录，包含 `draft_content.json`（画布、素材、轨道）
//! 和 `draft_meta_info.json`（剪映草稿列表显示用的元信息）。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;
use crate::error::{JobError, JobResult};
use crate::request::Canvas;
use crate::timeline::{Segment, Timeline, SEC};

pub const DRAFT_CONTENT_FILE: &str = "draft_content.json";
pub const DRAFT_META_FILE: &str = "draft_meta_info.json";

/// 主视频轨名称
pub const MAIN_TRACK: &str = "video_main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timerange {
    pub start: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    pub ratio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMaterial {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub material_name: String,
    pub duration: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Materials {
    pub videos: Vec<VideoMaterial>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSegment {
    pub id: String,
    pub material_id: String,
    pub source_timerange: Timerange,
    pub target_timerange: Timerange,
    pub speed: f64,
    pub volume: f64,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub segments: Vec<TrackSegment>,
}

/// `draft_content.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftContent {
    pub id: String,
    pub duration: u64,
    pub fps: f64,
    pub canvas_config: CanvasConfig,
    pub materials: Materials,
    pub tracks: Vec<Track>,
    pub create_time: i64,
    pub update_time: i64,
}

/// `draft_meta_info.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftMetaInfo {
    pub draft_id: String,
    pub draft_name: String,
    pub draft_fold_path: String,
    pub draft_root_path: String,
    pub tm_draft_create: i64,
    pub tm_draft_modified: i64,
    pub tm_duration: u64,
}

/// 草稿根目录
pub struct DraftFolder {
    root: PathBuf,
}

impl DraftFolder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn draft_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// 新建草稿目录，同名草稿已存在时报错，不会覆盖
    pub fn create_draft(&self, name: &str, canvas: Canvas, fps: u32) -> JobResult<Draft> {
        let dir = self.draft_path(name);
        fs::create_dir(&dir).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                JobError::DraftAlreadyExists(dir.clone())
            } else {
                JobError::DraftWrite {
                    path: dir.clone(),
                    source: e,
                }
            }
        })?;

        let now = Utc::now().timestamp_micros();
        Ok(Draft {
            name: name.to_string(),
            dir,
            root: self.root.clone(),
            content: DraftContent {
                id: new_id(),
                duration: 0,
                fps: f64::from(fps),
                canvas_config: CanvasConfig {
                    width: canvas.width,
                    height: canvas.height,
                    ratio: "original".to_string(),
                },
                materials: Materials::default(),
                tracks: Vec::new(),
                create_time: now / SEC as i64,
                update_time: now / SEC as i64,
            },
            created_at_us: now,
        })
    }
}

/// 内存中的草稿，调用 [`Draft::save`] 后写入磁盘
#[derive(Debug)]
pub struct Draft {
    name: String,
    dir: PathBuf,
    root: PathBuf,
    content: DraftContent,
    created_at_us: i64,
}

impl Draft {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn content(&self) -> &DraftContent {
        &self.content
    }

    /// 添加一条视频轨
    pub fn add_video_track(&mut self, name: &str) {
        self.content.tracks.push(Track {
            id: new_id(),
            kind: "video".to_string(),
            name: name.to_string(),
            segments: Vec::new(),
        });
    }

    /// 向指定视频轨追加片段，同一素材只登记一次
    pub fn add_segment(&mut self, segment: &Segment, track_name: &str) -> JobResult<()> {
        // 先确认轨道存在，失败时不留下孤立素材
        let track_index = self
            .content
            .tracks
            .iter()
            .position(|t| t.name == track_name)
            .ok_or_else(|| JobError::DraftWrite {
                path: self.dir.clone(),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("track {} does not exist", track_name),
                ),
            })?;
        let material_id = self.material_for(segment);

        self.content.tracks[track_index].segments.push(TrackSegment {
            id: new_id(),
            material_id,
            source_timerange: Timerange {
                start: segment.source_start_us,
                duration: segment.duration_us,
            },
            target_timerange: Timerange {
                start: segment.start_us,
                duration: segment.duration_us,
            },
            speed: 1.0,
            volume: 1.0,
            visible: true,
        });

        self.content.duration = self.content.duration.max(segment.end_us());
        Ok(())
    }

    fn material_for(&mut self, segment: &Segment) -> String {
        let path = segment.source.to_string_lossy().to_string();
        if let Some(existing) = self.content.materials.videos.iter().find(|m| m.path == path) {
            return existing.id.clone();
        }

        let material = VideoMaterial {
            id: new_id(),
            kind: "video".to_string(),
            material_name: segment
                .source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone()),
            path,
            duration: segment.media.duration_us,
            width: segment.media.width.unwrap_or(self.content.canvas_config.width),
            height: segment.media.height.unwrap_or(self.content.canvas_config.height),
        };
        let id = material.id.clone();
        self.content.materials.videos.push(material);
        id
    }

    /// 写入 `draft_content.json` 与 `draft_meta_info.json`
    pub fn save(&mut self) -> JobResult<()> {
        let now = Utc::now().timestamp_micros();
        self.content.update_time = now / SEC as i64;

        let meta = DraftMetaInfo {
            draft_id: self.content.id.clone(),
            draft_name: self.name.clone(),
            draft_fold_path: self.dir.to_string_lossy().to_string(),
            draft_root_path: self.root.to_string_lossy().to_string(),
            tm_draft_create: self.created_at_us,
            tm_draft_modified: now,
            tm_duration: self.content.duration,
        };

        self.write_json(DRAFT_CONTENT_FILE, &self.content)?;
        self.write_json(DRAFT_META_FILE, &meta)?;
        Ok(())
    }

    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> JobResult<()> {
        let path = self.dir.join(file_name);
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| JobError::DraftWrite {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        fs::write(&path, bytes).map_err(|e| {
            error!("写入草稿文件失败 {}: {}", path.display(), e);
            JobError::DraftWrite { path, source: e }
        })
    }
}

/// 把时间轴写成以 `job_id` 命名的新草稿
pub fn build_draft(
    drafts_root: &Path,
    job_id: &str,
    canvas: Canvas,
    fps: u32,
    timeline: &Timeline,
) -> JobResult<Draft> {
    let start = Instant::now();
    let folder = DraftFolder::new(drafts_root);
    let mut draft = folder.create_draft(job_id, canvas, fps)?;

    draft.add_video_track(MAIN_TRACK);
    for segment in &timeline.segments {
        draft.add_segment(segment, MAIN_TRACK)?;
    }
    draft.save()?;

    info!(
        "✅ [草稿] 草稿 {} 写入完成，总时长 {:.2}秒，耗时: {:.2}秒",
        job_id,
        draft.content().duration as f64 / SEC as f64,
        start.elapsed().as_secs_f64()
    );
    Ok(draft)
}

/// 读取已落盘的草稿内容
pub fn load_content(draft_dir: &Path) -> anyhow::Result<DraftContent> {
    use anyhow::Context;
    let path = draft_dir.join(DRAFT_CONTENT_FILE);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("读取草稿失败: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("解析草稿失败: {}", path.display()))
}

fn new_id() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_probe::MediaInfo;
    use tempfile::TempDir;

    fn segment(source: &str, start: u64, duration: u64) -> Segment {
        Segment {
            source: PathBuf::from(source),
            source_start_us: 0,
            duration_us: duration,
            start_us: start,
            media: MediaInfo {
                duration_us: duration * 2,
                width: Some(1920),
                height: None,
            },
        }
    }

    fn demo_timeline() -> Timeline {
        Timeline {
            segments: vec![
                segment("/clips/a.mp4", 0, 5 * SEC),
                segment("/clips/b.mp4", 5 * SEC, 8 * SEC),
            ],
        }
    }

    const CANVAS: Canvas = Canvas {
        width: 1080,
        height: 1920,
    };

    #[test]
    fn writes_single_track_in_order() {
        let root = TempDir::new().unwrap();
        let draft = build_draft(root.path(), "demo-job", CANVAS, 30, &demo_timeline()).unwrap();
        assert_eq!(draft.name(), "demo-job");
        assert_eq!(draft.dir(), root.path().join("demo-job"));

        let content = load_content(draft.dir()).unwrap();
        assert_eq!(content.tracks.len(), 1);
        assert_eq!(content.tracks[0].kind, "video");
        assert_eq!(content.duration, 13 * SEC);
        assert_eq!(content.fps, 30.0);
        assert_eq!(content.canvas_config.width, 1080);
        assert_eq!(content.canvas_config.height, 1920);

        let targets: Vec<Timerange> = content.tracks[0]
            .segments
            .iter()
            .map(|s| s.target_timerange)
            .collect();
        assert_eq!(
            targets,
            vec![
                Timerange { start: 0, duration: 5 * SEC },
                Timerange { start: 5 * SEC, duration: 8 * SEC },
            ]
        );

        let sources: Vec<&str> = content.tracks[0]
            .segments
            .iter()
            .map(|s| {
                content
                    .materials
                    .videos
                    .iter()
                    .find(|m| m.id == s.material_id)
                    .map(|m| m.path.as_str())
                    .unwrap()
            })
            .collect();
        assert_eq!(sources, vec!["/clips/a.mp4", "/clips/b.mp4"]);
        assert!(root.path().join("demo-job").join(DRAFT_META_FILE).is_file());
    }

    #[test]
    fn material_keeps_natural_duration_and_falls_back_to_canvas_size() {
        let root = TempDir::new().unwrap();
        let draft = build_draft(root.path(), "m", CANVAS, 25, &demo_timeline()).unwrap();
        let first = &draft.content().materials.videos[0];
        assert_eq!(first.duration, 10 * SEC);
        assert_eq!(first.width, 1920);
        assert_eq!(first.height, 1920);
        assert_eq!(first.material_name, "a.mp4");
    }

    #[test]
    fn repeated_source_shares_one_material() {
        let root = TempDir::new().unwrap();
        let timeline = Timeline {
            segments: vec![
                segment("/clips/a.mp4", 0, SEC),
                segment("/clips/a.mp4", SEC, SEC),
            ],
        };
        let draft = build_draft(root.path(), "twice", CANVAS, 30, &timeline).unwrap();
        assert_eq!(draft.content().materials.videos.len(), 1);
        assert_eq!(draft.content().tracks[0].segments.len(), 2);
    }

    #[test]
    fn refuses_to_overwrite_existing_draft() {
        let root = TempDir::new().unwrap();
        build_draft(root.path(), "demo-job", CANVAS, 30, &demo_timeline()).unwrap();
        let before = fs::read(root.path().join("demo-job").join(DRAFT_CONTENT_FILE)).unwrap();

        let err = build_draft(root.path(), "demo-job", CANVAS, 60, &demo_timeline()).unwrap_err();
        assert!(matches!(err, JobError::DraftAlreadyExists(_)));

        let after = fs::read(root.path().join("demo-job").join(DRAFT_CONTENT_FILE)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_track_is_an_error() {
        let root = TempDir::new().unwrap();
        let mut draft = DraftFolder::new(root.path())
            .create_draft("no-track", CANVAS, 30)
            .unwrap();
        let err = draft
            .add_segment(&segment("/clips/a.mp4", 0, SEC), MAIN_TRACK)
            .unwrap_err();
        assert!(matches!(err, JobError::DraftWrite { .. }));
        assert!(draft.content.materials.videos.is_empty());
    }
}
