pub mod error;
pub mod request;
pub mod media_probe;
pub mod timeline;
pub mod draft;
pub mod controller;
pub mod exporter;
pub mod orchestrator;
pub mod handler;
pub mod config;

pub use error::{JobError, JobResult, Stage};
pub use request::{ConcatRequest, JobRequest, Canvas, validate};
pub use media_probe::{MediaProbe, MediaInfo, FfmpegProbe, ProbeError};
pub use timeline::{Segment, Timeline, layout, SEC};
pub use draft::{Draft, DraftFolder, build_draft};
pub use controller::{EditorController, HelperController, ExportFramerate, ExportResolution, ExportProgress, ControllerError};
pub use exporter::{ExportCoordinator, ExportSettings, ExportState};
pub use orchestrator::{JobOrchestrator, ConcatOutcome, JobFailure};
pub use handler::{AppState, ConcatResponse};
pub use config::{ConfigLoader, ServiceConfig, PartialConfig};
