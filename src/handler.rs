use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use crate::orchestrator::{ConcatOutcome, JobOrchestrator};
use crate::request::ConcatRequest;

/// Handler 共享状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
}

/// `POST /concat` 的响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcatResponse {
    Success {
        ok: bool,
        job_id: String,
        draft_name: String,
        output_path: String,
    },
    Failure {
        ok: bool,
        error: String,
    },
}

impl ConcatResponse {
    pub fn success(outcome: ConcatOutcome) -> Self {
        ConcatResponse::Success {
            ok: true,
            job_id: outcome.job_id,
            draft_name: outcome.draft_name,
            output_path: outcome.output_path.to_string_lossy().to_string(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ConcatResponse::Failure {
            ok: false,
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ConcatResponse::Success { .. })
    }
}

/// 构建 HTTP 路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/concat", post(handle_concat))
        // 浏览器插件直接调用本地服务
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查 Handler
pub async fn health_check() -> ResponseJson<serde_json::Value> {
    ResponseJson(serde_json::json!({ "ok": true }))
}

/// 接收素材列表并发起拼接
///
/// 任务失败也返回 200 和 `{ok: false, error}`；只有执行线程崩溃时返回 500。
pub async fn handle_concat(
    State(state): State<AppState>,
    payload: Result<Json<ConcatRequest>, JsonRejection>,
) -> (StatusCode, ResponseJson<ConcatResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("无法解析 concat 请求: {}", rejection.body_text());
            return (
                StatusCode::OK,
                ResponseJson(ConcatResponse::failure(format!(
                    "invalid request body: {}",
                    rejection.body_text()
                ))),
            );
        }
    };

    info!("收到 concat 请求: job_id={:?}", request.job_id);

    let orchestrator = state.orchestrator.clone();
    let joined = tokio::task::spawn_blocking(move || orchestrator.run(&request)).await;

    match joined {
        Ok(Ok(outcome)) => (StatusCode::OK, ResponseJson(ConcatResponse::success(outcome))),
        Ok(Err(failure)) => (
            StatusCode::OK,
            ResponseJson(ConcatResponse::failure(failure.to_string())),
        ),
        Err(e) => {
            error!("处理 concat 请求时出现未捕获异常: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ResponseJson(ConcatResponse::failure("internal server error")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn success_serializes_wire_shape() {
        let response = ConcatResponse::success(ConcatOutcome {
            job_id: "demo-job".to_string(),
            draft_name: "demo-job".to_string(),
            output_path: PathBuf::from("/tmp/demo.mp4"),
        });
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "ok": true,
                "job_id": "demo-job",
                "draft_name": "demo-job",
                "output_path": "/tmp/demo.mp4"
            })
        );
    }

    #[test]
    fn failure_serializes_wire_shape() {
        let response = ConcatResponse::failure("boom");
        assert!(!response.is_ok());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "ok": false, "error": "boom" })
        );
    }
}
