//! Remote control command dispatch.
//!
//! Pure dispatch onto the engine's control surface; no job logic lives here.

use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::context::AppContext;

use super::protocol::{Request, Response};

pub struct MethodHandler {
    ctx: AppContext,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteParams {
    #[serde(default)]
    job_id: Option<Uuid>,
    /// 1-based position in the job list
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobParams {
    job_id: Uuid,
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let params = request.parameters.unwrap_or(Value::Null);

        match request.command.to_ascii_lowercase().as_str() {
            "list" => Response::success(self.ctx.engine.list_jobs()),
            "execute" => self.execute(params),
            "pause" => self.control(params, "paused", |engine, id| engine.pause_job(id)),
            "resume" => self.control(params, "resumed", |engine, id| engine.resume_job(id)),
            "stop" => self.control(params, "stopped", |engine, id| engine.stop_job(id)),
            "status" => Response::success(self.ctx.progress.get_all()),
            _ => Response::unknown_command(&request.command),
        }
    }

    fn execute(&self, params: Value) -> Response {
        let params: ExecuteParams = if params.is_null() {
            ExecuteParams::default()
        } else {
            match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => return Response::error(format!("Invalid parameters: {e}")),
            }
        };

        let engine = &self.ctx.engine;
        let started = match (params.job_id, params.index) {
            (Some(id), _) => engine.execute_job(id),
            (None, Some(0)) => return Response::error("index is 1-based"),
            (None, Some(index)) => engine.execute_by_index(index - 1),
            (None, None) => {
                let handle = engine.execute_all();
                return Response::ack(format!("Started {} job(s)", handle.job_ids().len()));
            }
        };

        match started {
            Ok(handle) => match handle.job_ids().first() {
                Some(id) => Response::success(json!({ "jobId": id })),
                None => Response::error("No job was started"),
            },
            Err(e) => Response::error(e.to_string()),
        }
    }

    fn control<F, T>(&self, params: Value, verb: &str, action: F) -> Response
    where
        F: FnOnce(&crate::core::Engine, Uuid) -> crate::EngineResult<T>,
    {
        let params: JobParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Response::error(format!("jobId is required: {e}")),
        };

        match action(&self.ctx.engine, params.job_id) {
            Ok(_) => Response::ack(format!("Job {} {}", params.job_id, verb)),
            Err(e) => Response::error(e.to_string()),
        }
    }
}
