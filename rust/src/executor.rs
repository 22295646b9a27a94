use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::{json, Map, Value};

use crate::error::ToolError;
use crate::tools::{validate_call, ToolRegistry, ValidatedCall};
use crate::upstream::{FaxApi, UpstreamJob};

/// Successful tool result: the human-readable summary plus the job record.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub job: UpstreamJob,
}

impl ToolOutput {
    /// MCP `tools/call` result body.
    pub fn to_call_result(&self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "structuredContent": self.job,
            "isError": false,
        })
    }
}

/// Runs validated tool calls against the fax service. Shared by every
/// transport behind an `Arc`.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    upstream: Arc<dyn FaxApi>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, upstream: Arc<dyn FaxApi>) -> Self {
        Self { registry, upstream }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Validate then execute. Nothing reaches the fax service unless the
    /// arguments pass validation.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolOutput, ToolError> {
        let call = self.prepare(name, arguments)?;
        self.execute(name, call).await
    }

    /// Validation half of `invoke`. Pure; no I/O.
    pub fn prepare(&self, name: &str, arguments: &Value) -> Result<ValidatedCall, ToolError> {
        tracing::info!(
            tool = name,
            arguments = %redact_arguments(arguments),
            "Invoking tool"
        );
        let validated = std::panic::catch_unwind(AssertUnwindSafe(|| {
            validate_call(&self.registry, name, arguments)
        }))
        .unwrap_or_else(|panic| Err(ToolError::Internal(panic_detail(panic.as_ref()))));
        if let Err(err) = &validated {
            log_failure(name, err, 0);
        }
        validated
    }

    /// Upstream half of `invoke`. Panics become `ToolError::Internal`.
    pub async fn execute(&self, name: &str, call: ValidatedCall) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();

        let result = AssertUnwindSafe(self.dispatch(call))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ToolError::Internal(panic_detail(panic.as_ref()))));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => tracing::info!(
                tool = name,
                job_id = %output.job.id,
                status = output.job.status.as_str(),
                elapsed_ms,
                "Tool call succeeded"
            ),
            Err(err) => log_failure(name, err, elapsed_ms),
        }
        result
    }

    async fn dispatch(&self, call: ValidatedCall) -> Result<ToolOutput, ToolError> {
        match call {
            ValidatedCall::SendFax(request) => {
                let recipient = request.to.clone();
                let file_name = request.file_name.clone();
                let job = self.upstream.create(request).await?;
                Ok(ToolOutput {
                    text: send_summary(&job, &recipient, &file_name),
                    job,
                })
            }
            ValidatedCall::GetFaxStatus { job_id } => {
                let job = self.upstream.get_status(&job_id).await?;
                Ok(ToolOutput {
                    text: status_summary(&job),
                    job,
                })
            }
        }
    }
}

fn log_failure(tool: &str, err: &ToolError, elapsed_ms: u64) {
    match err {
        ToolError::Internal(detail) => {
            tracing::error!(tool, elapsed_ms, "Tool call failed internally: {detail}")
        }
        err => tracing::warn!(
            tool,
            kind = err.kind().as_str(),
            elapsed_ms,
            "Tool call failed: {err}"
        ),
    }
}

fn send_summary(job: &UpstreamJob, recipient: &str, file_name: &str) -> String {
    let to = if job.to.is_empty() { recipient } else { &job.to };
    format!(
        "Fax queued successfully!\n\nJob ID: {id}\nRecipient: {to}\nFile: {file_name}\nStatus: {status}\n\n\
         Use get_fax_status with job ID '{id}' to check progress.",
        id = job.id,
        status = job.status.as_str(),
    )
}

fn status_summary(job: &UpstreamJob) -> String {
    let mut lines = vec![
        "Fax Job Status\n".to_string(),
        format!("Job ID: {}", job.id),
        format!("Status: {}", job.status.as_str()),
        format!("Recipient: {}", job.to),
    ];
    if let Some(pages) = job.pages.filter(|pages| *pages > 0) {
        lines.push(format!("Pages: {pages}"));
    }
    lines.push(format!("Created: {}", job.created_at.as_deref().unwrap_or("n/a")));
    lines.push(format!("Updated: {}", job.updated_at.as_deref().unwrap_or("n/a")));
    if let Some(error) = job.error.as_deref().filter(|error| !error.is_empty()) {
        lines.push(format!("Error: {error}"));
    }
    lines.join("\n")
}

/// Log-safe view of tool arguments: document content is replaced by its size.
pub fn redact_arguments(arguments: &Value) -> Value {
    let Value::Object(args) = arguments else {
        return arguments.clone();
    };
    let redacted = args
        .iter()
        .map(|(key, value)| {
            let shown = match (key.as_str(), value) {
                ("fileContent", Value::String(encoded)) => {
                    let decoded_estimate = encoded.trim_end_matches('=').len() * 3 / 4;
                    json!(format!(
                        "<{} base64 chars, ~{} bytes>",
                        encoded.len(),
                        decoded_estimate
                    ))
                }
                ("fileContent", _) => json!("<redacted>"),
                _ => value.clone(),
            };
            (key.clone(), shown)
        })
        .collect::<Map<_, _>>();
    Value::Object(redacted)
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("tool handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("tool handler panicked: {message}")
    } else {
        "tool handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, UpstreamFailure};
    use crate::upstream::{JobStatus, SendFaxRequest, UpstreamError};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubFaxApi {
        creates: AtomicUsize,
        lookups: AtomicUsize,
        last_request: Mutex<Option<SendFaxRequest>>,
        status_result: Option<Result<UpstreamJob, UpstreamError>>,
        panic_on_create: bool,
    }

    fn job(id: &str, status: JobStatus) -> UpstreamJob {
        UpstreamJob {
            id: id.to_string(),
            to: "+15551234567".to_string(),
            status,
            error: None,
            pages: None,
            created_at: Some("2024-01-01T00:00:00Z".to_string()),
            updated_at: Some("2024-01-01T00:00:05Z".to_string()),
        }
    }

    impl FaxApi for StubFaxApi {
        fn create(
            &self,
            request: SendFaxRequest,
        ) -> BoxFuture<'_, Result<UpstreamJob, UpstreamError>> {
            Box::pin(async move {
                if self.panic_on_create {
                    panic!("stub exploded");
                }
                self.creates.fetch_add(1, Ordering::SeqCst);
                *self.last_request.lock().expect("stub lock") = Some(request);
                Ok(job("job-1", JobStatus::Queued))
            })
        }

        fn get_status<'a>(
            &'a self,
            job_id: &'a str,
        ) -> BoxFuture<'a, Result<UpstreamJob, UpstreamError>> {
            Box::pin(async move {
                self.lookups.fetch_add(1, Ordering::SeqCst);
                self.status_result
                    .clone()
                    .unwrap_or_else(|| Ok(job(job_id, JobStatus::InProgress)))
            })
        }
    }

    fn executor(stub: Arc<StubFaxApi>) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(ToolRegistry::builtin().expect("builtin registry")),
            stub,
        )
    }

    #[tokio::test]
    async fn send_fax_posts_decoded_document_and_formats_summary() {
        let stub = Arc::new(StubFaxApi::default());
        let output = executor(stub.clone())
            .invoke(
                "send_fax",
                &json!({
                    "to": "+15551234567",
                    "fileContent": "SGVsbG8sIGZheCE=",
                    "fileName": "hello.txt"
                }),
            )
            .await
            .expect("send should succeed");

        assert_eq!(stub.creates.load(Ordering::SeqCst), 1);
        let sent = stub
            .last_request
            .lock()
            .expect("stub lock")
            .clone()
            .expect("request recorded");
        assert_eq!(sent.content, b"Hello, fax!");
        assert_eq!(output.job.id, "job-1");
        assert!(output.text.starts_with("Fax queued successfully!"));
        assert!(output.text.contains("File: hello.txt"));
        assert!(output.text.contains("job ID 'job-1'"));

        let rendered = output.to_call_result();
        assert_eq!(rendered["isError"], json!(false));
        assert_eq!(rendered["structuredContent"]["status"], json!("queued"));
    }

    #[tokio::test]
    async fn invalid_destination_never_reaches_upstream() {
        let stub = Arc::new(StubFaxApi::default());
        let err = executor(stub.clone())
            .invoke(
                "send_fax",
                &json!({
                    "to": "not-a-number",
                    "fileContent": "aGVsbG8=",
                    "fileName": "a.txt"
                }),
            )
            .await
            .expect_err("invalid destination");
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert_eq!(stub.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn status_not_found_surfaces_sub_kind() {
        let stub = Arc::new(StubFaxApi {
            status_result: Some(Err(UpstreamError::NotFound {
                status: 404,
                message: "Job not found".into(),
            })),
            ..Default::default()
        });
        let err = executor(stub)
            .invoke("get_fax_status", &json!({ "jobId": "missing" }))
            .await
            .expect_err("missing job");
        assert!(matches!(
            err,
            ToolError::Upstream {
                failure: UpstreamFailure::NotFound,
                status: Some(404),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn repeated_status_calls_are_idempotent() {
        let mut done = job("job-9", JobStatus::Success);
        done.pages = Some(3);
        let stub = Arc::new(StubFaxApi {
            status_result: Some(Ok(done)),
            ..Default::default()
        });
        let executor = executor(stub.clone());
        let args = json!({ "jobId": "job-9" });
        let first = executor.invoke("get_fax_status", &args).await.expect("first");
        let second = executor.invoke("get_fax_status", &args).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(stub.lookups.load(Ordering::SeqCst), 2);
        assert!(first.text.starts_with("Fax Job Status\n\nJob ID: job-9"));
        assert!(first.text.contains("Status: SUCCESS"));
        assert!(first.text.contains("Pages: 3"));
        assert!(!first.text.contains("Error:"));
    }

    #[tokio::test]
    async fn panic_in_handler_becomes_internal_error() {
        let stub = Arc::new(StubFaxApi {
            panic_on_create: true,
            ..Default::default()
        });
        let err = executor(stub)
            .invoke(
                "send_fax",
                &json!({
                    "to": "+15551234567",
                    "fileContent": "aGVsbG8=",
                    "fileName": "a.txt"
                }),
            )
            .await
            .expect_err("panic should be caught");
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(err.to_jsonrpc_error()["message"], json!("Internal error"));
    }

    #[test]
    fn redaction_hides_document_content() {
        let redacted = redact_arguments(&json!({
            "to": "+15551234567",
            "fileContent": "c2VjcmV0IGRvY3VtZW50",
            "fileName": "a.txt"
        }));
        let rendered = redacted.to_string();
        assert!(!rendered.contains("c2VjcmV0IGRvY3VtZW50"));
        assert!(rendered.contains("20 base64 chars"));
        assert_eq!(redacted["to"], json!("+15551234567"));
    }
}
