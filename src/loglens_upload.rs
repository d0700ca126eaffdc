//! Upload client: hands a local log file to the server, which parses it and
//! broadcasts the resulting records over the stream.

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::loglens_view::Viewer;

pub const DEFAULT_UPLOAD_PATH: &str = "/upload";
pub const UPLOAD_FIELD: &str = "logfile";
pub const PROCESSING_NOTICE: &str = "Processing log file...";

const ERROR_BODY_LIMIT: usize = 512;

/// Successful response body of the upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UploadAck {
    pub lines_processed: u64,
}

impl UploadAck {
    pub fn notice(&self) -> String {
        format!("{} lines processed. Waiting for logs...", self.lines_processed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

impl UploadError {
    pub fn notice(&self) -> String {
        format!("Error processing file: {self}")
    }
}

pub fn outcome_notice(result: &Result<UploadAck, UploadError>) -> String {
    match result {
        Ok(ack) => ack.notice(),
        Err(err) => err.notice(),
    }
}

/// Picks the file to send from a submission. Only the first one is uploaded.
pub fn first_file(files: &[PathBuf]) -> Option<&Path> {
    if files.len() > 1 {
        warn!(ignored = files.len() - 1, "multiple files submitted; uploading the first");
    }
    files.first().map(PathBuf::as_path)
}

/// Clears the viewer ahead of a new upload and shows the progress notice.
pub fn begin_upload(viewer: &mut Viewer) {
    viewer.reset();
    viewer.set_notice(PROCESSING_NOTICE);
}

#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpUploader {
    pub fn new(origin: &Url) -> Self {
        let mut endpoint = origin.clone();
        endpoint.set_path(DEFAULT_UPLOAD_PATH);
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        Self { client: reqwest::Client::new(), endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn upload(&self, path: &Path) -> Result<UploadAck, UploadError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| UploadError::ReadFile { path: path.to_path_buf(), source })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| UPLOAD_FIELD.to_string());
        let size = bytes.len();

        let form = Form::new().part(UPLOAD_FIELD, Part::bytes(bytes).file_name(file_name.clone()));
        info!(endpoint = %self.endpoint, file = %file_name, size, "uploading log file");

        let response = self.client.post(self.endpoint.clone()).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::Status { status, body: truncate(body, ERROR_BODY_LIMIT) });
        }

        let ack: UploadAck = serde_json::from_str(&body)?;
        info!(lines = ack.lines_processed, "upload acknowledged");
        Ok(ack)
    }
}

/// Runs each requested upload concurrently and reports every outcome through
/// `notify` as it completes. Stops when the request channel closes.
pub async fn run_upload_worker<F>(
    uploader: HttpUploader,
    mut requests: mpsc::UnboundedReceiver<PathBuf>,
    notify: F,
) where
    F: Fn(String) -> bool + Clone + Send + 'static,
{
    while let Some(path) = requests.recv().await {
        let uploader = uploader.clone();
        let notify = notify.clone();
        tokio::spawn(async move {
            let result = uploader.upload(&path).await;
            if let Err(err) = &result {
                warn!(error = %err, path = %path.display(), "upload failed");
            }
            if !notify(outcome_notice(&result)) {
                warn!("upload notice dropped: receiver closed");
            }
        });
    }
}

fn truncate(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("...");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loglens_core::Record;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(0, "0 lines processed. Waiting for logs...")]
    #[case(3, "3 lines processed. Waiting for logs...")]
    #[case(1200, "1200 lines processed. Waiting for logs...")]
    fn ack_notice_reports_line_count(#[case] lines: u64, #[case] expected: &str) {
        assert_eq!(UploadAck { lines_processed: lines }.notice(), expected);
    }

    #[test]
    fn ack_parses_from_response_body() {
        let ack: UploadAck = serde_json::from_str(r#"{"lines_processed": 42}"#).unwrap();
        assert_eq!(ack.lines_processed, 42);
        assert!(serde_json::from_str::<UploadAck>(r#"{"lines": 1}"#).is_err());
    }

    #[test]
    fn error_notice_is_prefixed() {
        let err = UploadError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "parser crashed".to_string(),
        };
        assert_eq!(
            err.notice(),
            "Error processing file: server responded with 500 Internal Server Error: parser crashed"
        );
    }

    #[test]
    fn first_file_ignores_the_rest() {
        let files = vec![PathBuf::from("a.log"), PathBuf::from("b.log")];
        assert_eq!(first_file(&files), Some(Path::new("a.log")));
        assert_eq!(first_file(&[]), None);
    }

    #[test]
    fn begin_upload_resets_viewer_and_shows_progress() {
        let mut viewer = Viewer::default();
        viewer.append(Record::try_from(json!({"level": "info", "message": "old"})).unwrap());
        begin_upload(&mut viewer);
        assert!(viewer.records().is_empty());
        assert_eq!(viewer.detail_text(), PROCESSING_NOTICE);
    }

    #[test]
    fn last_reset_wins_and_outcomes_apply_in_arrival_order() {
        let record = |message: &str| {
            Record::try_from(json!({"level": "info", "message": message})).unwrap()
        };
        let mut viewer = Viewer::default();
        viewer.append(record("stale"));

        begin_upload(&mut viewer);
        viewer.append(record("from first upload"));
        begin_upload(&mut viewer);
        assert!(viewer.records().is_empty());
        assert_eq!(viewer.detail_text(), PROCESSING_NOTICE);

        viewer.append(record("x"));
        viewer.append(record("y"));
        // The second upload answers first; the first one's outcome arrives late.
        viewer.set_notice(UploadAck { lines_processed: 2 }.notice());
        viewer.set_notice(UploadAck { lines_processed: 5 }.notice());

        let messages: Vec<String> =
            viewer.records().iter().map(|record| record.message().into_owned()).collect();
        assert_eq!(messages, ["x", "y"]);
        assert_eq!(viewer.detail_text(), "5 lines processed. Waiting for logs...");
    }

    #[rstest]
    #[case("http://127.0.0.1:8080", "http://127.0.0.1:8080/upload")]
    #[case("https://logs.example.com/app/?x=1", "https://logs.example.com/upload")]
    fn endpoint_replaces_path(#[case] origin: &str, #[case] expected: &str) {
        let origin = Url::parse(origin).unwrap();
        assert_eq!(HttpUploader::new(&origin).endpoint().as_str(), expected);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short".to_string(), 10), "short");
        assert_eq!(truncate("ééé".to_string(), 3), "é...");
    }

    #[tokio::test]
    async fn missing_file_fails_before_any_request() {
        let origin = Url::parse("http://127.0.0.1:9").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.log");
        let err = HttpUploader::new(&origin).upload(&path).await.unwrap_err();
        assert!(matches!(err, UploadError::ReadFile { .. }));
        assert!(err.notice().starts_with("Error processing file: failed to read"));
    }
}
