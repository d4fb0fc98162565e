use crate::command::{
    start::{
        ai::{tools::Toolbox, AiError, AiProvider, ChatMessage, DocumentAnalysis},
        router, AppState,
    },
    store::{
        artifacts::DownloadRegistry,
        cache::{Cache, LocalCache},
        database::{schema::PersonalData, LocalDatabase},
    },
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::Request,
    response::Response,
    Router,
};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Provider with canned replies. Images and text analyse to fixed data.
#[derive(Clone)]
pub struct ScriptedProvider {
    pub fail: bool,
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate_response(&self, _messages: &[ChatMessage]) -> Result<String, AiError> {
        if self.fail {
            return Err(AiError::InvalidResponse("scripted failure".to_string()));
        }

        Ok("scripted reply".to_string())
    }

    async fn generate_response_stream(
        &self,
        _messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<(), AiError> {
        if self.fail {
            return Err(AiError::InvalidResponse("scripted failure".to_string()));
        }

        for delta in ["scripted ", "reply"] {
            tx.send(delta.to_string())
                .await
                .map_err(|_| AiError::StreamClosed)?;
        }

        Ok(())
    }

    async fn analyze_document(&self, data: &[u8], mime_type: &str) -> DocumentAnalysis {
        if self.fail {
            return DocumentAnalysis::default();
        }

        if mime_type.starts_with("image/") {
            return DocumentAnalysis {
                extracted_data: PersonalData::from_value(&json!({
                    "nomeCompleto": "Maria Souza",
                    "cpf": "111.111.111-11",
                })),
                confidence: 0.85,
                processed_successfully: true,
            };
        }

        if mime_type.starts_with("text/") {
            let text = String::from_utf8_lossy(data);

            return DocumentAnalysis {
                extracted_data: PersonalData::from_value(&json!({
                    "cpf": "222.222.222-22",
                    "cidade": text.trim(),
                })),
                confidence: 0.75,
                processed_successfully: true,
            };
        }

        DocumentAnalysis::default()
    }

    fn box_clone(&self) -> Box<dyn AiProvider> {
        Box::new(self.clone())
    }
}

pub struct TestApp {
    pub database: LocalDatabase,
    pub downloads: DownloadRegistry,
    pub dir: TempDir,
    state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(false)
    }

    pub async fn failing() -> Self {
        Self::build(true)
    }

    fn build(fail: bool) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");

        let database = LocalDatabase::new();

        let downloads = DownloadRegistry::new(
            Cache::new(Box::new(LocalCache::new())),
            dir.path().join("exports"),
            Duration::from_secs(3600),
        );

        let tools = Toolbox::new(Box::new(database.clone()), downloads.clone());

        let state = AppState {
            ai: Box::new(ScriptedProvider { fail }),
            database: Box::new(database.clone()),
            downloads: downloads.clone(),
            tools,
            upload_dir: dir.path().join("uploads"),
        };

        Self {
            database,
            downloads,
            dir,
            state,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if body.is_null() {
        return builder.body(Body::empty()).expect("invalid request");
    }

    builder
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("invalid request")
}

/// A multipart body with one part per `(field, filename, content type, bytes)`.
pub fn multipart_request(uri: &str, parts: &[(&str, &str, &str, &[u8])]) -> Request<Body> {
    let boundary = "ikated-test-boundary";

    let mut body = Vec::new();

    for (field, filename, content_type, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .expect("invalid request")
}

pub async fn read_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body")
        .to_vec()
}

pub async fn read_json(response: Response) -> Value {
    serde_json::from_slice(&read_bytes(response).await).expect("invalid json body")
}
