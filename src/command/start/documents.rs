use crate::command::{
    start::{ai::AiCall, error::ApiError, AppState},
    store::{
        database::schema::{Document, NewDocument, PersonalData},
        paths::{get_upload_filename, get_upload_path},
        report::format_timestamp,
    },
};
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::PathRejection,
        Path, State,
    },
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::fs::{create_dir_all, write};
use tracing::info;
use uuid::Uuid;

pub const MAX_DOCUMENTS: usize = 10;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub extracted_data: PersonalData,
    pub confidence: f64,
    pub processed_files: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: Uuid,
    pub filename: String,
    pub uploaded_at: String,
}

struct UploadedFile {
    data: Vec<u8>,
    mime_type: String,
    original_name: String,
}

impl UploadedFile {
    fn size(&self) -> Option<i32> {
        i32::try_from(self.data.len()).ok()
    }
}

/// Collect every file sent under `field`. Any other field is rejected.
async fn read_files(
    multipart: &mut Multipart,
    field_name: &str,
) -> Result<Vec<UploadedFile>, ApiError> {
    let mut files = vec![];

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            return Err(ApiError::BadRequest(format!(
                "unexpected field: {}",
                field.name().unwrap_or_default()
            )));
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();

        let mime_type = field
            .content_type()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();

        let data = field.bytes().await?.to_vec();

        files.push(UploadedFile {
            data,
            mime_type,
            original_name,
        });
    }

    Ok(files)
}

pub async fn analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let mut multipart = multipart?;

    let files = read_files(&mut multipart, "documents").await?;

    if files.is_empty() {
        return Err(ApiError::BadRequest("no documents provided".to_string()));
    }

    if files.len() > MAX_DOCUMENTS {
        return Err(ApiError::BadRequest(format!(
            "at most {} documents per request",
            MAX_DOCUMENTS
        )));
    }

    let mut extracted_data = PersonalData::default();
    let mut processed_files = Vec::with_capacity(files.len());
    let mut confidences = vec![];

    for file in files {
        let call = AiCall::start(
            "document_analysis",
            state.ai.model(),
            None,
            Some(json!({
                "mimeType": file.mime_type,
                "filename": file.original_name,
            })),
        );

        let analysis = state
            .ai
            .analyze_document(&file.data, &file.mime_type)
            .await;

        if analysis.processed_successfully {
            call.finish(
                state.database.as_ref(),
                Some(analysis.extracted_data.to_value()),
                None,
            )
            .await;
        } else {
            call.finish(
                state.database.as_ref(),
                None,
                Some(format!("document not processed: {}", file.mime_type)),
            )
            .await;
        }

        let processed_at = if analysis.processed_successfully {
            extracted_data.merge(&analysis.extracted_data);
            confidences.push(analysis.confidence);

            Some(Utc::now())
        } else {
            info!("documents |> not processed: {}", file.original_name);

            None
        };

        state
            .database
            .create_document(NewDocument {
                user_id: None,
                filename: get_upload_filename(&file.original_name),
                original_name: file.original_name.clone(),
                mime_type: Some(file.mime_type.clone()),
                size: file.size(),
                path: None,
                extracted_data: processed_at.map(|_| analysis.extracted_data.to_value()),
                processed_at,
            })
            .await?;

        processed_files.push(file.original_name);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    info!(
        "documents |> analyzed {} files ({} processed)",
        processed_files.len(),
        confidences.len()
    );

    Ok(Json(AnalysisResponse {
        extracted_data,
        confidence,
        processed_files,
    }))
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart?;

    let mut files = read_files(&mut multipart, "file").await?;

    if files.len() > 1 {
        return Err(ApiError::BadRequest("only one file per upload".to_string()));
    }

    let Some(file) = files.pop() else {
        return Err(ApiError::BadRequest("no file provided".to_string()));
    };

    create_dir_all(&state.upload_dir).await?;

    let filename = get_upload_filename(&file.original_name);

    let path = get_upload_path(&state.upload_dir, &filename);

    write(&path, &file.data).await?;

    let document = state
        .database
        .create_document(NewDocument {
            user_id: None,
            filename,
            original_name: file.original_name.clone(),
            mime_type: Some(file.mime_type.clone()),
            size: file.size(),
            path: Some(path.display().to_string()),
            extracted_data: None,
            processed_at: None,
        })
        .await?;

    info!("documents |> uploaded: {}", document.filename);

    Ok(Json(UploadResponse {
        file_id: document.id,
        filename: document.filename,
        uploaded_at: format_timestamp(&document.created_at),
    }))
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Document>, ApiError> {
    let Path(id) = id?;

    state
        .database
        .get_document(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("document not found: {}", id)))
}
