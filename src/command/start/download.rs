use crate::command::{
    start::{error::ApiError, AppState},
    store::{
        artifacts::{download_url, ArtifactKind, DownloadInfo},
        report::format_timestamp,
    },
};
use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use std::io::ErrorKind;
use tokio::fs::{read, remove_file};
use tracing::{info, warn};

const EXPIRED: &str = "file not found or expired";

/// A file download response with the given name and type.
pub fn attachment(kind: ArtifactKind, filename: &str, data: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, kind.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename.replace('"', "")),
            ),
        ],
        data,
    )
        .into_response()
}

pub async fn download(
    State(state): State<AppState>,
    key: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(key) = key?;

    let Some(entry) = state.downloads.claim(&key).await? else {
        return Err(ApiError::NotFound(EXPIRED.to_string()));
    };

    let data = match read(&entry.file_path).await {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file not found on system".to_string()));
        }
        Err(err) => return Err(err.into()),
    };

    if let Err(err) = remove_file(&entry.file_path).await {
        warn!(
            "download |> failed to remove {}: {}",
            entry.file_path.display(),
            err
        );
    }

    info!("download |> served {} ({})", entry.filename, key);

    let mut response = attachment(entry.kind, &entry.filename, data);

    let headers = response.headers_mut();

    if let Ok(value) = format_timestamp(&entry.generated_at).parse() {
        headers.insert("x-generated-at", value);
    }

    headers.insert("x-record-count", entry.record_count.into());

    Ok(response)
}

pub async fn info(
    State(state): State<AppState>,
    key: Result<Path<String>, PathRejection>,
) -> Result<Json<DownloadInfo>, ApiError> {
    let Path(key) = key?;

    let Some(entry) = state.downloads.info(&key).await? else {
        return Err(ApiError::NotFound(EXPIRED.to_string()));
    };

    Ok(Json(DownloadInfo {
        filename: entry.filename,
        kind: entry.kind,
        generated_at: entry.generated_at,
        record_count: entry.record_count,
        download_url: download_url(&key),
    }))
}
