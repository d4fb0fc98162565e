use crate::command::{
    start::{error::ApiError, AppState},
    store::artifacts::DownloadLink,
};
use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, Path, State},
    Json,
};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReportOptions {
    #[serde(default = "enabled")]
    pub include_address: bool,
    #[serde(default)]
    pub include_messages: bool,
    #[serde(default = "enabled")]
    pub include_extracted_data: bool,
}

fn enabled() -> bool {
    true
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_address: true,
            include_messages: false,
            include_extracted_data: true,
        }
    }
}

impl ReportOptions {
    /// An empty body selects the defaults.
    fn parse(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        serde_json::from_slice(body)
            .map_err(|err| ApiError::BadRequest(format!("invalid report options: {}", err)))
    }
}

/// Publish a CSV report through the download registry, the same path the
/// chat tools take.
pub async fn generate(
    State(state): State<AppState>,
    kind: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> Result<Json<DownloadLink>, ApiError> {
    let Path(kind) = kind?;

    let options = ReportOptions::parse(&body)?;

    let link = match kind.as_str() {
        "users" => state.tools.users_report(options.include_address).await?,
        "conversations" => {
            state
                .tools
                .conversations_report(options.include_messages)
                .await?
        }
        "documents" => {
            state
                .tools
                .documents_report(options.include_extracted_data)
                .await?
        }
        other => return Err(ApiError::NotFound(format!("unknown report: {}", other))),
    };

    Ok(Json(link))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{
        start::testing::{json_request, read_bytes, read_json, TestApp},
        store::database::schema::NewUser,
    };
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    #[test]
    fn options_default_on_empty_body() {
        let options = ReportOptions::parse(b"").unwrap();

        assert!(options.include_address);
        assert!(!options.include_messages);
        assert!(options.include_extracted_data);

        let options = ReportOptions::parse(br#"{"includeMessages": true}"#).unwrap();

        assert!(options.include_messages);
        assert!(options.include_address);

        assert!(ReportOptions::parse(b"{\"bogus\": 1}").is_err());
    }

    #[tokio::test]
    async fn users_report_link_downloads_csv() {
        let app = TestApp::new().await;

        app.database
            .create_user(NewUser {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                ..Default::default()
            })
            .await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/reports/users",
                json!({ "includeAddress": false }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let link = read_json(response).await;

        assert_eq!(link["recordCount"], 1);

        let filename = link["filename"].as_str().unwrap();

        assert!(filename.starts_with("users-report-"));

        let response = app
            .router()
            .oneshot(json_request(
                "GET",
                link["downloadUrl"].as_str().unwrap(),
                Value::Null,
            ))
            .await
            .unwrap();

        let csv = String::from_utf8(read_bytes(response).await).unwrap();

        assert!(csv.contains("ana@example.com"));
        assert!(!csv.contains("Street"));
    }

    #[tokio::test]
    async fn unknown_report_kind() {
        let app = TestApp::new().await;

        let response = app
            .router()
            .oneshot(json_request("POST", "/api/reports/invoices", Value::Null))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
