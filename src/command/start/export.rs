use crate::command::{
    start::{download::attachment, error::ApiError, AppState},
    store::{
        artifacts::ArtifactKind,
        report::{conversations_pdf, documents_pdf, forms_report},
    },
};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsQuery {
    pub conversation_id: Option<Uuid>,
}

pub async fn forms_csv(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut forms = state.database.list_forms(None).await?;

    forms.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let report = forms_report(&forms);

    let data = report.to_csv()?;

    let filename = format!("forms-export-{}.csv", Utc::now().timestamp_millis());

    info!("export |> {} ({} records)", filename, report.len());

    Ok(attachment(ArtifactKind::Csv, &filename, data))
}

pub async fn conversations_pdf_export(
    State(state): State<AppState>,
    query: Result<Query<ConversationsQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;

    let conversations = match query.conversation_id {
        Some(id) => {
            let conversation = state
                .database
                .get_conversation(id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("conversation not found: {}", id)))?;

            vec![conversation]
        }
        None => {
            let mut conversations = state.database.list_conversations().await?;

            conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            conversations
        }
    };

    let mut entries = Vec::with_capacity(conversations.len());

    for conversation in conversations {
        let messages = state.database.get_messages(conversation.id).await?;

        entries.push((conversation, messages));
    }

    let generated_at = Utc::now();

    let data = conversations_pdf(&entries, generated_at).render("Conversations Report")?;

    let filename = format!(
        "conversations-{}-{}.pdf",
        query
            .conversation_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "all".to_string()),
        generated_at.timestamp_millis()
    );

    info!("export |> {} ({} records)", filename, entries.len());

    Ok(attachment(ArtifactKind::Pdf, &filename, data))
}

pub async fn documents_pdf_export(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut documents = state.database.list_documents().await?;

    documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let generated_at = Utc::now();

    let data = documents_pdf(&documents, generated_at).render("Documents Report")?;

    let filename = format!("documents-report-{}.pdf", generated_at.timestamp_millis());

    info!("export |> {} ({} records)", filename, documents.len());

    Ok(attachment(ArtifactKind::Pdf, &filename, data))
}
