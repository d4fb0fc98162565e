use crate::command::{
    start::{error::ApiError, AppState},
    store::database::schema::{Form, NewForm, PersonalData},
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

const SMART_FORM: &str = "smart_form";
const FILL_CONFIDENCE: i32 = 95;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct FillRequest {
    pub document_ids: Vec<Uuid>,
    #[serde(default)]
    pub form_data: Option<PersonalData>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillResponse {
    pub filled_data: PersonalData,
    pub confidence: f64,
    pub used_documents: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub user_id: Option<Uuid>,
}

pub async fn fill_with_ai(
    State(state): State<AppState>,
    payload: Result<Json<FillRequest>, JsonRejection>,
) -> Result<Json<FillResponse>, ApiError> {
    let Json(request) = payload?;

    let mut document_ids = Vec::with_capacity(request.document_ids.len());

    for id in &request.document_ids {
        if !document_ids.contains(id) {
            document_ids.push(*id);
        }
    }

    let documents = state.database.get_documents(&document_ids).await?;

    let mut filled_data = PersonalData::default();
    let mut used_documents = vec![];

    for id in &document_ids {
        let Some(document) = documents.iter().find(|document| &document.id == id) else {
            continue;
        };

        if let Some(data) = document.personal_data().filter(|data| !data.is_empty()) {
            filled_data.merge(&data);
            used_documents.push(document.original_name.clone());
        }
    }

    if let Some(form_data) = &request.form_data {
        filled_data.merge(form_data);
    }

    let form = state
        .database
        .create_form(NewForm {
            user_id: None,
            form_type: SMART_FORM.to_string(),
            form_data: filled_data.to_value(),
            document_ids: Some(json!(document_ids)),
            confidence: Some(FILL_CONFIDENCE),
            is_validated: false,
        })
        .await?;

    info!(
        "forms |> filled {} from {} documents",
        form.id,
        used_documents.len()
    );

    Ok(Json(FillResponse {
        filled_data,
        confidence: f64::from(FILL_CONFIDENCE) / 100.0,
        used_documents,
    }))
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Form>, ApiError> {
    let Path(id) = id?;

    state
        .database
        .get_form(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("form not found: {}", id)))
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Form>>, ApiError> {
    let Query(query) = query?;

    let forms = state.database.list_forms(query.user_id).await?;

    Ok(Json(forms))
}
