use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, FromRow, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<DateTime<Utc>>,
    pub address: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<DateTime<Utc>>,
    pub address: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, FromRow, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub title: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct NewConversation {
    pub user_id: Option<Uuid>,
    pub title: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, FromRow, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub metadata: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, FromRow, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub filename: String,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size: Option<i32>,
    pub path: Option<String>,
    pub extracted_data: Option<Value>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn personal_data(&self) -> Option<PersonalData> {
        self.extracted_data.as_ref().map(PersonalData::from_value)
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewDocument {
    pub user_id: Option<Uuid>,
    pub filename: String,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size: Option<i32>,
    pub path: Option<String>,
    pub extracted_data: Option<Value>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, FromRow, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub form_type: String,
    pub form_data: Value,
    pub document_ids: Option<Value>,
    pub confidence: Option<i32>,
    pub is_validated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewForm {
    pub user_id: Option<Uuid>,
    pub form_type: String,
    pub form_data: Value,
    pub document_ids: Option<Value>,
    pub confidence: Option<i32>,
    pub is_validated: bool,
}

#[derive(Clone, Debug)]
pub struct NewAiLog {
    pub session_id: Option<String>,
    pub request_type: String,
    pub input_data: Option<Value>,
    pub output_data: Option<Value>,
    pub model: Option<String>,
    pub tokens: Option<i32>,
    pub duration: Option<i32>,
    pub status: String,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_users: i64,
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_documents: i64,
    pub total_forms: i64,
}

/// Personal data extracted from documents and carried by forms.
///
/// Values are strings on the wire. Numbers and booleans are accepted and
/// stringified; empty strings, nulls and unknown keys are dropped.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalData {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub nome_completo: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub rg: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub data_nascimento: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub telefone: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub cep: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub endereco: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub numero: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub bairro: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub cidade: Option<String>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub estado: Option<String>,
}

fn lenient<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;

    Ok(match value {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value),
        Some(Value::Number(value)) => Some(value.to_string()),
        Some(Value::Bool(value)) => Some(value.to_string()),
        _ => None,
    })
}

impl PersonalData {
    /// Decode from arbitrary JSON. Anything that is not an object is empty.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Default::default()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Overlay `other` on `self`; fields set in `other` win.
    pub fn merge(&mut self, other: &PersonalData) {
        fn overlay(target: &mut Option<String>, source: &Option<String>) {
            if let Some(value) = source {
                *target = Some(value.clone());
            }
        }

        overlay(&mut self.nome_completo, &other.nome_completo);
        overlay(&mut self.cpf, &other.cpf);
        overlay(&mut self.rg, &other.rg);
        overlay(&mut self.data_nascimento, &other.data_nascimento);
        overlay(&mut self.email, &other.email);
        overlay(&mut self.telefone, &other.telefone);
        overlay(&mut self.cep, &other.cep);
        overlay(&mut self.endereco, &other.endereco);
        overlay(&mut self.numero, &other.numero);
        overlay(&mut self.bairro, &other.bairro);
        overlay(&mut self.cidade, &other.cidade);
        overlay(&mut self.estado, &other.estado);
    }

    /// Set fields in wire order, keyed by their wire names.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("nomeCompleto", &self.nome_completo),
            ("cpf", &self.cpf),
            ("rg", &self.rg),
            ("dataNascimento", &self.data_nascimento),
            ("email", &self.email),
            ("telefone", &self.telefone),
            ("cep", &self.cep),
            ("endereco", &self.endereco),
            ("numero", &self.numero),
            ("bairro", &self.bairro),
            ("cidade", &self.cidade),
            ("estado", &self.estado),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|value| (key, value)))
        .collect()
    }
}
