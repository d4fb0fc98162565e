use crate::command::store::{
    artifacts::{ArtifactError, ArtifactKind, DownloadLink, DownloadRegistry},
    cache::report_key,
    database::{DatabaseBackend, DatabaseError},
    report::{self, ReportError},
};
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_RECENT_USERS: i64 = 10;
const STATS_TTL: Duration = Duration::from_secs(300);

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("unknown tool: {0}")]
    Unknown(String),
}

/// Reporting functions the chat model can call. The CSV reports are also
/// served directly over HTTP.
#[derive(Clone)]
pub struct Toolbox {
    database: Box<dyn DatabaseBackend>,
    downloads: DownloadRegistry,
}

fn flag(arguments: &Value, name: &str, default: bool) -> bool {
    arguments
        .get(name)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

fn report_filename(kind: &str) -> String {
    format!("{}-report-{}.csv", kind, Utc::now().timestamp_millis())
}

fn link_message(title: &str, noun: &str, link: &DownloadLink, ttl: Duration) -> String {
    format!(
        "{} generated.\n\n{} {} exported to CSV.\nFile: {}\n\nDownload: [click here]({})\n\nThe file is available for {} minutes and is deleted after the first download.",
        title,
        link.record_count,
        noun,
        link.filename,
        link.download_url,
        ttl.as_secs() / 60,
    )
}

impl Toolbox {
    pub fn new(database: Box<dyn DatabaseBackend>, downloads: DownloadRegistry) -> Self {
        Self {
            database,
            downloads,
        }
    }

    /// Function definitions in chat-completions `tools` format.
    pub fn definitions() -> Value {
        let function = |name: &str, description: &str, parameters: Value| {
            json!({
                "type": "function",
                "function": {
                    "name": name,
                    "description": description,
                    "parameters": parameters,
                }
            })
        };

        json!([
            function(
                "getSystemStats",
                "Get overall Ikated statistics: users, conversations, messages, documents and forms.",
                json!({ "type": "object", "properties": {} }),
            ),
            function(
                "getRecentUsers",
                "List the most recently registered users.",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "number", "description": "Maximum number of users (default 10)" }
                    }
                }),
            ),
            function(
                "generateUsersReport",
                "Export every user to a CSV file and return a download link.",
                json!({
                    "type": "object",
                    "properties": {
                        "includeAddress": { "type": "boolean", "description": "Include address columns (default true)" }
                    }
                }),
            ),
            function(
                "generateConversationsReport",
                "Export every conversation to a CSV file and return a download link.",
                json!({
                    "type": "object",
                    "properties": {
                        "includeMessages": { "type": "boolean", "description": "Include message counts (default false)" }
                    }
                }),
            ),
            function(
                "generateDocumentsReport",
                "Export every processed document to a CSV file and return a download link.",
                json!({
                    "type": "object",
                    "properties": {
                        "includeExtractedData": { "type": "boolean", "description": "Include extracted personal data (default true)" }
                    }
                }),
            ),
        ])
    }

    /// Run a tool by name. Failures are returned to the model as
    /// `{"success": false, ...}` rather than aborting the conversation.
    pub async fn call(&self, name: &str, arguments: &str) -> Value {
        let arguments = serde_json::from_str::<Value>(arguments).unwrap_or_else(|_| json!({}));

        info!("chat |> tool call: {}", name);

        let result = match name {
            "getSystemStats" => self.system_stats().await,
            "getRecentUsers" => {
                let limit = arguments
                    .get("limit")
                    .and_then(Value::as_f64)
                    .map(|limit| limit as i64)
                    .unwrap_or(DEFAULT_RECENT_USERS);

                self.recent_users(limit).await
            }
            "generateUsersReport" => {
                let include_address = flag(&arguments, "includeAddress", true);

                self.users_report(include_address).await.map(|link| {
                    let message =
                        link_message("Users report", "users", &link, self.downloads.ttl());
                    link_result(link, message)
                })
            }
            "generateConversationsReport" => {
                let include_messages = flag(&arguments, "includeMessages", false);

                self.conversations_report(include_messages)
                    .await
                    .map(|link| {
                        let message = link_message(
                            "Conversations report",
                            "conversations",
                            &link,
                            self.downloads.ttl(),
                        );
                        link_result(link, message)
                    })
            }
            "generateDocumentsReport" => {
                let include_extracted = flag(&arguments, "includeExtractedData", true);

                self.documents_report(include_extracted)
                    .await
                    .map(|link| {
                        let message = link_message(
                            "Documents report",
                            "documents",
                            &link,
                            self.downloads.ttl(),
                        );
                        link_result(link, message)
                    })
            }
            _ => Err(ToolError::Unknown(name.to_string())),
        };

        match result {
            Ok(value) => value,
            Err(err) => {
                warn!("chat |> tool {} failed: {}", name, err);

                json!({
                    "success": false,
                    "message": format!("failed to run {}", name),
                    "error": err.to_string(),
                })
            }
        }
    }

    pub async fn system_stats(&self) -> Result<Value, ToolError> {
        let database = self.database.clone();

        let stats = self
            .downloads
            .cache()
            .cache_query(&report_key("stats", None), STATS_TTL, || async move {
                database.stats().await
            })
            .await?;

        let message = format!(
            "Ikated statistics\n\nUsers: {}\nConversations: {}\nMessages: {}\nDocuments: {}\nForms: {}",
            stats.total_users,
            stats.total_conversations,
            stats.total_messages,
            stats.total_documents,
            stats.total_forms,
        );

        Ok(json!({
            "success": true,
            "stats": stats,
            "message": message,
        }))
    }

    pub async fn recent_users(&self, limit: i64) -> Result<Value, ToolError> {
        let users = self.database.list_users(Some(limit.max(1))).await?;

        let lines = users
            .iter()
            .map(|user| {
                format!(
                    "- {} ({}) - {}",
                    user.name,
                    user.email,
                    user.created_at.format("%d/%m/%Y")
                )
            })
            .collect::<Vec<_>>();

        let summaries = users
            .iter()
            .map(|user| {
                json!({
                    "id": user.id,
                    "name": user.name,
                    "email": user.email,
                    "createdAt": user.created_at,
                })
            })
            .collect::<Vec<_>>();

        Ok(json!({
            "success": true,
            "users": summaries,
            "message": format!("Recent users ({} found)\n\n{}", users.len(), lines.join("\n")),
        }))
    }

    pub async fn users_report(&self, include_address: bool) -> Result<DownloadLink, ToolError> {
        let users = self.database.list_users(None).await?;

        let report = report::users_report(&users, include_address);

        self.publish(report, "users").await
    }

    pub async fn conversations_report(
        &self,
        include_messages: bool,
    ) -> Result<DownloadLink, ToolError> {
        let mut conversations = self.database.list_conversations().await?;

        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut rows = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let count = if include_messages {
                self.database.count_messages(conversation.id).await?
            } else {
                0
            };

            rows.push((conversation, count));
        }

        let report = report::conversations_report(&rows, include_messages);

        self.publish(report, "conversations").await
    }

    pub async fn documents_report(
        &self,
        include_extracted: bool,
    ) -> Result<DownloadLink, ToolError> {
        let mut documents = self.database.list_documents().await?;

        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let report = report::documents_report(&documents, include_extracted);

        self.publish(report, "documents").await
    }

    async fn publish(&self, report: report::Report, kind: &str) -> Result<DownloadLink, ToolError> {
        if report.is_empty() {
            info!("chat |> {} report has no rows", kind);
        }

        let data = report.to_csv()?;

        let link = self
            .downloads
            .publish(data, ArtifactKind::Csv, &report_filename(kind), report.len())
            .await?;

        Ok(link)
    }
}

fn link_result(link: DownloadLink, message: String) -> Value {
    json!({
        "success": true,
        "message": message,
        "downloadKey": link.key,
        "filename": link.filename,
        "recordCount": link.record_count,
        "downloadUrl": link.download_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::store::{
        cache::{Cache, LocalCache},
        database::{
            schema::{NewConversation, NewMessage, NewUser},
            LocalDatabase,
        },
    };
    use tempfile::TempDir;

    async fn toolbox(dir: &TempDir) -> (Toolbox, LocalDatabase) {
        let database = LocalDatabase::new();

        for (name, email) in [("Ana", "ana@example.com"), ("Bruno", "bruno@example.com")] {
            database
                .create_user(NewUser {
                    name: name.to_string(),
                    email: email.to_string(),
                    ..Default::default()
                })
                .await;
        }

        let downloads = DownloadRegistry::new(
            Cache::new(Box::new(LocalCache::new())),
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
        );

        (
            Toolbox::new(Box::new(database.clone()), downloads),
            database,
        )
    }

    #[test]
    fn definitions_name_every_tool() {
        let definitions = Toolbox::definitions();

        let names = definitions
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["function"]["name"].as_str().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(
            names,
            vec![
                "getSystemStats",
                "getRecentUsers",
                "generateUsersReport",
                "generateConversationsReport",
                "generateDocumentsReport",
            ]
        );
    }

    #[tokio::test]
    async fn system_stats_counts_rows() {
        let dir = TempDir::new().unwrap();
        let (toolbox, _) = toolbox(&dir).await;

        let result = toolbox.call("getSystemStats", "{}").await;

        assert_eq!(result["success"], true);
        assert_eq!(result["stats"]["totalUsers"], 2);
    }

    #[tokio::test]
    async fn recent_users_honours_limit() {
        let dir = TempDir::new().unwrap();
        let (toolbox, _) = toolbox(&dir).await;

        let result = toolbox.call("getRecentUsers", r#"{"limit": 1}"#).await;

        assert_eq!(result["users"].as_array().unwrap().len(), 1);
        assert_eq!(result["users"][0]["name"], "Bruno");
    }

    #[tokio::test]
    async fn users_report_publishes_download() {
        let dir = TempDir::new().unwrap();
        let (toolbox, _) = toolbox(&dir).await;

        let result = toolbox
            .call("generateUsersReport", r#"{"includeAddress": false}"#)
            .await;

        assert_eq!(result["success"], true);
        assert_eq!(result["recordCount"], 2);

        let key = result["downloadKey"].as_str().unwrap();

        assert_eq!(result["downloadUrl"], format!("/api/download/{}", key));
        assert!(result["message"]
            .as_str()
            .unwrap()
            .contains(&format!("/api/download/{}", key)));

        let entry = toolbox.downloads.claim(key).await.unwrap().unwrap();
        let csv = std::fs::read_to_string(entry.file_path).unwrap();

        assert!(csv.starts_with("Full Name,Email,CPF,RG,Phone,Birth Date,Registered At\n"));
        assert!(csv.contains("Ana,ana@example.com"));
    }

    #[tokio::test]
    async fn conversations_report_counts_messages() {
        let dir = TempDir::new().unwrap();
        let (toolbox, database) = toolbox(&dir).await;

        let conversation = database
            .create_conversation(NewConversation {
                title: Some("Hello".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        for content in ["a", "b", "c"] {
            database
                .create_message(NewMessage {
                    conversation_id: conversation.id,
                    role: "user".to_string(),
                    content: content.to_string(),
                    metadata: None,
                })
                .await
                .unwrap();
        }

        let link = toolbox.conversations_report(true).await.unwrap();
        let entry = toolbox.downloads.claim(&link.key).await.unwrap().unwrap();
        let csv = std::fs::read_to_string(entry.file_path).unwrap();

        assert!(csv.lines().next().unwrap().ends_with("Message Count"));
        assert!(csv.lines().nth(1).unwrap().ends_with(",3"));
    }

    #[tokio::test]
    async fn unknown_tool_reports_failure() {
        let dir = TempDir::new().unwrap();
        let (toolbox, _) = toolbox(&dir).await;

        let result = toolbox.call("dropTables", "{}").await;

        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "unknown tool: dropTables");
    }
}
