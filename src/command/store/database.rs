use crate::command::store::ServerBackend;
use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use tracing::info;
use uuid::Uuid;

mod local;
mod postgres;
pub mod schema;

pub use local::LocalDatabase;
pub use postgres::PostgresDatabase;
use schema::{
    Conversation, Document, Form, Message, NewAiLog, NewConversation, NewDocument, NewForm,
    NewMessage, Stats, User,
};

#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("conversation not found: {0}")]
    ConversationNotFound(Uuid),
}

#[async_trait]
pub trait DatabaseBackend: Send + Sync + 'static {
    /// Users, newest first.
    async fn list_users(&self, limit: Option<i64>) -> Result<Vec<User>, DatabaseError>;

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> Result<Conversation, DatabaseError>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, DatabaseError>;

    async fn create_message(&self, message: NewMessage) -> Result<Message, DatabaseError>;

    /// Messages of a conversation, oldest first.
    async fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, DatabaseError>;

    async fn count_messages(&self, conversation_id: Uuid) -> Result<i64, DatabaseError>;

    async fn create_document(&self, document: NewDocument) -> Result<Document, DatabaseError>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, DatabaseError>;

    /// Documents whose ids are in `ids`; unknown ids are skipped.
    async fn get_documents(&self, ids: &[Uuid]) -> Result<Vec<Document>, DatabaseError>;

    async fn list_documents(&self) -> Result<Vec<Document>, DatabaseError>;

    async fn create_form(&self, form: NewForm) -> Result<Form, DatabaseError>;

    async fn get_form(&self, id: Uuid) -> Result<Option<Form>, DatabaseError>;

    async fn list_forms(&self, user_id: Option<Uuid>) -> Result<Vec<Form>, DatabaseError>;

    async fn create_ai_log(&self, log: NewAiLog) -> Result<(), DatabaseError>;

    async fn stats(&self) -> Result<Stats, DatabaseError>;

    /// Return a new `Box<dyn DatabaseBackend>` cloned from `self`.
    fn box_clone(&self) -> Box<dyn DatabaseBackend>;
}

impl Clone for Box<dyn DatabaseBackend> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

pub async fn backend_database(
    database_backend: &str,
    options: &PgConnectOptions,
) -> Result<Box<dyn DatabaseBackend>> {
    let backend: Box<dyn DatabaseBackend> = match ServerBackend::from(database_backend) {
        ServerBackend::Local => Box::new(LocalDatabase::new()),
        ServerBackend::Postgres => Box::new(PostgresDatabase::new(options.clone()).await?),
        _ => bail!("unknown database backend: {}", database_backend),
    };

    info!("database |> backend: {}", database_backend);

    Ok(backend)
}
