use crate::command::store::database::{
    schema::{
        Conversation, Document, Form, Message, NewAiLog, NewConversation, NewDocument, NewForm,
        NewMessage, Stats, User,
    },
    DatabaseBackend, DatabaseError,
};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub async fn new(options: PgConnectOptions) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database |> migrations applied");

        Ok(Self { pool })
    }

    async fn count(&self, table: &str) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl DatabaseBackend for PostgresDatabase {
    async fn list_users(&self, limit: Option<i64>) -> Result<Vec<User>, DatabaseError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> Result<Conversation, DatabaseError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (user_id, title, metadata) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(conversation.user_id)
        .bind(&conversation.title)
        .bind(&conversation.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError> {
        let conversation =
            sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, DatabaseError> {
        let conversations =
            sqlx::query_as::<_, Conversation>("SELECT * FROM conversations ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;

        Ok(conversations)
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, DatabaseError> {
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (conversation_id, role, content, metadata) \
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(message.conversation_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(&message.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    async fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, DatabaseError> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = $1 ORDER BY created_at, id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn count_messages(&self, conversation_id: Uuid) -> Result<i64, DatabaseError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn create_document(&self, document: NewDocument) -> Result<Document, DatabaseError> {
        let document = sqlx::query_as::<_, Document>(
            "INSERT INTO documents \
             (user_id, filename, original_name, mime_type, size, path, extracted_data, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(document.user_id)
        .bind(&document.filename)
        .bind(&document.original_name)
        .bind(&document.mime_type)
        .bind(document.size)
        .bind(&document.path)
        .bind(&document.extracted_data)
        .bind(document.processed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        let document = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(document)
    }

    async fn get_documents(&self, ids: &[Uuid]) -> Result<Vec<Document>, DatabaseError> {
        let documents =
            sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(documents)
    }

    async fn list_documents(&self) -> Result<Vec<Document>, DatabaseError> {
        let documents =
            sqlx::query_as::<_, Document>("SELECT * FROM documents ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;

        Ok(documents)
    }

    async fn create_form(&self, form: NewForm) -> Result<Form, DatabaseError> {
        let form = sqlx::query_as::<_, Form>(
            "INSERT INTO forms \
             (user_id, form_type, form_data, document_ids, confidence, is_validated) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(form.user_id)
        .bind(&form.form_type)
        .bind(&form.form_data)
        .bind(&form.document_ids)
        .bind(form.confidence)
        .bind(form.is_validated)
        .fetch_one(&self.pool)
        .await?;

        Ok(form)
    }

    async fn get_form(&self, id: Uuid) -> Result<Option<Form>, DatabaseError> {
        let form = sqlx::query_as::<_, Form>("SELECT * FROM forms WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(form)
    }

    async fn list_forms(&self, user_id: Option<Uuid>) -> Result<Vec<Form>, DatabaseError> {
        let forms = sqlx::query_as::<_, Form>(
            "SELECT * FROM forms WHERE ($1::uuid IS NULL OR user_id = $1) ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(forms)
    }

    async fn create_ai_log(&self, log: NewAiLog) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO ai_logs \
             (session_id, request_type, input_data, output_data, model, tokens, duration, status, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&log.session_id)
        .bind(&log.request_type)
        .bind(&log.input_data)
        .bind(&log.output_data)
        .bind(&log.model)
        .bind(log.tokens)
        .bind(log.duration)
        .bind(&log.status)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stats(&self) -> Result<Stats, DatabaseError> {
        Ok(Stats {
            total_users: self.count("users").await?,
            total_conversations: self.count("conversations").await?,
            total_messages: self.count("messages").await?,
            total_documents: self.count("documents").await?,
            total_forms: self.count("forms").await?,
        })
    }

    fn box_clone(&self) -> Box<dyn DatabaseBackend> {
        Box::new(self.clone())
    }
}
