use crate::command::store::database::{
    schema::{
        Conversation, Document, Form, Message, NewAiLog, NewConversation, NewDocument, NewForm,
        NewMessage, Stats, User,
    },
    DatabaseBackend, DatabaseError,
};
#[cfg(test)]
use crate::command::store::database::schema::NewUser;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct LocalTables {
    users: Vec<User>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    documents: Vec<Document>,
    forms: Vec<Form>,
    ai_logs: Vec<NewAiLog>,
}

/// In-process database for development and tests. Rows live in insertion
/// order, which is also creation order.
#[derive(Clone, Debug, Default)]
pub struct LocalDatabase {
    tables: Arc<RwLock<LocalTables>>,
}

impl LocalDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn ai_logs(&self) -> Vec<NewAiLog> {
        self.tables.read().await.ai_logs.clone()
    }

    /// Users are registered outside this service; tests insert them here.
    #[cfg(test)]
    pub async fn create_user(&self, user: NewUser) -> User {
        let mut tables = self.tables.write().await;

        let now = Utc::now();

        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            cpf: user.cpf,
            rg: user.rg,
            phone: user.phone,
            birth_date: user.birth_date,
            address: user.address,
            created_at: now,
            updated_at: now,
        };

        tables.users.push(user.clone());

        user
    }
}

#[async_trait]
impl DatabaseBackend for LocalDatabase {
    async fn list_users(&self, limit: Option<i64>) -> Result<Vec<User>, DatabaseError> {
        let tables = self.tables.read().await;

        let limit = limit
            .map(|limit| limit.max(0) as usize)
            .unwrap_or(usize::MAX);

        Ok(tables.users.iter().rev().take(limit).cloned().collect())
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> Result<Conversation, DatabaseError> {
        let now = Utc::now();

        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: conversation.user_id,
            title: conversation.title,
            metadata: conversation.metadata,
            created_at: now,
            updated_at: now,
        };

        self.tables
            .write()
            .await
            .conversations
            .push(conversation.clone());

        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError> {
        let tables = self.tables.read().await;

        Ok(tables.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, DatabaseError> {
        Ok(self.tables.read().await.conversations.clone())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, DatabaseError> {
        let mut tables = self.tables.write().await;

        if !tables
            .conversations
            .iter()
            .any(|c| c.id == message.conversation_id)
        {
            return Err(DatabaseError::ConversationNotFound(message.conversation_id));
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            created_at: Utc::now(),
        };

        tables.messages.push(message.clone());

        Ok(message)
    }

    async fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, DatabaseError> {
        let tables = self.tables.read().await;

        Ok(tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn count_messages(&self, conversation_id: Uuid) -> Result<i64, DatabaseError> {
        let tables = self.tables.read().await;

        let count = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count();

        Ok(count as i64)
    }

    async fn create_document(&self, document: NewDocument) -> Result<Document, DatabaseError> {
        let document = Document {
            id: Uuid::new_v4(),
            user_id: document.user_id,
            filename: document.filename,
            original_name: document.original_name,
            mime_type: document.mime_type,
            size: document.size,
            path: document.path,
            extracted_data: document.extracted_data,
            processed_at: document.processed_at,
            created_at: Utc::now(),
        };

        self.tables.write().await.documents.push(document.clone());

        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        let tables = self.tables.read().await;

        Ok(tables.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn get_documents(&self, ids: &[Uuid]) -> Result<Vec<Document>, DatabaseError> {
        let tables = self.tables.read().await;

        Ok(tables
            .documents
            .iter()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, DatabaseError> {
        Ok(self.tables.read().await.documents.clone())
    }

    async fn create_form(&self, form: NewForm) -> Result<Form, DatabaseError> {
        let now = Utc::now();

        let form = Form {
            id: Uuid::new_v4(),
            user_id: form.user_id,
            form_type: form.form_type,
            form_data: form.form_data,
            document_ids: form.document_ids,
            confidence: form.confidence,
            is_validated: form.is_validated,
            created_at: now,
            updated_at: now,
        };

        self.tables.write().await.forms.push(form.clone());

        Ok(form)
    }

    async fn get_form(&self, id: Uuid) -> Result<Option<Form>, DatabaseError> {
        let tables = self.tables.read().await;

        Ok(tables.forms.iter().find(|f| f.id == id).cloned())
    }

    async fn list_forms(&self, user_id: Option<Uuid>) -> Result<Vec<Form>, DatabaseError> {
        let tables = self.tables.read().await;

        Ok(tables
            .forms
            .iter()
            .filter(|f| user_id.is_none() || f.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_ai_log(&self, log: NewAiLog) -> Result<(), DatabaseError> {
        self.tables.write().await.ai_logs.push(log);

        Ok(())
    }

    async fn stats(&self) -> Result<Stats, DatabaseError> {
        let tables = self.tables.read().await;

        Ok(Stats {
            total_users: tables.users.len() as i64,
            total_conversations: tables.conversations.len() as i64,
            total_messages: tables.messages.len() as i64,
            total_documents: tables.documents.len() as i64,
            total_forms: tables.forms.len() as i64,
        })
    }

    fn box_clone(&self) -> Box<dyn DatabaseBackend> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn users_are_listed_newest_first() {
        let db = LocalDatabase::new();

        db.create_user(new_user("Ana", "ana@example.com")).await;
        db.create_user(new_user("Bruno", "bruno@example.com")).await;
        db.create_user(new_user("Carla", "carla@example.com")).await;

        let users = db.list_users(Some(2)).await.unwrap();

        assert_eq!(
            users.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
            vec!["Carla", "Bruno"]
        );
    }

    #[tokio::test]
    async fn messages_require_conversation_and_are_counted() {
        let db = LocalDatabase::new();

        let missing = db
            .create_message(NewMessage {
                conversation_id: Uuid::new_v4(),
                role: "user".to_string(),
                content: "hi".to_string(),
                metadata: None,
            })
            .await;

        assert!(matches!(
            missing,
            Err(DatabaseError::ConversationNotFound(_))
        ));

        let conversation = db
            .create_conversation(NewConversation::default())
            .await
            .unwrap();

        for content in ["one", "two"] {
            db.create_message(NewMessage {
                conversation_id: conversation.id,
                role: "user".to_string(),
                content: content.to_string(),
                metadata: None,
            })
            .await
            .unwrap();
        }

        let messages = db.get_messages(conversation.id).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "one");
        assert_eq!(db.count_messages(conversation.id).await.unwrap(), 2);
        assert_eq!(db.stats().await.unwrap().total_messages, 2);
    }

    #[tokio::test]
    async fn forms_filter_by_user() {
        let db = LocalDatabase::new();
        let user = db.create_user(new_user("Ana", "ana@example.com")).await;

        for user_id in [Some(user.id), None] {
            db.create_form(NewForm {
                user_id,
                form_type: "smart_form".to_string(),
                form_data: json!({}),
                document_ids: None,
                confidence: Some(95),
                is_validated: false,
            })
            .await
            .unwrap();
        }

        assert_eq!(db.list_forms(None).await.unwrap().len(), 2);
        assert_eq!(db.list_forms(Some(user.id)).await.unwrap().len(), 1);
    }
}
