use crate::command::{
    start::{
        ai::{AiCall, ChatMessage, ChatRole},
        error::ApiError,
        AppState,
    },
    store::{
        database::schema::{Message, NewConversation, NewMessage},
        report::format_timestamp,
    },
};
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    response::sse::{Event, Sse},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};
use uuid::Uuid;

const DEFAULT_MODEL: &str = "gpt-4o";
const TITLE_WORDS: usize = 5;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.messages.is_empty() {
            return Err(ApiError::BadRequest(
                "messages must contain at least one message".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub timestamp: String,
    pub conversation_id: Uuid,
}

/// First five words of the opening message, with `...` when truncated.
pub fn conversation_title(first_message: Option<&str>) -> String {
    let Some(first_message) = first_message.filter(|message| !message.is_empty()) else {
        return "New Conversation".to_string();
    };

    let words = first_message.split(' ').collect::<Vec<_>>();

    let mut title = words
        .iter()
        .take(TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    if words.len() > TITLE_WORDS {
        title.push_str("...");
    }

    title
}

async fn create_conversation(state: &AppState, request: &ChatRequest) -> Result<Uuid, ApiError> {
    let title = conversation_title(request.messages.first().map(|m| m.content.as_str()));

    let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);

    let conversation = state
        .database
        .create_conversation(NewConversation {
            user_id: None,
            title: Some(title),
            metadata: Some(json!({ "model": model })),
        })
        .await?;

    info!("chat |> conversation created: {}", conversation.id);

    Ok(conversation.id)
}

async fn ensure_conversation(state: &AppState, id: Uuid) -> Result<Uuid, ApiError> {
    state
        .database
        .get_conversation(id)
        .await?
        .map(|conversation| conversation.id)
        .ok_or_else(|| ApiError::NotFound(format!("conversation not found: {}", id)))
}

async fn store_message(
    state: &AppState,
    conversation_id: Uuid,
    role: ChatRole,
    content: &str,
) -> Result<(), ApiError> {
    state
        .database
        .create_message(NewMessage {
            conversation_id,
            role: role.as_str().to_string(),
            content: content.to_string(),
            metadata: None,
        })
        .await?;

    Ok(())
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;

    request.validate()?;

    let conversation_id = match request.conversation_id {
        Some(id) => ensure_conversation(&state, id).await?,
        None => create_conversation(&state, &request).await?,
    };

    for message in request.messages.iter().filter(|m| m.role == ChatRole::User) {
        store_message(&state, conversation_id, ChatRole::User, &message.content).await?;
    }

    let call = AiCall::start(
        "chat",
        state.ai.model(),
        Some(conversation_id.to_string()),
        Some(json!({ "messages": request.messages })),
    );

    let reply = match state.ai.generate_response(&request.messages).await {
        Ok(reply) => {
            call.finish(
                state.database.as_ref(),
                Some(json!({ "message": reply })),
                None,
            )
            .await;

            reply
        }
        Err(err) => {
            call.finish(state.database.as_ref(), None, Some(err.to_string()))
                .await;

            return Err(err.into());
        }
    };

    store_message(&state, conversation_id, ChatRole::Assistant, &reply).await?;

    info!("chat |> reply: {}", conversation_id);

    Ok(Json(ChatResponse {
        message: reply,
        timestamp: format_timestamp(&Utc::now()),
        conversation_id,
    }))
}

fn event(data: serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().data(data.to_string()))
}

pub async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<ReceiverStream<Result<Event, Infallible>>>, ApiError> {
    let Json(request) = payload?;

    request.validate()?;

    if let Some(id) = request.conversation_id {
        ensure_conversation(&state, id).await?;
    }

    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(100);

        let call = AiCall::start(
            "chat_stream",
            state.ai.model(),
            request.conversation_id.map(|id| id.to_string()),
            Some(json!({ "messages": request.messages })),
        );

        let ai = state.ai.clone();
        let messages = request.messages.clone();

        let generation =
            tokio::spawn(async move { ai.generate_response_stream(&messages, delta_tx).await });

        let mut reply = String::new();

        while let Some(delta) = delta_rx.recv().await {
            reply.push_str(&delta);

            if tx.send(event(json!({ "content": delta }))).await.is_err() {
                break;
            }
        }

        drop(delta_rx);

        let result = match generation.await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(err) => Err(format!("stream task failed: {}", err)),
        };

        let final_event = match result {
            Ok(()) => {
                call.finish(
                    state.database.as_ref(),
                    Some(json!({ "message": reply })),
                    None,
                )
                .await;

                match persist_stream(&state, &request, &reply).await {
                    Ok(conversation_id) => {
                        json!({ "type": "done", "conversationId": conversation_id })
                    }
                    Err(err) => {
                        error!("chat |> failed to store streamed reply: {}", err);

                        json!({ "error": "internal server error" })
                    }
                }
            }
            Err(err) => {
                error!("chat |> stream failed: {}", err);

                call.finish(state.database.as_ref(), None, Some(err)).await;

                json!({ "error": "internal server error" })
            }
        };

        if tx.send(event(final_event)).await.is_err() {
            info!("chat |> stream client disconnected");
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)))
}

async fn persist_stream(
    state: &AppState,
    request: &ChatRequest,
    reply: &str,
) -> Result<Uuid, ApiError> {
    let conversation_id = match request.conversation_id {
        Some(id) => id,
        None => create_conversation(state, request).await?,
    };

    let question = request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == ChatRole::User);

    if let Some(question) = question {
        store_message(state, conversation_id, ChatRole::User, &question.content).await?;
    }

    store_message(state, conversation_id, ChatRole::Assistant, reply).await?;

    Ok(conversation_id)
}

pub async fn history(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Path(id) = id?;

    let messages = state.database.get_messages(id).await?;

    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{
        start::testing::{json_request, read_json, TestApp},
        store::database::DatabaseBackend,
    };
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[test]
    fn titles() {
        assert_eq!(conversation_title(None), "New Conversation");
        assert_eq!(conversation_title(Some("")), "New Conversation");
        assert_eq!(conversation_title(Some("hello there")), "hello there");
        assert_eq!(
            conversation_title(Some("one two three four five six seven")),
            "one two three four five..."
        );
        assert_eq!(
            conversation_title(Some("one two three four five")),
            "one two three four five"
        );
    }

    #[tokio::test]
    async fn chat_creates_conversation_and_stores_messages() {
        let app = TestApp::new().await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "show me the stats please now" }] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = read_json(response).await;

        assert_eq!(body["message"], "scripted reply");

        let conversation_id: Uuid = body["conversationId"].as_str().unwrap().parse().unwrap();

        let conversation = app
            .database
            .get_conversation(conversation_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(conversation.title.as_deref(), Some("show me the stats please..."));
        assert_eq!(conversation.metadata, Some(json!({ "model": "gpt-4o" })));

        let messages = app.database.get_messages(conversation_id).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "scripted reply");

        let logs = app.database.ai_logs().await;

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].request_type, "chat");
        assert_eq!(logs[0].status, "success");
    }

    #[tokio::test]
    async fn chat_unknown_conversation_is_not_found() {
        let app = TestApp::new().await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                json!({
                    "messages": [{ "role": "user", "content": "hi" }],
                    "conversationId": Uuid::new_v4(),
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chat_rejects_invalid_bodies() {
        let app = TestApp::new().await;

        for body in [
            json!({ "messages": [] }),
            json!({ "messages": [{ "role": "robot", "content": "hi" }] }),
            json!({ "messages": [{ "role": "user", "content": "hi" }], "conversationId": "nope" }),
            json!({ "messages": [{ "role": "user", "content": "hi" }], "extra": true }),
        ] {
            let response = app
                .router()
                .oneshot(json_request("POST", "/api/chat", body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let body = read_json(response).await;

            assert_eq!(body["statusCode"], 400);
        }
    }

    #[tokio::test]
    async fn chat_provider_failure_is_internal_error() {
        let app = TestApp::failing().await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "hi" }] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let logs = app.database.ai_logs().await;

        assert_eq!(logs[0].status, "error");
    }

    #[tokio::test]
    async fn stream_sends_deltas_then_done() {
        let app = TestApp::new().await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/chat/stream",
                json!({ "messages": [{ "role": "user", "content": "hello" }] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        let events = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str::<serde_json::Value>(data).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(events[0], json!({ "content": "scripted " }));
        assert_eq!(events[1], json!({ "content": "reply" }));
        assert_eq!(events[2]["type"], "done");

        let conversation_id: Uuid = events[2]["conversationId"].as_str().unwrap().parse().unwrap();

        let messages = app.database.get_messages(conversation_id).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "scripted reply");
    }

    #[tokio::test]
    async fn stream_stores_last_user_turn_of_history() {
        let app = TestApp::new().await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/chat/stream",
                json!({
                    "messages": [
                        { "role": "user", "content": "first question" },
                        { "role": "assistant", "content": "first answer" },
                        { "role": "user", "content": "follow up" },
                        { "role": "assistant", "content": "earlier answer" },
                    ]
                }),
            ))
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        let done = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str::<serde_json::Value>(data).unwrap())
            .find(|event| event["type"] == "done")
            .unwrap();

        let conversation_id: Uuid = done["conversationId"].as_str().unwrap().parse().unwrap();

        let stored = app
            .database
            .get_messages(conversation_id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| (message.role, message.content))
            .collect::<Vec<_>>();

        assert_eq!(
            stored,
            vec![
                ("user".to_string(), "follow up".to_string()),
                ("assistant".to_string(), "scripted reply".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn stream_failure_sends_error_event() {
        let app = TestApp::failing().await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/chat/stream",
                json!({ "messages": [{ "role": "user", "content": "hello" }] }),
            ))
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains(r#"data: {"error":"internal server error"}"#));
        assert_eq!(app.database.stats().await.unwrap().total_conversations, 0);
    }

    #[tokio::test]
    async fn history_lists_messages_in_order() {
        let app = TestApp::new().await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "first" }] }),
            ))
            .await
            .unwrap();

        let conversation_id = read_json(response).await["conversationId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .router()
            .oneshot(json_request(
                "GET",
                &format!("/api/chat/conversation/{}/history", conversation_id),
                serde_json::Value::Null,
            ))
            .await
            .unwrap();

        let body = read_json(response).await;
        let messages = body.as_array().unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "first");
        assert_eq!(messages[0]["conversationId"], conversation_id);
        assert_eq!(messages[1]["role"], "assistant");
    }
}
