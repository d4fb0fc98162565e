use crate::command::start::ai::{
    parse_extraction,
    sse::{SseDecoder, SseEvent},
    tools::Toolbox,
    AiError, AiProvider, ChatMessage, DocumentAnalysis,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

const MAX_TOOL_ROUNDS: usize = 5;
const TEMPERATURE: f32 = 0.7;

const IMAGE_CONFIDENCE: f64 = 0.85;
const TEXT_CONFIDENCE: f64 = 0.75;

const SYSTEM_PROMPT: &str = "You are an AI assistant specialised in data analysis and report generation for the Ikated system.

Available tools:
- getSystemStats: overall statistics (users, conversations, messages, documents, forms)
- getRecentUsers: the most recently registered users
- generateUsersReport: export every user to CSV
- generateConversationsReport: export every conversation to CSV
- generateDocumentsReport: export every processed document to CSV

Guidelines:
1. For quick numbers, call getSystemStats first.
2. For complete reports, call the CSV generation tools.
3. Always give the download link when a CSV is generated.
4. CSV files are available for one hour and are deleted after the first download.
5. Explain what the data means and suggest useful follow-up analyses.";

const EXTRACTION_PROMPT: &str = "Analyse the following document and extract the personal information it contains.
Return a JSON object with the fields you find:

- nomeCompleto: full name
- cpf: CPF (format XXX.XXX.XXX-XX)
- rg: RG
- dataNascimento: date of birth (format YYYY-MM-DD)
- email: email address
- telefone: phone number
- cep: CEP (format XXXXX-XXX)
- endereco: street address
- numero: house number
- bairro: district
- cidade: city
- estado: state (two-letter code)

Leave out any field you cannot find.
Return only the JSON, without explanations.";

#[derive(Clone, Debug, Deserialize, Serialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: FunctionCall,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn new(role: &str, content: Value) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    fn tool(tool_call_id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(Value::String(content)),
            tool_calls: vec![],
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }

    fn text(&self) -> String {
        match &self.content {
            Some(Value::String(text)) => text.clone(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

/// Chat-completions client with tool calling and streaming.
#[derive(Clone)]
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    client: Client,
    model: String,
    tools: Toolbox,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        tools: Toolbox,
    ) -> Result<Self, AiError> {
        let client = Client::builder()
            .user_agent(concat!("ikated/", env!("CARGO_PKG_VERSION")))
            .build()?;

        if api_key.is_empty() {
            warn!("chat |> no api key configured, provider calls will fail");
        }

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            model,
            tools,
        })
    }

    fn conversation(messages: &[ChatMessage]) -> Vec<WireMessage> {
        let mut wire = vec![WireMessage::new(
            "system",
            Value::String(SYSTEM_PROMPT.to_string()),
        )];

        for message in messages {
            wire.push(WireMessage::new(
                message.role.as_str(),
                Value::String(message.content.clone()),
            ));
        }

        wire
    }

    async fn send(&self, body: &Value) -> Result<Response, AiError> {
        if self.api_key.is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn complete(
        &self,
        messages: &[WireMessage],
        with_tools: bool,
    ) -> Result<WireMessage, AiError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": TEMPERATURE,
        });

        if with_tools {
            body["tools"] = Toolbox::definitions();
        }

        let response = self
            .send(&body)
            .await?
            .json::<CompletionResponse>()
            .await
            .map_err(|err| AiError::InvalidResponse(err.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| AiError::InvalidResponse("no choices returned".to_string()))
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_response(&self, messages: &[ChatMessage]) -> Result<String, AiError> {
        let mut wire = Self::conversation(messages);

        for _ in 0..MAX_TOOL_ROUNDS {
            let message = self.complete(&wire, true).await?;

            if message.tool_calls.is_empty() {
                return Ok(message.text());
            }

            let calls = message.tool_calls.clone();

            wire.push(message);

            for call in calls {
                let output = self
                    .tools
                    .call(&call.function.name, &call.function.arguments)
                    .await;

                wire.push(WireMessage::tool(&call.id, output.to_string()));
            }
        }

        debug!("chat |> tool round limit reached, asking for a final answer");

        let message = self.complete(&wire, false).await?;

        Ok(message.text())
    }

    async fn generate_response_stream(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<(), AiError> {
        let body = json!({
            "model": self.model,
            "messages": Self::conversation(messages),
            "temperature": TEMPERATURE,
            "stream": true,
        });

        let stream = self.send(&body).await?.bytes_stream();

        tokio::pin!(stream);

        let mut decoder = SseDecoder::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            for event in decoder.push(&chunk) {
                let data = match event {
                    SseEvent::Done => return Ok(()),
                    SseEvent::Data(data) => data,
                };

                let chunk = serde_json::from_str::<StreamChunk>(&data)
                    .map_err(|err| AiError::InvalidResponse(err.to_string()))?;

                for choice in chunk.choices {
                    let Some(content) = choice.delta.content else {
                        continue;
                    };

                    if content.is_empty() {
                        continue;
                    }

                    tx.send(content).await.map_err(|_| AiError::StreamClosed)?;
                }
            }
        }

        Ok(())
    }

    async fn analyze_document(&self, data: &[u8], mime_type: &str) -> DocumentAnalysis {
        let (content, confidence) = if mime_type.starts_with("image/") {
            let url = format!("data:{};base64,{}", mime_type, STANDARD.encode(data));

            let content = json!([
                { "type": "text", "text": EXTRACTION_PROMPT },
                { "type": "image_url", "image_url": { "url": url } },
            ]);

            (content, IMAGE_CONFIDENCE)
        } else if mime_type.starts_with("text/") || mime_type == "application/json" {
            let text = format!(
                "{}\n\nDocument:\n{}",
                EXTRACTION_PROMPT,
                String::from_utf8_lossy(data)
            );

            (Value::String(text), TEXT_CONFIDENCE)
        } else {
            warn!("documents |> unsupported type for analysis: {}", mime_type);

            return DocumentAnalysis::default();
        };

        let messages = vec![WireMessage::new("user", content)];

        let reply = match self.complete(&messages, false).await {
            Ok(reply) => reply.text(),
            Err(err) => {
                warn!("documents |> analysis failed: {}", err);

                return DocumentAnalysis::default();
            }
        };

        match parse_extraction(&reply) {
            Some(extracted_data) => DocumentAnalysis {
                extracted_data,
                confidence,
                processed_successfully: true,
            },
            None => {
                warn!("documents |> analysis reply was not a JSON object");

                DocumentAnalysis::default()
            }
        }
    }

    fn box_clone(&self) -> Box<dyn AiProvider> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{
        start::ai::ChatRole,
        store::{
            artifacts::DownloadRegistry,
            cache::{Cache, LocalCache},
            database::LocalDatabase,
        },
    };
    use axum::{
        body::{Body, Bytes},
        extract::State,
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio::net::TcpListener;

    fn provider_at(api_key: &str, base_url: &str) -> OpenAiProvider {
        let downloads = DownloadRegistry::new(
            Cache::new(Box::new(LocalCache::new())),
            std::env::temp_dir(),
            Duration::from_secs(3600),
        );

        let tools = Toolbox::new(Box::new(LocalDatabase::new()), downloads);

        OpenAiProvider::new(
            api_key.to_string(),
            base_url.to_string(),
            "gpt-4o".to_string(),
            tools,
        )
        .unwrap()
    }

    fn provider(api_key: &str) -> OpenAiProvider {
        provider_at(api_key, "http://127.0.0.1:9/v1/")
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage {
            role: ChatRole::User,
            content: content.to_string(),
        }
    }

    #[derive(Clone, Copy)]
    enum Script {
        /// Ask for one tool call, then answer once the tool result is in.
        ToolOnce,
        /// Ask for a tool on every round that offers tools.
        ToolForever,
        /// Stream deltas split across chunks, with data after the sentinel.
        Stream,
        /// Answer with extracted data wrapped in a code fence.
        Extraction,
    }

    /// Chat-completions endpoint that records every request body.
    #[derive(Clone)]
    struct Completions {
        requests: Arc<Mutex<Vec<Value>>>,
        script: Script,
    }

    impl Completions {
        fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn reply(content: &str) -> Json<Value> {
        Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }))
    }

    fn tool_request(id: &str) -> Json<Value> {
        Json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": id,
                        "type": "function",
                        "function": { "name": "getSystemStats", "arguments": "{}" }
                    }]
                }
            }]
        }))
    }

    async fn completions(
        State(state): State<Completions>,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        state.requests.lock().unwrap().push(body.clone());

        let last_role = body["messages"]
            .as_array()
            .and_then(|messages| messages.last())
            .map(|message| message["role"].clone())
            .unwrap_or_default();

        match state.script {
            Script::ToolOnce if last_role == "tool" => reply("there are 0 users").into_response(),
            Script::ToolOnce => tool_request("call_1").into_response(),
            Script::ToolForever if body.get("tools").is_some() => {
                tool_request("call_n").into_response()
            }
            Script::ToolForever => reply("final answer").into_response(),
            Script::Extraction => {
                reply("```json\n{\"cpf\": \"123.456.789-00\", \"cidade\": \"Recife\"}\n```")
                    .into_response()
            }
            Script::Stream => {
                let chunks = [
                    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel",
                    "lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n",
                    "\ndata: [DONE]\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
                ]
                .into_iter()
                .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk)))
                .collect::<Vec<_>>();

                (
                    [("content-type", "text/event-stream")],
                    Body::from_stream(tokio_stream::iter(chunks)),
                )
                    .into_response()
            }
        }
    }

    /// Serve a scripted endpoint on a free local port and point a provider
    /// at it.
    async fn serve(script: Script) -> (OpenAiProvider, Completions) {
        let state = Completions {
            requests: Arc::new(Mutex::new(vec![])),
            script,
        };

        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = provider_at("test-key", &format!("http://{}/v1", address));

        (provider, state)
    }

    #[test]
    fn conversation_starts_with_system_prompt() {
        let wire = OpenAiProvider::conversation(&[user("hi")]);

        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
        assert_eq!(wire[1].text(), "hi");
    }

    #[test]
    fn tool_reply_deserializes() {
        let body = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "getSystemStats", "arguments": "{}" }
                    }]
                }
            }]
        }"#;

        let response = serde_json::from_str::<CompletionResponse>(body).unwrap();
        let message = &response.choices[0].message;

        assert_eq!(message.tool_calls[0].function.name, "getSystemStats");
        assert_eq!(message.text(), "");

        let tool = serde_json::to_value(WireMessage::tool("call_1", "{}".to_string())).unwrap();

        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        assert!(tool.get("tool_calls").is_none());
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(provider("key").base_url, "http://127.0.0.1:9/v1");
    }

    #[tokio::test]
    async fn tool_results_are_sent_back_to_the_model() {
        let (provider, completions) = serve(Script::ToolOnce).await;

        let reply = provider.generate_response(&[user("how many users?")]).await.unwrap();

        assert_eq!(reply, "there are 0 users");

        let requests = completions.requests();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["model"], "gpt-4o");
        assert_eq!(requests[0]["temperature"], json!(TEMPERATURE));
        assert_eq!(requests[0]["tools"].as_array().unwrap().len(), 5);

        let messages = requests[1]["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "how many users?");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");

        let output = serde_json::from_str::<Value>(messages[3]["content"].as_str().unwrap()).unwrap();

        assert_eq!(output["success"], true);
        assert_eq!(output["stats"]["totalUsers"], 0);
    }

    #[tokio::test]
    async fn tool_rounds_are_limited() {
        let (provider, completions) = serve(Script::ToolForever).await;

        let reply = provider.generate_response(&[user("loop")]).await.unwrap();

        assert_eq!(reply, "final answer");

        let requests = completions.requests();

        assert_eq!(requests.len(), MAX_TOOL_ROUNDS + 1);
        assert!(requests[..MAX_TOOL_ROUNDS]
            .iter()
            .all(|request| request.get("tools").is_some()));
        assert!(requests[MAX_TOOL_ROUNDS].get("tools").is_none());

        let tool_messages = requests[MAX_TOOL_ROUNDS]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|message| message["role"] == "tool")
            .count();

        assert_eq!(tool_messages, MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn stream_relays_deltas_until_done() {
        let (provider, completions) = serve(Script::Stream).await;

        let (tx, mut rx) = mpsc::channel(16);

        provider
            .generate_response_stream(&[user("hi")], tx)
            .await
            .unwrap();

        let mut deltas = vec![];

        while let Some(delta) = rx.recv().await {
            deltas.push(delta);
        }

        assert_eq!(deltas, vec!["Hello".to_string(), " world".to_string()]);

        let requests = completions.requests();

        assert_eq!(requests[0]["stream"], true);
        assert!(requests[0].get("tools").is_none());
    }

    #[tokio::test]
    async fn analysis_reads_fenced_json_reply() {
        let (provider, completions) = serve(Script::Extraction).await;

        let analysis = provider
            .analyze_document(b"Maria, Recife", "text/plain")
            .await;

        assert!(analysis.processed_successfully);
        assert_eq!(analysis.confidence, TEXT_CONFIDENCE);
        assert_eq!(analysis.extracted_data.cpf.as_deref(), Some("123.456.789-00"));
        assert_eq!(analysis.extracted_data.cidade.as_deref(), Some("Recife"));

        let analysis = provider.analyze_document(b"\x89PNG", "image/png").await;

        assert_eq!(analysis.confidence, IMAGE_CONFIDENCE);

        let requests = completions.requests();
        let image = &requests[1]["messages"][0]["content"][1]["image_url"]["url"];

        assert!(image
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn missing_api_key_fails_fast() {
        let provider = provider("");

        let result = provider.generate_response(&[user("hi")]).await;

        assert!(matches!(result, Err(AiError::MissingApiKey)));

        let analysis = provider.analyze_document(b"hello", "text/plain").await;

        assert!(!analysis.processed_successfully);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[tokio::test]
    async fn unsupported_documents_are_not_processed() {
        let analysis = provider("key")
            .analyze_document(b"%PDF-1.7", "application/pdf")
            .await;

        assert_eq!(analysis, DocumentAnalysis::default());
    }
}
