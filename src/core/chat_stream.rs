use std::time::Duration;

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ChatMessage, ChatRequest, ChatResponse, CompletionResponse};
use crate::core::config::API_KEY_ENV;
use crate::core::error::ChatError;
use crate::utils::url::construct_api_url;

/// Messages delivered from an exchange worker back to the chat loop.
///
/// Chunks arrive strictly in decode order. `End` carries the fully assembled
/// reply and always follows the last chunk of its exchange.
#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    Error(ChatError),
    End(String),
}

/// Inter-character delay when replaying a buffered streaming body.
const REPLAY_DELAY: Duration = Duration::from_millis(20);
/// Inter-character delay when typing out the non-streaming retry's reply.
const RETRY_DELAY: Duration = Duration::from_millis(30);

type StreamSender = mpsc::UnboundedSender<(StreamMessage, u64)>;

enum LineOutcome {
    Fragment(String),
    Done,
    Ignored,
    Malformed(String),
}

/// Inspect one line of the response body. Only `data:` lines carry events; a
/// payload that fails to parse signals that the backend did not honor
/// streaming and the buffered body should be decoded as a whole instead.
fn process_event_line(line: &str) -> LineOutcome {
    let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
        return LineOutcome::Ignored;
    };
    if payload.is_empty() {
        return LineOutcome::Ignored;
    }
    if payload == "[DONE]" {
        return LineOutcome::Done;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(event) => {
            if let Some(choice) = event.choices.first() {
                if let Some(content) = &choice.delta.content {
                    return LineOutcome::Fragment(content.clone());
                }
            }
            LineOutcome::Ignored
        }
        Err(err) => LineOutcome::Malformed(err.to_string()),
    }
}

fn extract_completion_text(body: &[u8]) -> Result<String, ChatError> {
    let response: CompletionResponse =
        serde_json::from_slice(body).map_err(|e| ChatError::Decode(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ChatError::Decode("response carries no choices".to_string()))
}

/// Decode the buffered body as one completion object. The complete buffer is
/// tried first, then the remainder after the line that broke event decoding,
/// which is what a line-iterating transport would have left unread.
fn whole_body_text(raw: &[u8], resume_at: usize) -> Result<String, ChatError> {
    if raw.is_empty() {
        return Err(ChatError::Decode("empty response body".to_string()));
    }
    extract_completion_text(raw).or_else(|err| {
        if resume_at > 0 && resume_at < raw.len() {
            extract_completion_text(&raw[resume_at..])
        } else {
            Err(err)
        }
    })
}

/// Parameters for one complete exchange: prompt in, fragment stream out.
pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub cancel_token: CancellationToken,
    pub exchange_id: u64,
}

#[derive(Clone)]
pub struct ChatStreamService {
    tx: StreamSender,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Run one exchange on a background task. Messages arrive on the receiver
    /// returned by [`ChatStreamService::new`], tagged with the exchange id.
    pub fn spawn_exchange(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let cancel_token = params.cancel_token.clone();
            tokio::select! {
                _ = run_exchange(params, tx) => {}
                _ = cancel_token.cancelled() => {}
            }
        });
    }
}

/// The attempts an exchange makes, in order. The streaming attempt downgrades
/// to the non-streaming one exactly once; a second failure is terminal.
#[derive(Clone, Copy)]
enum Attempt {
    Streaming,
    NonStreaming,
}

async fn run_exchange(params: StreamParams, tx: StreamSender) {
    if params.api_key.trim().is_empty() {
        let error = ChatError::Config(format!("{API_KEY_ENV} is not set"));
        let _ = tx.send((StreamMessage::Error(error), params.exchange_id));
        return;
    }

    let mut attempt = Attempt::Streaming;
    loop {
        let outcome = match attempt {
            Attempt::Streaming => streaming_attempt(&params, &tx).await,
            Attempt::NonStreaming => non_streaming_attempt(&params, &tx).await,
        };

        match (outcome, attempt) {
            (Ok(()), _) => return,
            (Err(err), Attempt::Streaming) => {
                debug!("streaming attempt failed ({err}); retrying without stream");
                attempt = Attempt::NonStreaming;
            }
            (Err(err), Attempt::NonStreaming) => {
                warn!("non-streaming retry failed: {err}");
                let _ = tx.send((StreamMessage::Error(err), params.exchange_id));
                return;
            }
        }
    }
}

fn build_request(params: &StreamParams, stream: Option<bool>) -> ChatRequest {
    ChatRequest {
        model: params.model.clone(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: params.prompt.clone(),
        }],
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        stream,
    }
}

async fn send_request(
    params: &StreamParams,
    stream: Option<bool>,
) -> Result<reqwest::Response, ChatError> {
    let url = construct_api_url(&params.base_url, "chat/completions");
    let response = params
        .client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", params.api_key))
        .json(&build_request(params, stream))
        .send()
        .await
        .map_err(|e| ChatError::Connection(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ChatError::Http {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

async fn streaming_attempt(params: &StreamParams, tx: &StreamSender) -> Result<(), ChatError> {
    let response = send_request(params, Some(true)).await?;

    let mut stream = response.bytes_stream();
    // The entire body is retained so the whole-body tier can replay it
    // without touching the connection again.
    let mut raw: Vec<u8> = Vec::new();
    let mut cursor = 0usize;
    let mut assembled = String::new();
    let mut fallback_from: Option<usize> = None;

    'receive: while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                if assembled.is_empty() {
                    return Err(ChatError::Connection(e.to_string()));
                }
                // A drop after partial content counts as end of stream, so
                // the reply seen on screen is the reply that gets committed.
                warn!("stream interrupted after partial reply: {e}");
                break 'receive;
            }
        };
        raw.extend_from_slice(&bytes);

        while let Some(pos) = memchr(b'\n', &raw[cursor..]) {
            let end = cursor + pos;
            let line = match std::str::from_utf8(&raw[cursor..end]) {
                Ok(s) => s.trim(),
                Err(e) => {
                    warn!("invalid UTF-8 in stream: {e}");
                    cursor = end + 1;
                    continue;
                }
            };

            match process_event_line(line) {
                LineOutcome::Ignored => {}
                LineOutcome::Fragment(text) => {
                    assembled.push_str(&text);
                    let _ = tx.send((StreamMessage::Chunk(text), params.exchange_id));
                }
                LineOutcome::Done => {
                    let _ = tx.send((StreamMessage::End(assembled), params.exchange_id));
                    return Ok(());
                }
                LineOutcome::Malformed(err) => {
                    debug!("stream payload not decodable ({err}); replaying buffered body");
                    fallback_from = Some(end + 1);
                    break 'receive;
                }
            }
            cursor = end + 1;
        }
    }

    if let Some(resume_at) = fallback_from {
        // The backend did not honor streaming. Finish buffering the body and
        // hand it to the whole-body tier.
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| ChatError::Connection(e.to_string()))?;
            raw.extend_from_slice(&bytes);
        }
        let text = whole_body_text(&raw, resume_at)?;
        type_out(&text, REPLAY_DELAY, tx, params.exchange_id).await;
        let _ = tx.send((StreamMessage::End(text), params.exchange_id));
        return Ok(());
    }

    // Connection closed without a [DONE] marker. A trailing line may still
    // be sitting in the buffer without its newline.
    if cursor < raw.len() {
        if let Ok(line) = std::str::from_utf8(&raw[cursor..]) {
            if let LineOutcome::Fragment(text) = process_event_line(line.trim()) {
                assembled.push_str(&text);
                let _ = tx.send((StreamMessage::Chunk(text), params.exchange_id));
            }
        }
    }

    if !assembled.is_empty() {
        let _ = tx.send((StreamMessage::End(assembled), params.exchange_id));
        return Ok(());
    }

    // Nothing streamed at all. Before failing the attempt, try the body as
    // one completion object; some backends ignore the stream flag entirely.
    let text = whole_body_text(&raw, 0)?;
    type_out(&text, REPLAY_DELAY, tx, params.exchange_id).await;
    let _ = tx.send((StreamMessage::End(text), params.exchange_id));
    Ok(())
}

async fn non_streaming_attempt(params: &StreamParams, tx: &StreamSender) -> Result<(), ChatError> {
    let response = send_request(params, None).await?;

    let body = response
        .bytes()
        .await
        .map_err(|e| ChatError::Connection(e.to_string()))?;
    let text =
        extract_completion_text(&body).map_err(|e| ChatError::Connection(e.to_string()))?;

    type_out(&text, RETRY_DELAY, tx, params.exchange_id).await;
    let _ = tx.send((StreamMessage::End(text), params.exchange_id));
    Ok(())
}

/// Emit `text` one character at a time so the scrollback still types
/// incrementally when the backend produced the reply in one piece.
async fn type_out(text: &str, delay: Duration, tx: &StreamSender, exchange_id: u64) {
    for ch in text.chars() {
        let _ = tx.send((StreamMessage::Chunk(ch.to_string()), exchange_id));
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
    use mockito::Matcher;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn params_for(base_url: &str, api_key: &str, exchange_id: u64) -> StreamParams {
        StreamParams {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: "test-model".to_string(),
            prompt: "hello".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            cancel_token: CancellationToken::new(),
            exchange_id,
        }
    }

    /// Drain one exchange from the channel: all chunks up to and including
    /// the terminal message.
    async fn collect_exchange(
        rx: &mut UnboundedReceiver<(StreamMessage, u64)>,
    ) -> (Vec<String>, Option<StreamMessage>) {
        let mut chunks = Vec::new();
        while let Some((message, _)) = rx.recv().await {
            match message {
                StreamMessage::Chunk(text) => chunks.push(text),
                terminal => return (chunks, Some(terminal)),
            }
        }
        (chunks, None)
    }

    #[test]
    fn event_lines_decode_with_both_spacing_variants() {
        let spaced = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        let compact = r#"data:{"choices":[{"delta":{"content":"World"}}]}"#;

        assert!(matches!(
            process_event_line(spaced),
            LineOutcome::Fragment(text) if text == "Hello"
        ));
        assert!(matches!(
            process_event_line(compact),
            LineOutcome::Fragment(text) if text == "World"
        ));
    }

    #[test]
    fn done_sentinel_ends_decoding() {
        assert!(matches!(process_event_line("data: [DONE]"), LineOutcome::Done));
        assert!(matches!(process_event_line("data:[DONE]"), LineOutcome::Done));
    }

    #[test]
    fn non_event_lines_are_ignored() {
        assert!(matches!(process_event_line(""), LineOutcome::Ignored));
        assert!(matches!(
            process_event_line(": keep-alive"),
            LineOutcome::Ignored
        ));
        assert!(matches!(
            process_event_line(r#"{"choices":[]}"#),
            LineOutcome::Ignored
        ));
    }

    #[test]
    fn malformed_payload_requests_the_fallback_tier() {
        assert!(matches!(
            process_event_line("data: not-json"),
            LineOutcome::Malformed(_)
        ));
    }

    #[test]
    fn whole_body_text_recovers_the_remainder_after_a_broken_line() {
        let raw = b"data: not-json\n{\"choices\":[{\"message\":{\"content\":\"Hi\"}}]}";
        assert_eq!(whole_body_text(raw, 15).unwrap(), "Hi");
    }

    #[test]
    fn whole_body_text_rejects_a_body_without_choices() {
        let raw = br#"{"choices":[]}"#;
        assert!(matches!(
            whole_body_text(raw, 0),
            Err(ChatError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn emits_fragments_from_a_well_formed_event_stream() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
            "\n",
            "data: [DONE]\n",
        );
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_exchange(params_for(&server.url(), "test-key", 1));

        let (chunks, terminal) = collect_exchange(&mut rx).await;
        mock.assert_async().await;
        assert_eq!(chunks, vec!["Hi".to_string()]);
        assert!(matches!(terminal, Some(StreamMessage::End(text)) if text == "Hi"));
    }

    #[tokio::test]
    async fn malformed_stream_replays_the_buffered_body_as_characters() {
        let mut server = mockito::Server::new_async().await;
        let body = "data: not-json\n{\"choices\":[{\"message\":{\"content\":\"Hi\"}}]}";
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_exchange(params_for(&server.url(), "test-key", 2));

        let (chunks, terminal) = collect_exchange(&mut rx).await;
        mock.assert_async().await;
        assert_eq!(chunks, vec!["H".to_string(), "i".to_string()]);
        assert!(matches!(terminal, Some(StreamMessage::End(text)) if text == "Hi"));
    }

    #[tokio::test]
    async fn missing_credential_fails_without_any_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_exchange(params_for(&server.url(), "", 3));

        let (chunks, terminal) = collect_exchange(&mut rx).await;
        mock.assert_async().await;
        assert!(chunks.is_empty());
        assert!(matches!(
            terminal,
            Some(StreamMessage::Error(ChatError::Config(_)))
        ));
    }

    #[tokio::test]
    async fn server_error_triggers_exactly_one_non_streaming_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_exchange(params_for(&server.url(), "test-key", 4));

        let (chunks, terminal) = collect_exchange(&mut rx).await;
        mock.assert_async().await;
        assert!(chunks.is_empty());
        assert!(matches!(
            terminal,
            Some(StreamMessage::Error(ChatError::Http { status: 500 }))
        ));
    }

    #[tokio::test]
    async fn retry_without_stream_succeeds_after_a_streaming_failure() {
        let mut server = mockito::Server::new_async().await;
        let streaming_mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"stream": true})))
            .with_status(500)
            .create_async()
            .await;
        let retry_mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Json(json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "hello"}],
                "max_tokens": 1000,
                "temperature": 0.7,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":"Hey"}}]}"#)
            .create_async()
            .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_exchange(params_for(&server.url(), "test-key", 5));

        let (chunks, terminal) = collect_exchange(&mut rx).await;
        streaming_mock.assert_async().await;
        retry_mock.assert_async().await;
        assert_eq!(
            chunks,
            vec!["H".to_string(), "e".to_string(), "y".to_string()]
        );
        assert!(matches!(terminal, Some(StreamMessage::End(text)) if text == "Hey"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_a_connection_error() {
        let (service, mut rx) = ChatStreamService::new();
        service.spawn_exchange(params_for("http://127.0.0.1:9", "test-key", 6));

        let (chunks, terminal) = collect_exchange(&mut rx).await;
        assert!(chunks.is_empty());
        assert!(matches!(
            terminal,
            Some(StreamMessage::Error(ChatError::Connection(_)))
        ));
    }

    #[tokio::test]
    async fn stream_without_done_marker_ends_on_connection_close() {
        let mut server = mockito::Server::new_async().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n";
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let (service, mut rx) = ChatStreamService::new();
        service.spawn_exchange(params_for(&server.url(), "test-key", 7));

        let (chunks, terminal) = collect_exchange(&mut rx).await;
        mock.assert_async().await;
        assert_eq!(chunks, vec!["Hi".to_string()]);
        assert!(matches!(terminal, Some(StreamMessage::End(text)) if text == "Hi"));
    }
}
