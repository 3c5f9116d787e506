use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use parley::chat::{ChatSession, TurnOutcome};
use parley::types::{ChatCompletionRequest, Message, ReasoningEffort, RequestConfig};
use parley::{
    ChatClient, CompletionBackend, FileStore, PersistenceGateway, Preferences, StateKey,
    TranscriptBuffer,
};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

const HEL: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n";
const LO_DONE: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n";

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
struct ScriptedResponse {
    status: u16,
    content_type: &'static str,
    extra_headers: Vec<(&'static str, &'static str)>,
    chunks: Vec<ResponseChunk>,
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    head: String,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

struct ScriptedServer {
    endpoint: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let request_count = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let endpoint = format!("http://{addr}/v1/chat/completions");

        let handle = tokio::spawn({
            let requests = Arc::clone(&requests);
            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let scripts = Arc::clone(&scripts);
                    let request_count = Arc::clone(&request_count);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, request_count, requests).await;
                    });
                }
            }
        });

        Self {
            endpoint,
            requests,
            handle,
        }
    }

    fn client(&self) -> ChatClient {
        self.client_with_timeout(Duration::from_secs(5))
    }

    fn client_with_timeout(&self, timeout: Duration) -> ChatClient {
        ChatClient::with_options(Some(&self.endpoint), Some(timeout)).expect("client")
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn response_stream(chunks: &[&[u8]]) -> ScriptedResponse {
    ScriptedResponse {
        status: 200,
        content_type: "text/event-stream",
        extra_headers: Vec::new(),
        chunks: chunks
            .iter()
            .map(|bytes| ResponseChunk {
                delay_ms: 20,
                bytes: bytes.to_vec(),
            })
            .collect(),
    }
}

fn response_text(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse {
        status,
        content_type: "text/plain",
        extra_headers: Vec::new(),
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn preferences(api_key: &str, model: &str) -> Preferences {
    Preferences {
        api_key: Some(api_key.to_string()),
        system_prompt: String::new(),
        model: model.to_string(),
        reasoning_effort: ReasoningEffort::Medium,
    }
}

#[tokio::test]
async fn streams_reply_token_by_token() {
    let server =
        ScriptedServer::new(vec![response_stream(&[HEL.as_bytes(), LO_DONE.as_bytes()])]).await;
    let mut session = ChatSession::new(
        server.client(),
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-mini"),
    );
    let mut out = TranscriptBuffer::new();

    let outcome = session.send("hi", &mut out).await;

    match outcome {
        TurnOutcome::Completed { content } => assert_eq!(content, "Hello"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(out.tokens().concat(), "Hello");
    assert_eq!(
        session.conversation().snapshot(),
        vec![Message::user("hi"), Message::assistant("Hello")]
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(
        request.head.starts_with("POST /v1/chat/completions "),
        "{}",
        request.head
    );
    assert_eq!(
        request.header("authorization").as_deref(),
        Some("Bearer sk-test")
    );
    assert_eq!(
        request.header("content-type").as_deref(),
        Some("application/json")
    );
    let body = request.json();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["stream"], true);
    assert_eq!(body["reasoning_effort"], "medium");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn server_error_is_rendered_without_assistant_turn() {
    let server = ScriptedServer::new(vec![response_text(500, "rate limited")]).await;
    let mut session = ChatSession::new(
        server.client(),
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-mini"),
    );
    let mut out = TranscriptBuffer::new();

    let outcome = session.send("hi", &mut out).await;

    match outcome {
        TurnOutcome::Failed(err) => {
            assert_eq!(err.status_code(), Some(500));
            assert!(err.is_server_error());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let text = out.text();
    assert!(text.contains("500"), "{text}");
    assert!(text.contains("rate limited"), "{text}");
    assert_eq!(session.conversation().snapshot(), vec![Message::user("hi")]);
}

#[tokio::test]
async fn error_response_carries_request_id() {
    let mut response = response_text(429, "slow down");
    response.extra_headers.push(("x-request-id", "req_123"));
    let server = ScriptedServer::new(vec![response]).await;
    let config = RequestConfig::new("gpt-4o-mini", ReasoningEffort::Low, "sk-test");
    let request = ChatCompletionRequest::new(&config, vec![Message::user("hi")]);

    let err = match server.client().open_stream(&request, "sk-test").await {
        Ok(_) => panic!("expected an error response"),
        Err(err) => err,
    };

    assert!(err.is_rate_limit());
    assert_eq!(err.request_id(), Some("req_123"));
    assert!(err.to_string().contains("slow down"));
}

#[tokio::test]
async fn search_models_omit_reasoning_effort() {
    let server = ScriptedServer::new(vec![response_stream(&[HEL.as_bytes()])]).await;
    let mut session = ChatSession::new(
        server.client(),
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-search-preview"),
    );
    let mut out = TranscriptBuffer::new();

    assert!(session.send("hi", &mut out).await.is_completed());

    let body = server.requests()[0].json();
    assert_eq!(body["model"], "gpt-4o-search-preview");
    assert!(body.get("reasoning_effort").is_none(), "{body}");
}

#[tokio::test]
async fn frames_split_mid_line_and_mid_character() {
    let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
    // Split inside the two-byte 'é'.
    let split = frame
        .iter()
        .position(|&b| b == 0xC3)
        .expect("frame contains é")
        + 1;
    let server = ScriptedServer::new(vec![response_stream(&[
        &frame[..10],
        &frame[10..split],
        &frame[split..],
        b"data: not json\n",
        LO_DONE.as_bytes(),
    ])])
    .await;
    let mut session = ChatSession::new(
        server.client(),
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-mini"),
    );
    let mut out = TranscriptBuffer::new();

    let outcome = session.send("hi", &mut out).await;

    match outcome {
        TurnOutcome::Completed { content } => assert_eq!(content, "cafélo"),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn invalid_utf8_frame_is_skipped_mid_reply() {
    let server = ScriptedServer::new(vec![response_stream(&[
        HEL.as_bytes(),
        b"data: {\"choices\":[{\"delta\":{\"content\":\"\xff\xfe\"}}]}\n\n",
        LO_DONE.as_bytes(),
    ])])
    .await;
    let mut session = ChatSession::new(
        server.client(),
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-mini"),
    );
    let mut out = TranscriptBuffer::new();

    let outcome = session.send("hi", &mut out).await;

    match outcome {
        TurnOutcome::Completed { content } => assert_eq!(content, "Hello"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        session.conversation().snapshot(),
        vec![Message::user("hi"), Message::assistant("Hello")]
    );
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    // Accept and read the request, then never answer.
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = read_request(&mut socket).await;
            held.push(socket);
        }
    });
    let client = ChatClient::with_options(
        Some(&format!("http://{addr}/v1/chat/completions")),
        Some(Duration::from_secs(1)),
    )
    .expect("client");
    let mut session = ChatSession::new(
        client,
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-mini"),
    );
    let mut out = TranscriptBuffer::new();

    let started = std::time::Instant::now();
    let outcome = session.send("hi", &mut out).await;
    let elapsed = started.elapsed();
    silent.abort();

    match outcome {
        TurnOutcome::Failed(err) => assert!(err.is_timeout(), "{err:?}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");
    assert!(out.text().contains("Error:"));
    assert_eq!(session.conversation().snapshot(), vec![Message::user("hi")]);
}

#[tokio::test]
async fn slow_body_outlives_the_timeout() {
    let response = ScriptedResponse {
        status: 200,
        content_type: "text/event-stream",
        extra_headers: Vec::new(),
        chunks: vec![
            ResponseChunk {
                delay_ms: 0,
                bytes: HEL.as_bytes().to_vec(),
            },
            ResponseChunk {
                delay_ms: 1500,
                bytes: LO_DONE.as_bytes().to_vec(),
            },
        ],
    };
    let server = ScriptedServer::new(vec![response]).await;
    let mut session = ChatSession::new(
        server.client_with_timeout(Duration::from_secs(1)),
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-mini"),
    );
    let mut out = TranscriptBuffer::new();

    let outcome = session.send("hi", &mut out).await;

    match outcome {
        TurnOutcome::Completed { content } => assert_eq!(content, "Hello"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(out.tokens(), vec!["Hel", "lo"]);
}

#[tokio::test]
async fn connection_refused_is_rendered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client = ChatClient::with_options(
        Some(&format!("http://{addr}/v1/chat/completions")),
        Some(Duration::from_secs(5)),
    )
    .expect("client");
    let mut session = ChatSession::new(
        client,
        PersistenceGateway::in_memory(),
        preferences("sk-test", "gpt-4o-mini"),
    );
    let mut out = TranscriptBuffer::new();

    let outcome = session.send("hi", &mut out).await;

    match outcome {
        TurnOutcome::Failed(err) => assert!(err.is_connection(), "{err:?}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(out.text().contains("Error:"));
    assert_eq!(session.conversation().snapshot(), vec![Message::user("hi")]);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server =
        ScriptedServer::new(vec![response_stream(&[HEL.as_bytes(), LO_DONE.as_bytes()])]).await;

    {
        let gateway = PersistenceGateway::with_background_writes(Arc::new(
            FileStore::open(dir.path()).expect("open"),
        ));
        let mut session = ChatSession::new(
            server.client(),
            gateway.clone(),
            preferences("sk-test", "gpt-4o-mini"),
        );
        session.set_model("o3-mini");
        session.set_reasoning_effort(ReasoningEffort::High);
        session.set_api_key(Some("sk-stored".to_string()));
        let mut out = TranscriptBuffer::new();
        assert!(session.send("hi", &mut out).await.is_completed());
        drop(session);
        gateway.flush().await;
    }

    let gateway = PersistenceGateway::new(Arc::new(FileStore::open(dir.path()).expect("reopen")));
    let defaults = Preferences {
        api_key: None,
        system_prompt: String::new(),
        model: "gpt-4o-mini".to_string(),
        reasoning_effort: ReasoningEffort::Medium,
    };
    let restored = gateway.load_preferences(&defaults);
    assert_eq!(restored.model, "o3-mini");
    assert_eq!(restored.reasoning_effort, ReasoningEffort::High);
    assert_eq!(restored.api_key.as_deref(), Some("sk-stored"));
    assert_eq!(gateway.load_text(StateKey::Model, ""), "o3-mini");

    let session = ChatSession::new(server.client(), gateway, restored);
    assert_eq!(
        session.conversation().snapshot(),
        vec![Message::user("hi"), Message::assistant("Hello")]
    );
    let mut out = TranscriptBuffer::new();
    session.render_history(&mut out);
    let text = out.text();
    assert!(text.contains("You:\nhi\n"), "{text}");
    assert!(text.contains("Assistant:\nHello\n"), "{text}");
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
) {
    let captured = match read_request(&mut socket).await {
        Ok(captured) => captured,
        Err(_) => return,
    };
    requests.lock().unwrap().push(captured);

    let index = request_count.fetch_add(1, Ordering::AcqRel);
    let response = scripts
        .get(index)
        .cloned()
        .unwrap_or_else(|| response_text(500, "unexpected request"));

    let mut headers = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n",
        response.status,
        status_reason(response.status),
        response.content_type,
    );
    for (name, value) in &response.extra_headers {
        headers.push_str(&format!("{name}: {value}\r\n"));
    }
    headers.push_str("\r\n");

    if socket.write_all(headers.as_bytes()).await.is_err() {
        return;
    }

    for chunk in response.chunks {
        if chunk.delay_ms > 0 {
            sleep(Duration::from_millis(chunk.delay_ms)).await;
        }
        let prefix = format!("{:X}\r\n", chunk.bytes.len());
        if socket.write_all(prefix.as_bytes()).await.is_err() {
            return;
        }
        if socket.write_all(&chunk.bytes).await.is_err() {
            return;
        }
        if socket.write_all(b"\r\n").await.is_err() {
            return;
        }
        let _ = socket.flush().await;
    }

    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 2048];

    let head_end = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        request.extend_from_slice(&buffer[..n]);
        if let Some(pos) = request.windows(4).position(|window| window == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = request[head_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buffer[..n]);
    }

    Ok(CapturedRequest { head, body })
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
