use crate::domain::{
    AbortHandle, Message, SeenPoint, SessionKey, ThreadSnapshot, ViewKey, parse_message_value,
    parse_sequence, parse_timestamp_value,
};
use serde_json::{Value, json};
use std::io::{self, BufReader, Read};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8765";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request cancelled")]
    Cancelled,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Network(String),

    #[error("failed to read response: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FetchError {
    fn from_ureq(error: ureq::Error) -> Self {
        match error {
            ureq::Error::StatusCode(code) => Self::Status(code),
            ureq::Error::Io(error) => Self::Read(error),
            other => Self::Network(other.to_string()),
        }
    }

    /// Short text for an empty-state placeholder.
    pub fn status_text(&self) -> String {
        match self {
            Self::Status(code) => format!("HTTP {code}"),
            Self::Cancelled => "cancelled".to_string(),
            Self::Parse(_) => "bad response".to_string(),
            Self::Network(_) | Self::Read(_) => "offline".to_string(),
        }
    }
}

pub type StreamBody = BufReader<ureq::BodyReader<'static>>;

/// Blocking client for the timeline backend. Cheap to clone into worker threads.
#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: String,
    client_id: Uuid,
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        let stream_agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .build()
            .into();
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            client_id: Uuid::new_v4(),
            agent,
            stream_agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn user_agent() -> String {
        format!("tailboard/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Pulls a snapshot, checking `abort` between body chunks.
    pub fn fetch_messages(
        &self,
        view: &ViewKey,
        abort: &AbortHandle,
    ) -> Result<Vec<Message>, FetchError> {
        if abort.is_aborted() {
            return Err(FetchError::Cancelled);
        }
        let mut request = self
            .agent
            .get(&self.url("/api/messages"))
            .header("User-Agent", &Self::user_agent())
            .header("Accept", "application/json");
        if let Some(session) = view.session() {
            request = request.query("thread_id", session.as_str());
        }
        let response = request.call().map_err(FetchError::from_ureq)?;
        let mut reader = response.into_body().into_reader();
        let bytes = read_abortable(&mut reader, abort)?;
        Ok(parse_messages_body(&bytes)?)
    }

    pub fn fetch_threads(&self) -> Result<Vec<ThreadSnapshot>, FetchError> {
        let mut body = self
            .agent
            .get(&self.url("/api/threads"))
            .header("User-Agent", &Self::user_agent())
            .header("Accept", "application/json")
            .call()
            .map_err(FetchError::from_ureq)?
            .into_body();
        let bytes = body.read_to_vec().map_err(FetchError::from_ureq)?;
        Ok(parse_threads_body(&bytes)?)
    }

    pub fn follow(&self, session: Option<&SessionKey>) -> Result<(), FetchError> {
        let payload = json!({
            "thread_id": session.map(SessionKey::as_str),
            "client_id": self.client_id.to_string(),
        });
        self.agent
            .post(&self.url("/api/follow"))
            .header("User-Agent", &Self::user_agent())
            .send_json(&payload)
            .map_err(FetchError::from_ureq)?;
        Ok(())
    }

    /// Opens the push channel. The body stays open until the server or the network drops it.
    pub fn open_stream(&self) -> Result<StreamBody, FetchError> {
        let response = self
            .stream_agent
            .get(&self.url("/api/stream"))
            .header("User-Agent", &Self::user_agent())
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .call()
            .map_err(FetchError::from_ureq)?;
        Ok(BufReader::new(response.into_body().into_reader()))
    }
}

fn read_abortable(reader: &mut impl Read, abort: &AbortHandle) -> Result<Vec<u8>, FetchError> {
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        if abort.is_aborted() {
            return Err(FetchError::Cancelled);
        }
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
    }
    if abort.is_aborted() {
        return Err(FetchError::Cancelled);
    }
    Ok(bytes)
}

/// Accepts `{"messages": [...]}` or a bare array. Entries that are not objects are skipped.
pub fn parse_messages_body(bytes: &[u8]) -> Result<Vec<Message>, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(object) => object
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    Ok(items.iter().filter_map(parse_message_value).collect())
}

pub fn parse_threads_body(bytes: &[u8]) -> Result<Vec<ThreadSnapshot>, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Some(items) = value.get("threads").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut snapshots = Vec::new();
    for item in items {
        let Some(object) = item.as_object() else {
            continue;
        };
        let Some(key) = ["thread_id", "session_id", "session_key"]
            .iter()
            .filter_map(|field| object.get(*field).and_then(Value::as_str))
            .find(|key| !key.trim().is_empty())
        else {
            continue;
        };
        let count = object.get("count").and_then(Value::as_u64).unwrap_or(0);
        let timestamp_ms = object.get("last_ts").and_then(parse_timestamp_value);
        let sequence = object.get("last_seq").and_then(parse_sequence);
        let last_seen = (timestamp_ms.is_some() || sequence.is_some()).then_some(SeenPoint {
            timestamp_ms,
            sequence,
        });
        let label = object
            .get("label")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string);
        snapshots.push(ThreadSnapshot {
            key: SessionKey::new(key),
            count: usize::try_from(count).unwrap_or(usize::MAX),
            last_seen,
            label,
        });
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageKind;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    /// Serves one canned response and returns the raw request line.
    fn serve_once(status: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");
            let mut buf = [0u8; 4096];
            let read = socket.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..read]).to_string();
            socket.write_all(response.as_bytes()).expect("write");
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn parses_wrapped_and_bare_message_bodies() {
        let wrapped = json!({"messages": [
            {"id": "a", "thread_id": "s1", "kind": "user_message", "ts": 10},
            "noise",
            {"message_id": "b", "session_id": "s1", "type": "assistant_message"}
        ]});
        let parsed = parse_messages_body(wrapped.to_string().as_bytes()).expect("parse");
        let ids = parsed.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(parsed[1].kind, MessageKind::AssistantMessage);

        let bare = json!([{"id": "c", "thread_id": "s2"}]);
        let parsed = parse_messages_body(bare.to_string().as_bytes()).expect("parse");
        assert_eq!(parsed.len(), 1);
        assert!(parse_messages_body(b"{oops").is_err());
    }

    #[test]
    fn parses_thread_listing_leniently() {
        let body = json!({"threads": [
            {"thread_id": "s1", "count": 4, "last_ts": "2026-02-18T21:45:57.803Z", "label": "Fix"},
            {"thread_id": "s2", "last_seq": 7, "label": "  "},
            {"count": 3},
        ]});
        let threads = parse_threads_body(body.to_string().as_bytes()).expect("parse");
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].count, 4);
        assert_eq!(
            threads[0].last_seen.and_then(|p| p.timestamp_ms),
            Some(1_771_451_157_803)
        );
        assert_eq!(threads[0].label.as_deref(), Some("Fix"));
        assert_eq!(threads[1].label, None);
        assert_eq!(threads[1].last_seen.and_then(|p| p.sequence), Some(7));
    }

    #[test]
    fn fetch_messages_filters_by_session() {
        let (base, server) = serve_once(
            "200 OK",
            &json!({"messages": [{"id": "m1", "thread_id": "s 1"}]}).to_string(),
        );
        let client = ApiClient::new(&base);
        let messages = client
            .fetch_messages(&ViewKey::parse("s 1"), &AbortHandle::new())
            .expect("fetch");
        assert_eq!(messages.len(), 1);
        let request_line = server.join().expect("server");
        assert!(request_line.starts_with("GET /api/messages?thread_id=s"));
    }

    #[test]
    fn http_errors_surface_as_status() {
        let (base, server) = serve_once("503 Service Unavailable", "{}");
        let client = ApiClient::new(&base);
        let error = client.fetch_threads().expect_err("503");
        assert!(matches!(error, FetchError::Status(503)));
        assert_eq!(error.status_text(), "HTTP 503");
        server.join().expect("server");
    }

    #[test]
    fn aborted_fetch_never_reaches_the_network() {
        let client = ApiClient::new("http://127.0.0.1:9");
        let abort = AbortHandle::new();
        abort.abort();
        let error = client
            .fetch_messages(&ViewKey::All, &abort)
            .expect_err("cancelled");
        assert!(matches!(error, FetchError::Cancelled));
    }

    #[test]
    fn abort_between_chunks_discards_the_body() {
        let abort = AbortHandle::new();
        let mut reader = io::Cursor::new(vec![b'x'; READ_CHUNK * 2]);
        assert_eq!(
            read_abortable(&mut reader, &abort).expect("read").len(),
            READ_CHUNK * 2
        );
        abort.abort();
        let mut reader = io::Cursor::new(vec![b'x'; 8]);
        assert!(matches!(
            read_abortable(&mut reader, &abort),
            Err(FetchError::Cancelled)
        ));
    }
}
