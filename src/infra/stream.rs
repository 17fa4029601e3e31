use crate::domain::{Message, parse_message_line};
use crate::infra::ApiClient;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const BACKOFF_INITIAL_MS: u64 = 250;
const BACKOFF_MAX_MS: u64 = 30_000;

#[derive(Clone, Debug)]
pub enum StreamSignal {
    Opened,
    Event(Message),
    Error(String),
}

#[derive(Debug)]
pub struct StreamHandle {
    rx: Receiver<StreamSignal>,
    shutdown: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn try_recv(&self) -> Option<StreamSignal> {
        self.rx.try_recv().ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps one push channel open on a background thread, reconnecting with backoff.
pub fn spawn_stream_reader(client: ApiClient) -> StreamHandle {
    let (tx, rx) = channel::<StreamSignal>();
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    thread::spawn(move || stream_loop(&client, &tx, &flag));
    StreamHandle { rx, shutdown }
}

fn stream_loop(client: &ApiClient, tx: &Sender<StreamSignal>, shutdown: &AtomicBool) {
    let mut backoff_ms = BACKOFF_INITIAL_MS;

    while !shutdown.load(Ordering::SeqCst) {
        let reason = match client.open_stream() {
            Ok(body) => {
                if tx.send(StreamSignal::Opened).is_err() {
                    return;
                }
                backoff_ms = BACKOFF_INITIAL_MS;
                match read_event_stream(body, shutdown, |message| {
                    tx.send(StreamSignal::Event(message)).is_ok()
                }) {
                    Ok(StreamEnd::ReceiverGone) => return,
                    Ok(StreamEnd::Shutdown) => return,
                    Ok(StreamEnd::Eof) => "stream closed by server".to_string(),
                    Err(error) => error.to_string(),
                }
            }
            Err(error) => error.to_string(),
        };
        if tx.send(StreamSignal::Error(reason)).is_err() {
            return;
        }

        let sleep_ms = backoff_ms.saturating_add(jitter_ms(backoff_ms / 4));
        thread::sleep(Duration::from_millis(sleep_ms));
        backoff_ms = backoff_ms.saturating_mul(2).min(BACKOFF_MAX_MS);
    }
}

fn jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let (n, _) = Uuid::new_v4().as_u64_pair();
    n % (max_ms + 1)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamEnd {
    Eof,
    Shutdown,
    ReceiverGone,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Line-oriented `text/event-stream` decoder.
#[derive(Clone, Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

/// Decodes message events until EOF. `on_message` returning false stops the read.
pub fn read_event_stream(
    reader: impl BufRead,
    shutdown: &AtomicBool,
    mut on_message: impl FnMut(Message) -> bool,
) -> io::Result<StreamEnd> {
    let mut parser = SseParser::default();
    for line in reader.lines() {
        let line = line?;
        if shutdown.load(Ordering::SeqCst) {
            return Ok(StreamEnd::Shutdown);
        }
        let Some(event) = parser.push_line(&line) else {
            continue;
        };
        if event.event.as_deref().is_some_and(|name| name != "message") {
            continue;
        }
        match parse_message_line(&event.data) {
            Ok(Some(message)) => {
                if !on_message(message) {
                    return Ok(StreamEnd::ReceiverGone);
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(event = "stream_event_malformed", error = %error);
            }
        }
    }
    Ok(StreamEnd::Eof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    #[test]
    fn parser_joins_data_lines_and_ignores_comments() {
        let mut parser = SseParser::default();
        assert_eq!(parser.push_line(": keepalive"), None);
        assert_eq!(parser.push_line("event: message"), None);
        assert_eq!(parser.push_line("data: {\"a\":"), None);
        assert_eq!(parser.push_line("data:1}"), None);
        assert_eq!(
            parser.push_line(""),
            Some(SseEvent {
                event: Some("message".to_string()),
                data: "{\"a\":\n1}".to_string(),
            })
        );
        assert_eq!(parser.push_line("\r"), None);
    }

    #[test]
    fn reads_messages_and_skips_noise() {
        let body = concat!(
            "event: hello\n",
            "data: {\"id\":\"x\"}\n\n",
            "data: not json\n\n",
            "data: {\"id\":\"m1\",\"thread_id\":\"s1\",\"kind\":\"assistant_message\"}\r\n\r\n",
            "data: {\"id\":\"m2\",\"thread_id\":\"s1\",\"op\":\"update\"}\n\n",
        );
        let shutdown = AtomicBool::new(false);
        let mut seen = Vec::new();
        let end = read_event_stream(Cursor::new(body), &shutdown, |message| {
            seen.push(message);
            true
        })
        .expect("read");
        assert_eq!(end, StreamEnd::Eof);
        let ids = seen.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(seen[1].is_update());
    }

    #[test]
    fn stops_when_the_receiver_is_gone() {
        let body = "data: {\"id\":\"a\"}\n\ndata: {\"id\":\"b\"}\n\n";
        let shutdown = AtomicBool::new(false);
        let mut calls = 0;
        let end = read_event_stream(Cursor::new(body), &shutdown, |_| {
            calls += 1;
            false
        })
        .expect("read");
        assert_eq!(end, StreamEnd::ReceiverGone);
        assert_eq!(calls, 1);
    }

    #[test]
    fn reader_thread_reports_open_events_and_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");
            let mut buf = [0u8; 4096];
            let _ = io::Read::read(&mut socket, &mut buf);
            let body = "data: {\"id\":\"m1\",\"thread_id\":\"s1\"}\n\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).expect("write");
        });

        let handle = spawn_stream_reader(ApiClient::new(&format!("http://{addr}")));
        let mut signals = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while signals.len() < 3 && Instant::now() < deadline {
            match handle.try_recv() {
                Some(signal) => signals.push(signal),
                None => thread::sleep(Duration::from_millis(5)),
            }
        }
        handle.shutdown();

        assert!(matches!(signals.first(), Some(StreamSignal::Opened)));
        assert!(matches!(signals.get(1), Some(StreamSignal::Event(m)) if m.id == "m1"));
        assert!(matches!(signals.get(2), Some(StreamSignal::Error(_))));
    }
}
