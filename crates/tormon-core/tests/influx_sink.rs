//! InfluxSink against a minimal HTTP/1.1 responder on a local TcpListener.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tormon_core::error::SinkError;
use tormon_core::event::{MeasurementEvent, Tags};
use tormon_core::normalize::{Fields, Value};
use tormon_core::sink::{InfluxSink, MetricsSink};

#[derive(Debug, Clone)]
struct Captured {
    request_line: String,
    body: String,
}

struct FakeInflux {
    port: u16,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl FakeInflux {
    fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

/// Answer every request with `status` and `body`.
async fn spawn_fake_influx(status: u16, body: &'static str) -> FakeInflux {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                if let Some(captured) = respond(stream, status, body).await {
                    log.lock().unwrap().push(captured);
                }
            });
        }
    });

    FakeInflux { port, requests }
}

async fn respond(mut stream: TcpStream, status: u16, body: &str) -> Option<Captured> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&chunk[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while raw.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
    }

    let reply = format!(
        "HTTP/1.1 {status} Fake\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(reply.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()?;

    Some(Captured {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&raw[header_end..]).to_string(),
    })
}

fn sink_for(fake: &FakeInflux) -> InfluxSink {
    InfluxSink::new("127.0.0.1", fake.port, Duration::from_secs(5)).unwrap()
}

fn sample_event() -> MeasurementEvent {
    let fields = Fields::from([
        ("read".to_string(), Value::Integer(1000)),
        ("written".to_string(), Value::Integer(2000)),
    ]);
    let tags = Tags::from([("host".to_string(), "relay1".to_string())]);
    let time = Utc.timestamp_millis_opt(1_714_564_800_123).unwrap();
    MeasurementEvent::at("bandwidth", tags, fields, time)
}

#[tokio::test]
async fn ping_and_create_database() {
    let fake = spawn_fake_influx(204, "").await;
    let sink = sink_for(&fake);

    sink.ping().await.unwrap();
    sink.create_database("tor").await.unwrap();

    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].request_line.starts_with("GET /ping "));
    assert!(requests[1].request_line.starts_with("POST /query "));
    assert_eq!(requests[1].body, "q=CREATE+DATABASE+%22tor%22");
}

#[tokio::test]
async fn write_posts_line_protocol_with_ms_precision() {
    let fake = spawn_fake_influx(204, "").await;
    let sink = sink_for(&fake);

    sink.write(&sample_event(), "tor").await.unwrap();

    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    assert!(
        requests[0]
            .request_line
            .starts_with("POST /write?db=tor&precision=ms "),
        "{}",
        requests[0].request_line
    );
    assert_eq!(
        requests[0].body,
        "bandwidth,host=relay1 read=1000i,written=2000i 1714564800123"
    );
}

#[tokio::test]
async fn error_status_is_rejected_with_body() {
    let fake = spawn_fake_influx(500, "{\"error\":\"engine down\"}\n").await;
    let sink = sink_for(&fake);

    let err = sink.write(&sample_event(), "tor").await.unwrap_err();
    match err {
        SinkError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "{\"error\":\"engine down\"}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_store_is_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let sink = InfluxSink::new("127.0.0.1", port, Duration::from_secs(1)).unwrap();
    let err = sink.ping().await.unwrap_err();
    assert!(matches!(err, SinkError::Http(_)), "{err:?}");
}
