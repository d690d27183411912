//! A minimal HTTP server serving byte ranges of an in-memory object, with
//! scripted failures keyed by request number.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use drive_fetch::FileRecord;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct ServerState {
    data: Mutex<Vec<u8>>,
    failures: Mutex<HashMap<usize, (u16, String)>>,
    ranges: Mutex<Vec<Option<String>>>,
}

pub struct RangeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl RangeServer {
    pub async fn start(data: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());
        *state.data.lock().unwrap() = data;

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/content", self.addr)
    }

    /// Answer the request with 0-based number `index` with `status` and `body`.
    pub fn fail_request(&self, index: usize, status: u16, body: &str) {
        self.state
            .failures
            .lock()
            .unwrap()
            .insert(index, (status, body.to_string()));
    }

    pub fn set_data(&self, data: Vec<u8>) {
        *self.state.data.lock().unwrap() = data;
    }

    /// Range headers of every request received so far.
    pub fn ranges(&self) -> Vec<Option<String>> {
        self.state.ranges.lock().unwrap().clone()
    }

    /// `(start, end)` pairs of every ranged request received so far.
    pub fn parsed_ranges(&self) -> Vec<(u64, u64)> {
        self.ranges()
            .into_iter()
            .flatten()
            .filter_map(|r| parse_range(&r))
            .collect()
    }

    pub fn record(&self, name: &str) -> FileRecord {
        let data = self.state.data.lock().unwrap().clone();
        FileRecord {
            id: format!("id-{}", name),
            name: name.to_string(),
            size: data.len() as i64,
            content_hash: Some(format!("{:x}", md5::compute(&data))),
            download_url: self.url(),
        }
    }
}

/// Deterministic test content.
pub fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let bounds = header.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    Some((start.parse().ok()?, end.parse().unwrap_or(u64::MAX)))
}

async fn handle(mut stream: TcpStream, state: Arc<ServerState>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let n = match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let range = head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });

    let index = {
        let mut ranges = state.ranges.lock().unwrap();
        ranges.push(range.clone());
        ranges.len() - 1
    };

    let failure = state.failures.lock().unwrap().get(&index).cloned();
    let (status, extra, body) = match failure {
        Some((status, body)) => (status, String::new(), body.into_bytes()),
        None => {
            let data = state.data.lock().unwrap().clone();
            serve(&data, range.as_deref())
        }
    };

    let response = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n",
        status,
        body.len(),
        extra
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.shutdown().await;
}

fn serve(data: &[u8], range: Option<&str>) -> (u16, String, Vec<u8>) {
    let len = data.len() as u64;
    match range.and_then(parse_range) {
        None => (200, String::new(), data.to_vec()),
        Some((start, _)) if start >= len => (
            416,
            format!("Content-Range: bytes */{}\r\n", len),
            b"range not satisfiable".to_vec(),
        ),
        Some((start, end)) => {
            let end = end.min(len - 1);
            (
                206,
                format!("Content-Range: bytes {}-{}/{}\r\n", start, end, len),
                data[start as usize..=end as usize].to_vec(),
            )
        }
    }
}
