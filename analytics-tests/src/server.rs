use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// Response written by the [`HttpResponder`], as a sequence of separately
/// flushed chunks of a chunked transfer encoded body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub chunks: Vec<String>,
}

/// Minimal HTTP/1.1 server on a local socket, answering each connection with
/// the next scripted response and then closing it.
pub struct HttpResponder {
    address: SocketAddr,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    task: JoinHandle<()>,
}

impl HttpResponder {
    pub async fn start(responses: Vec<RawResponse>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            for response in responses {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                if let Err(e) = serve(socket, response, &recorded).await {
                    log::error!("Test responder failure: {:#}", e);
                }
            }
        });
        Ok(Self {
            address,
            requests,
            task,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Request line and JSON body of every request served.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Drop for HttpResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    response: RawResponse,
    recorded: &Mutex<Vec<(String, Value)>>,
) -> std::io::Result<()> {
    let mut received = Vec::new();
    let mut buffer = [0u8; 4096];
    let header_end = loop {
        let read = socket.read(&mut buffer).await?;
        if read == 0 {
            return Ok(());
        }
        received.extend_from_slice(&buffer[..read]);
        if let Some(position) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            break position + 4;
        }
    };
    let head = String::from_utf8_lossy(&received[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while received.len() < header_end + content_length {
        let read = socket.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        received.extend_from_slice(&buffer[..read]);
    }
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let body = serde_json::from_slice(&received[header_end..]).unwrap_or(Value::Null);
    if let Ok(mut requests) = recorded.lock() {
        requests.push((request_line, body));
    }

    socket
        .write_all(
            format!(
                "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
                response.status
            )
            .as_bytes(),
        )
        .await?;
    socket.flush().await?;
    for chunk in response.chunks {
        socket
            .write_all(format!("{:x}\r\n{}\r\n", chunk.len(), chunk).as_bytes())
            .await?;
        socket.flush().await?;
    }
    socket.write_all(b"0\r\n\r\n").await?;
    socket.flush().await?;
    socket.shutdown().await
}
