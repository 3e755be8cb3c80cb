use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use url::form_urlencoded;

use super::DeviceError;

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_HEADERS: usize = 64;
/// Largest response body accepted; device pages are a few kilobytes.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResponse {
    pub status: u16,
    pub body: String,
}

impl DeviceResponse {
    /// Returns the body of a 200 response; anything else becomes an error
    /// carrying the body for diagnostics.
    pub fn into_success(self) -> Result<String, DeviceError> {
        if self.status == 200 {
            Ok(self.body)
        } else {
            Err(DeviceError::UnexpectedStatus {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// HTTP client for the access controller that strictly reuses one
/// connection, even though the device never signals keepalive properly.
/// Opening a connection per request makes the controller reboot under load.
///
/// Requests are serialized: the lock is held for the whole round trip, so
/// at most one request is on the wire at any time. A connection that fails
/// or times out is discarded and the next request dials a fresh one. Failed
/// requests are not retried here.
pub struct DeviceLink {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl DeviceLink {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    /// POSTs a form-encoded body to `path` and reads the response off the
    /// same socket.
    pub async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<DeviceResponse, DeviceError> {
        let body = encode_form(form);
        let request = format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             User-Agent: access-sync/{version}\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {length}\r\n\
             \r\n\
             {body}",
            host = self.addr,
            version = env!("CARGO_PKG_VERSION"),
            length = body.len(),
        );

        let mut conn = self.conn.lock().await;
        let mut stream = match conn.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        // One deadline covers both the write and the read.
        let exchange = async {
            stream.get_mut().write_all(request.as_bytes()).await?;
            stream.get_mut().flush().await?;
            let framed = read_response(&mut stream).await?;
            Ok::<_, DeviceError>(framed)
        };
        let result = tokio::time::timeout(self.timeout, exchange).await;

        match result {
            Ok(Ok(framed)) => {
                if framed.reusable {
                    *conn = Some(stream);
                } else {
                    tracing::debug!(
                        addr = %self.addr,
                        "Response was delimited by connection close, reconnecting next time"
                    );
                }
                Ok(framed.response)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    addr = %self.addr,
                    path = %path,
                    error = %e,
                    "Discarding access controller connection"
                );
                Err(e)
            }
            Err(_) => {
                tracing::warn!(
                    addr = %self.addr,
                    path = %path,
                    timeout = ?self.timeout,
                    "Access controller request timed out, discarding connection"
                );
                Err(DeviceError::Timeout(self.timeout))
            }
        }
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>, DeviceError> {
        tracing::info!(
            addr = %self.addr,
            "Establishing new connection to the access control server"
        );

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| DeviceError::Timeout(self.timeout))?
            .map_err(DeviceError::Connect)?;

        Ok(BufReader::new(stream))
    }
}

fn encode_form(form: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form.iter())
        .finish()
}

struct FramedResponse {
    response: DeviceResponse,
    reusable: bool,
}

enum BodyFraming {
    Length(usize),
    Chunked,
    UntilClose,
}

async fn read_response<R>(reader: &mut R) -> Result<FramedResponse, DeviceError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let head = read_head(reader).await?;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut headers);
        match parsed.parse(&head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(DeviceError::MalformedResponse(
                    "incomplete response head".to_string(),
                ))
            }
            Err(e) => return Err(DeviceError::MalformedResponse(e.to_string())),
        }

        let status = parsed
            .code
            .ok_or_else(|| DeviceError::MalformedResponse("missing status code".to_string()))?;

        // Interim responses carry no body; the real one follows.
        if (100..200).contains(&status) {
            continue;
        }

        let framing = body_framing(status, parsed.headers)?;
        let (body, reusable) = match framing {
            BodyFraming::Length(length) => {
                let mut body = Vec::new();
                read_limited(reader, length, &mut body).await?;
                if body.len() < length {
                    return Err(DeviceError::MalformedResponse(
                        "connection closed mid-body".to_string(),
                    ));
                }
                (body, true)
            }
            BodyFraming::Chunked => (read_chunked(reader).await?, true),
            BodyFraming::UntilClose => {
                let mut body = Vec::new();
                read_limited(reader, MAX_BODY_BYTES, &mut body).await?;
                if reader.fill_buf().await?.is_empty() {
                    (body, false)
                } else {
                    return Err(body_too_large());
                }
            }
        };

        return Ok(FramedResponse {
            response: DeviceResponse {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            },
            reusable,
        });
    }
}

async fn read_head<R>(reader: &mut R) -> Result<Vec<u8>, DeviceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let start = head.len();
        let n = reader.read_until(b'\n', &mut head).await?;
        if n == 0 {
            return Err(if head.is_empty() {
                DeviceError::Closed
            } else {
                DeviceError::MalformedResponse("connection closed mid-header".to_string())
            });
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // stray line break left over from a previous response
                head.clear();
                continue;
            }
            return Ok(head);
        }

        if head.len() > MAX_HEAD_BYTES {
            return Err(DeviceError::MalformedResponse(
                "response head too large".to_string(),
            ));
        }
    }
}

fn body_framing(status: u16, headers: &[httparse::Header<'_>]) -> Result<BodyFraming, DeviceError> {
    if status == 204 || status == 304 {
        return Ok(BodyFraming::Length(0));
    }

    // Keepalive headers are deliberately ignored: the device does not send
    // them reliably and the connection is kept regardless.
    let mut length = None;
    for header in headers {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| DeviceError::MalformedResponse(format!("non-ASCII {} header", header.name)))?
            .trim();

        if header.name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Ok(BodyFraming::Chunked);
        }
        if header.name.eq_ignore_ascii_case("content-length") {
            let parsed = value.parse::<usize>().map_err(|_| {
                DeviceError::MalformedResponse(format!("invalid content length {:?}", value))
            })?;
            if parsed > MAX_BODY_BYTES {
                return Err(body_too_large());
            }
            length = Some(parsed);
        }
    }

    Ok(length.map_or(BodyFraming::UntilClose, BodyFraming::Length))
}

async fn read_chunked<R>(reader: &mut R) -> Result<Vec<u8>, DeviceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(DeviceError::MalformedResponse(
                "connection closed mid-body".to_string(),
            ));
        }

        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16).map_err(|_| {
            DeviceError::MalformedResponse(format!("invalid chunk size {:?}", size_field))
        })?;
        if size == 0 {
            break;
        }

        let expected = body
            .len()
            .checked_add(size)
            .filter(|&total| total <= MAX_BODY_BYTES)
            .ok_or_else(body_too_large)?;
        read_limited(reader, size, &mut body).await?;
        if body.len() < expected {
            return Err(DeviceError::MalformedResponse(
                "connection closed mid-body".to_string(),
            ));
        }

        line.clear();
        reader.read_line(&mut line).await?;
    }

    // Skip trailers up to the terminating blank line.
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
    }

    Ok(body)
}

/// Appends at most `limit` bytes to `body`, stopping early at end of stream.
async fn read_limited<R>(reader: &mut R, limit: usize, body: &mut Vec<u8>) -> Result<(), DeviceError>
where
    R: AsyncBufRead + Unpin,
{
    (&mut *reader).take(limit as u64).read_to_end(body).await?;
    Ok(())
}

fn body_too_large() -> DeviceError {
    DeviceError::MalformedResponse(format!("response body exceeds {} bytes", MAX_BODY_BYTES))
}

#[cfg(test)]
pub(crate) mod testing {
    //! A fake access controller that speaks just enough HTTP/1.1 over a raw
    //! socket to exercise the link.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Clone, Copy)]
    pub enum Behavior {
        KeepOpen,
        CloseAfterResponse,
        NeverRespond,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedRequest {
        pub path: String,
        pub body: String,
    }

    pub struct FakeDevice {
        pub addr: String,
        connections: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl FakeDevice {
        /// Serves the given responses in order, repeating the last one.
        pub async fn start(responses: Vec<String>, behavior: Behavior) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            let connections = Arc::new(AtomicUsize::new(0));
            let requests = Arc::new(Mutex::new(Vec::new()));
            let served = Arc::new(AtomicUsize::new(0));
            let responses = Arc::new(responses);

            let accepted = connections.clone();
            let recorded = requests.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        socket,
                        behavior,
                        responses.clone(),
                        served.clone(),
                        recorded.clone(),
                    ));
                }
            });

            Self {
                addr,
                connections,
                requests,
            }
        }

        pub fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    pub fn ok_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    async fn serve(
        socket: TcpStream,
        behavior: Behavior,
        responses: Arc<Vec<String>>,
        served: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    ) {
        let mut reader = BufReader::new(socket);
        while let Some(request) = read_request(&mut reader).await {
            requests.lock().unwrap().push(request);

            if let Behavior::NeverRespond = behavior {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }

            let index = served.fetch_add(1, Ordering::SeqCst);
            let response = &responses[index.min(responses.len() - 1)];
            if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
                return;
            }

            if let Behavior::CloseAfterResponse = behavior {
                return;
            }
        }
    }

    async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<RecordedRequest> {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.ok()? == 0 {
            return None;
        }
        let path = request_line.split_whitespace().nth(1)?.to_string();

        let mut content_length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.ok()? == 0 {
                return None;
            }
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok()?;
                }
            }
        }

        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).await.ok()?;
        Some(RecordedRequest {
            path,
            body: String::from_utf8(body).ok()?,
        })
    }
}
