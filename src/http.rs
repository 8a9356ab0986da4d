use crate::error::{Error, Result};
use std::{io::Read, time::Duration};
use tracing::debug;

const USER_AGENT: &str = concat!("Soulforge/", env!("CARGO_PKG_VERSION"));
pub const MAX_REDIRECTS: u32 = 5;

/// Blocking GET used for catalogs and mod payloads.
///
/// Bodies are always read fully into memory; nothing touches the disk until
/// the caller has verified the bytes.
pub trait HttpClient: Send + Sync {
    /// `timeout` bounds the whole request when set; `None` means no limit.
    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct UreqClient {
    max_redirects: u32,
}

impl Default for UreqClient {
    fn default() -> Self {
        Self {
            max_redirects: MAX_REDIRECTS,
        }
    }
}

impl UreqClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn agent(&self, timeout: Option<Duration>) -> ureq::Agent {
        let mut builder = ureq::AgentBuilder::new().redirects(self.max_redirects);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }
}

impl HttpClient for UreqClient {
    fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Vec<u8>> {
        debug!(url, ?timeout, "http get");
        let response = match self
            .agent(timeout)
            .get(url)
            .set("User-Agent", USER_AGENT)
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status,
                })
            }
            Err(ureq::Error::Transport(transport))
                if transport.kind() == ureq::ErrorKind::TooManyRedirects =>
            {
                return Err(Error::TooManyRedirects {
                    url: url.to_string(),
                })
            }
            Err(err) => {
                return Err(Error::Network {
                    url: url.to_string(),
                    reason: err.to_string(),
                })
            }
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|err| Error::Network {
                url: url.to_string(),
                reason: format!("read body: {err}"),
            })?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
        thread,
    };

    /// Answers every connection with `respond(path)` until the test exits.
    fn serve(respond: fn(&str) -> String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                        break;
                    }
                }
                let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                let _ = stream.write_all(respond(path).as_bytes());
            }
        });
        format!("http://{addr}")
    }

    fn response(status: &str, extra: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\n{extra}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

    #[test]
    fn follows_a_redirect_to_the_body() {
        let base = serve(|path| match path {
            "/start" => response("302 Found", "Location: /payload\r\n", ""),
            _ => response("200 OK", "", "MZ payload"),
        });
        let body = UreqClient::new().get(&format!("{base}/start"), TIMEOUT).unwrap();
        assert_eq!(body, b"MZ payload");
    }

    #[test]
    fn endless_redirects_are_reported() {
        let base = serve(|path| {
            let hop: u32 = path.trim_start_matches("/hop").parse().unwrap_or(0);
            response("302 Found", &format!("Location: /hop{}\r\n", hop + 1), "")
        });
        let err = UreqClient::new().get(&format!("{base}/hop0"), TIMEOUT).unwrap_err();
        assert!(matches!(err, Error::TooManyRedirects { .. }), "got {err:?}");
    }

    #[test]
    fn error_status_is_reported() {
        let base = serve(|_| response("404 Not Found", "", "missing"));
        let err = UreqClient::new().get(&format!("{base}/gone.zip"), TIMEOUT).unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }), "got {err:?}");
    }
}
