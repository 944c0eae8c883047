//! HTTP transport.
//!
//! Everything that talks to a server goes through the [`Fetch`] trait, so the
//! pipeline can be driven by an in-memory tree in tests. [`Remote`] layers the
//! mirror rotation and the request gate on top.

use std::{future::Future, sync::Arc, time::Duration};

use clap::crate_version;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::dedup::TaskDedup;
use crate::error::Error;
use crate::storage::RemotePath;
use crate::url::Mirrors;

/// Default wait before retrying a throttled or failed request.
pub(crate) const BACKOFF_DELAY: Duration = Duration::from_secs(10);
const ZERO_DURATION: Duration = Duration::from_secs(0);

/// Async GET of a whole resource.
///
/// Implementations map a 404 to [`Error::NotFound`] so callers can tell
/// "no data here" from real failures.
pub trait Fetch: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}

/// `reqwest`-backed [`Fetch`].
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u8,
    backoff: Duration,
}

impl HttpFetcher {
    /// Builds the client. A zero `timeout` disables the timeout.
    pub fn new(timeout: Duration, retries: u8) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(format!("terrasync-mirror_rs_{}", crate_version!()))
            // mirrors commonly run with self-signed certificates
            .danger_accept_invalid_certs(true);
        if timeout > ZERO_DURATION {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| Error::Transport {
            url: String::new(),
            message: format!("failed creating HTTP client: {e}"),
        })?;

        Ok(Self {
            client,
            retries,
            backoff: BACKOFF_DELAY,
        })
    }

    /// Overrides the delay between retries.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>, Attempt> {
        let response = self.client.get(url).send().await.map_err(|e| {
            Attempt::Retry(Error::Transport {
                url: url.to_owned(),
                message: e.to_string(),
            })
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Attempt::Fail(Error::NotFound {
                url: url.to_owned(),
            })),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                )
                .unwrap_or(self.backoff);
                Err(Attempt::Throttled(retry_after))
            }
            status if status.is_server_error() => Err(Attempt::Retry(Error::Http {
                url: url.to_owned(),
                status: status.as_u16(),
            })),
            status if !status.is_success() => Err(Attempt::Fail(Error::Http {
                url: url.to_owned(),
                status: status.as_u16(),
            })),
            _ => response
                .bytes()
                .await
                .map(|body| body.to_vec())
                .map_err(|e| {
                    Attempt::Retry(Error::Transport {
                        url: url.to_owned(),
                        message: e.to_string(),
                    })
                }),
        }
    }
}

enum Attempt {
    Throttled(Duration),
    Retry(Error),
    Fail(Error),
}

impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
        let mut attempt: u32 = 0;

        loop {
            let (err, delay) = match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Throttled(delay)) => {
                    let err = Error::Http {
                        url: url.to_owned(),
                        status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
                    };
                    (err, delay)
                }
                Err(Attempt::Retry(e)) => (e, self.backoff),
            };

            attempt += 1;
            if attempt > u32::from(self.retries) {
                return Err(err);
            }

            warn!(url, attempt, ?delay, error = %err, "request failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// The remote scenery tree: a [`Fetch`] plus the mirrors it is served from.
///
/// Every request holds one request slot of the session's [`TaskDedup`] for
/// its duration.
#[derive(Debug)]
pub struct Remote<F> {
    fetcher: F,
    mirrors: Mirrors,
    dedup: Arc<TaskDedup>,
}

impl<F: Fetch> Remote<F> {
    pub fn new(fetcher: F, mirrors: Mirrors, dedup: Arc<TaskDedup>) -> Self {
        Self {
            fetcher,
            mirrors,
            dedup,
        }
    }

    pub fn dedup(&self) -> &TaskDedup {
        &self.dedup
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// URL of `path` on the next mirror in rotation.
    pub fn url_of(&self, path: &RemotePath) -> String {
        self.mirrors.url(path.as_str())
    }

    /// Mirror-relative path of a full URL, if it belongs to a configured mirror.
    pub fn relative(&self, url: &str) -> Option<Result<RemotePath, Error>> {
        self.mirrors.relative(url).map(RemotePath::new)
    }

    pub async fn get(&self, path: &RemotePath) -> Result<Vec<u8>, Error> {
        let url = self.url_of(path);
        self.get_url(&url).await
    }

    /// Fetches an absolute URL, e.g. an imagery export.
    pub async fn get_url(&self, url: &str) -> Result<Vec<u8>, Error> {
        let _slot = self.dedup.acquire_request().await?;
        debug!(url, "fetching");
        self.fetcher.get(url).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// Serves a fixed set of URLs from memory and counts requests.
    #[derive(Default)]
    pub(crate) struct MemoryFetcher {
        files: HashMap<String, Vec<u8>>,
        hits: Mutex<HashMap<String, usize>>,
    }

    impl MemoryFetcher {
        pub(crate) fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.files.insert(url.to_owned(), body.into());
            self
        }

        pub(crate) fn hits(&self, url: &str) -> usize {
            self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    impl Fetch for MemoryFetcher {
        async fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
            *self.hits.lock().unwrap().entry(url.to_owned()).or_default() += 1;
            self.files.get(url).cloned().ok_or_else(|| Error::NotFound {
                url: url.to_owned(),
            })
        }
    }

    pub(crate) fn remote(fetcher: MemoryFetcher) -> Remote<MemoryFetcher> {
        Remote::new(
            fetcher,
            Mirrors::new(["https://mirror.test/"]),
            Arc::new(TaskDedup::new(4)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn remote_resolves_against_the_mirror() {
        let remote = remote(MemoryFetcher::default().with("https://mirror.test/ws2/a.stg", "x"));
        let path = RemotePath::new("ws2/a.stg").unwrap();

        assert_eq!(remote.get(&path).await.unwrap(), b"x");
        assert!(remote
            .get(&RemotePath::new("ws2/b.stg").unwrap())
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(
            remote.relative("https://mirror.test/ws2/a.stg").unwrap().unwrap(),
            path
        );
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(Some("120")), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(Some(" 3 ")), Some(Duration::from_secs(3)));
        // HTTP dates fall back to the default backoff
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn client_builds_without_timeout() {
        assert!(HttpFetcher::new(ZERO_DURATION, 0).is_ok());
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const FORBIDDEN: &str = "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const SERVER_ERROR: &str =
        "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const THROTTLED: &str =
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    /// Answers one connection per canned response, in order, then stops
    /// listening. Returns the URL and the number of requests served.
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&served);
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/ws2/a.stg"), served)
    }

    fn fetcher(retries: u8) -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5), retries)
            .unwrap()
            .with_backoff(ZERO_DURATION)
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let (url, served) = serve(vec![NOT_FOUND, OK]).await;
        let err = fetcher(3).get(&url).await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_errors_fail_immediately() {
        let (url, served) = serve(vec![FORBIDDEN, OK]).await;
        match fetcher(3).get(&url).await {
            Err(Error::Http { status: 403, .. }) => {}
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (url, served) = serve(vec![SERVER_ERROR, OK]).await;
        assert_eq!(fetcher(1).get(&url).await.unwrap(), b"ok");
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_run_out() {
        let (url, served) = serve(vec![SERVER_ERROR, SERVER_ERROR, SERVER_ERROR, OK]).await;
        match fetcher(2).get(&url).await {
            Err(Error::Http { status: 500, .. }) => {}
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn throttling_waits_for_retry_after() {
        let (url, served) = serve(vec![THROTTLED, OK]).await;
        // the default backoff would stall the test, Retry-After: 0 must win
        let fetcher = HttpFetcher::new(Duration::from_secs(5), 1)
            .unwrap()
            .with_backoff(Duration::from_secs(3600));

        let body = tokio::time::timeout(Duration::from_secs(30), fetcher.get(&url))
            .await
            .expect("throttled request should not wait for the backoff")
            .unwrap();
        assert_eq!(body, b"ok");
        assert_eq!(served.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refused_connections_give_up_with_the_largest_retry_count() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ws2/a.stg", listener.local_addr().unwrap());
        drop(listener);

        match fetcher(u8::MAX).get(&url).await {
            Err(Error::Transport { .. }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }
}
