use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use regex::Regex;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{FetchResult, ScrapeProgress};

const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];
const BASE_BACKOFF_MS: u64 = 1000;
/// Random politeness jitter added on top of the per-domain delay.
const JITTER_MS: u64 = 250;

static DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(?:www\.)?([^/]+)").unwrap());

fn domain_of(url: &str) -> String {
    DOMAIN_RE
        .captures(url)
        .map(|c| c[1].to_lowercase())
        .unwrap_or_else(|| url.to_lowercase())
}

// ── Transport ──

pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal HTTP seam. Transport-level failures (connect, timeout) surface as
/// `Err` and are terminal for the URL; HTTP statuses come back as `Ok`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

// ── Rate limiting ──

/// Per-domain minimum start-to-start interval, scoped to one fetch session.
/// Each domain gets its own lock held across the politeness sleep, so two
/// workers on the same domain serialize while other domains proceed.
struct RateLimiter {
    delay: Duration,
    domains: Mutex<HashMap<String, Arc<Mutex<Option<tokio::time::Instant>>>>>,
}

impl RateLimiter {
    fn new(delay_secs: f64) -> Self {
        Self {
            delay: Duration::from_secs_f64(delay_secs.max(0.0)),
            domains: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, domain: &str) {
        let slot = {
            let mut map = self.domains.lock().await;
            map.entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };
        let mut last_start = slot.lock().await;
        if let Some(prev) = *last_start {
            let jitter = Duration::from_millis(rand::rng().random_range(0..=JITTER_MS));
            tokio::time::sleep_until(prev + self.delay + jitter).await;
        }
        *last_start = Some(tokio::time::Instant::now());
    }
}

// ── Fetcher ──

pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
    workers: usize,
    log_every: usize,
}

impl Fetcher {
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport =
            ReqwestTransport::new(&config.user_agent, Duration::from_secs(config.timeout))?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Build against any transport; tests script one instead of doing IO.
    pub fn with_transport(transport: Arc<dyn HttpTransport>, config: &Config) -> Self {
        Self {
            transport,
            limiter: Arc::new(RateLimiter::new(config.request_delay)),
            max_retries: config.max_retries,
            workers: config.workers(),
            log_every: config.log_every.max(1),
        }
    }

    /// Fetch every URL in the category map. One result per URL, failures
    /// included; sequential mode preserves input order.
    pub async fn fetch_all(
        &self,
        urls: &BTreeMap<String, Vec<String>>,
    ) -> Result<(Vec<FetchResult>, ScrapeProgress)> {
        let flat: Vec<(String, String)> = urls
            .iter()
            .flat_map(|(category, list)| {
                list.iter().map(|url| (category.clone(), url.clone()))
            })
            .collect();
        if flat.is_empty() {
            return Err(PipelineError::NoUrls.into());
        }

        let total = flat.len();
        let mut progress = ScrapeProgress::new(total);
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let mut results = Vec::with_capacity(total);
        if self.workers <= 1 {
            for (category, url) in flat {
                let result = fetch_one(
                    self.transport.as_ref(),
                    &self.limiter,
                    &url,
                    &category,
                    self.max_retries,
                )
                .await;
                self.note(&mut progress, &pb, &result);
                results.push(result);
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(self.workers));
            let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchResult>(self.workers * 2);

            for (category, url) in flat {
                let transport = Arc::clone(&self.transport);
                let limiter = Arc::clone(&self.limiter);
                let sem = Arc::clone(&semaphore);
                let tx = tx.clone();
                let max_retries = self.max_retries;
                tokio::spawn(async move {
                    let _permit = sem.acquire().await.unwrap();
                    let result =
                        fetch_one(transport.as_ref(), &limiter, &url, &category, max_retries)
                            .await;
                    let _ = tx.send(result).await;
                });
            }
            // rx closes once all spawned tasks finish
            drop(tx);

            while let Some(result) = rx.recv().await {
                self.note(&mut progress, &pb, &result);
                results.push(result);
            }
        }

        pb.finish_and_clear();
        info!(
            "fetched {} URLs ({} ok, {} failed) in {:.1}s",
            progress.completed,
            progress.ok,
            progress.failed,
            progress.elapsed().as_secs_f64()
        );
        Ok((results, progress))
    }

    fn note(&self, progress: &mut ScrapeProgress, pb: &ProgressBar, result: &FetchResult) {
        progress.record(result);
        pb.inc(1);
        if progress.completed % self.log_every == 0 && progress.completed < progress.total {
            info!(
                "fetched {}/{} ({:.0}% success, {:.1}s elapsed)",
                progress.completed,
                progress.total,
                progress.success_rate() * 100.0,
                progress.elapsed().as_secs_f64()
            );
        }
    }
}

/// Fetch one URL with the politeness delay before every attempt and
/// exponential backoff between retryable statuses. `max_retries` is the
/// total attempt budget; transport errors end the loop immediately.
async fn fetch_one(
    transport: &dyn HttpTransport,
    limiter: &RateLimiter,
    url: &str,
    category: &str,
    max_retries: u32,
) -> FetchResult {
    let domain = domain_of(url);
    let attempts = max_retries.max(1);
    let started = std::time::Instant::now();
    let fetched_at = Utc::now();
    let mut attempt = 0u32;

    loop {
        limiter.acquire(&domain).await;

        let outcome = transport.get(url).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Err(e) => {
                return FetchResult {
                    url: url.to_string(),
                    source_category: category.to_string(),
                    http_status: None,
                    content: String::new(),
                    error: Some(format!("request failed: {e}")),
                    fetched_at,
                    elapsed_ms,
                    retry_count: attempt,
                };
            }
            Ok(response) => {
                let retryable = RETRYABLE_STATUSES.contains(&response.status);
                if retryable && attempt + 1 < attempts {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "HTTP {} on {} (attempt {}/{}), backing off {:.1}s",
                        response.status,
                        url,
                        attempt + 1,
                        attempts,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                    continue;
                }

                let (content, error) = match response.status {
                    200 if response.body.trim().is_empty() => {
                        (String::new(), Some("empty response body".to_string()))
                    }
                    200 => (response.body, None),
                    status => (String::new(), Some(format!("HTTP {status}"))),
                };
                return FetchResult {
                    url: url.to_string(),
                    source_category: category.to_string(),
                    http_status: Some(response.status),
                    content,
                    error,
                    fetched_at,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    retry_count: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    enum Reply {
        Status(u16, &'static str),
        Broken(&'static str),
    }

    /// Scripted transport: pops one reply per call, records call times.
    struct ScriptedTransport {
        replies: StdMutex<HashMap<String, VecDeque<Reply>>>,
        calls: StdMutex<Vec<(String, tokio::time::Instant)>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                replies: StdMutex::new(HashMap::new()),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn script(self, url: &str, replies: Vec<Reply>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .insert(url.to_string(), replies.into());
            self
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == url)
                .count()
        }

        fn call_times(&self) -> Vec<(String, tokio::time::Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), tokio::time::Instant::now()));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|q| q.pop_front());
            match reply {
                Some(Reply::Status(status, body)) => Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                }),
                Some(Reply::Broken(msg)) => Err(anyhow::anyhow!("{msg}")),
                None => Ok(HttpResponse {
                    status: 200,
                    body: "<p>Orchids need bright light to bloom well.</p>".to_string(),
                }),
            }
        }
    }

    fn urls(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(cat, list)| {
                (
                    cat.to_string(),
                    list.iter().map(|u| u.to_string()).collect(),
                )
            })
            .collect()
    }

    fn config(workers: usize, delay: f64) -> Config {
        let mut config = Config::default();
        config.max_parallel_workers = workers;
        config.request_delay = delay;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn http_500_three_times_yields_one_failed_result() {
        let url = "https://orchids.example/guide";
        let transport = Arc::new(ScriptedTransport::new().script(
            url,
            vec![
                Reply::Status(500, "err"),
                Reply::Status(500, "err"),
                Reply::Status(500, "err"),
            ],
        ));
        let fetcher = Fetcher::with_transport(transport.clone(), &config(1, 0.1));

        let (results, progress) = fetcher
            .fetch_all(&urls(&[("care", &[url])]))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert!(!r.success());
        assert_eq!(r.http_status, Some(500));
        assert_eq!(r.error.as_deref(), Some("HTTP 500"));
        assert_eq!(r.retry_count, 2);
        assert_eq!(transport.calls_to(url), 3);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_status_then_success() {
        let url = "https://orchids.example/care";
        let transport = Arc::new(ScriptedTransport::new().script(
            url,
            vec![
                Reply::Status(429, "slow down"),
                Reply::Status(200, "<p>Phalaenopsis orchids prefer warm humid rooms.</p>"),
            ],
        ));
        let fetcher = Fetcher::with_transport(transport.clone(), &config(1, 0.1));

        let (results, progress) = fetcher
            .fetch_all(&urls(&[("care", &[url])]))
            .await
            .unwrap();

        let r = &results[0];
        assert!(r.success());
        assert_eq!(r.retry_count, 1);
        assert_eq!(transport.calls_to(url), 2);
        assert_eq!(progress.ok, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_terminal() {
        let url = "https://dead.example/page";
        let transport =
            Arc::new(ScriptedTransport::new().script(url, vec![Reply::Broken("connection refused")]));
        let fetcher = Fetcher::with_transport(transport.clone(), &config(1, 0.1));

        let (results, _) = fetcher
            .fetch_all(&urls(&[("care", &[url])]))
            .await
            .unwrap();

        let r = &results[0];
        assert!(!r.success());
        assert_eq!(r.http_status, None);
        assert!(r.error.as_deref().unwrap().contains("connection refused"));
        // no retry loop for transport failures
        assert_eq!(transport.calls_to(url), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_status_fails_fast() {
        let url = "https://orchids.example/missing";
        let transport = Arc::new(
            ScriptedTransport::new().script(url, vec![Reply::Status(404, "not found")]),
        );
        let fetcher = Fetcher::with_transport(transport.clone(), &config(1, 0.1));

        let (results, _) = fetcher.fetch_all(&urls(&[("care", &[url])])).await.unwrap();
        assert_eq!(results[0].error.as_deref(), Some("HTTP 404"));
        assert_eq!(transport.calls_to(url), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_body_counts_as_failure() {
        let url = "https://orchids.example/empty";
        let transport =
            Arc::new(ScriptedTransport::new().script(url, vec![Reply::Status(200, "   ")]));
        let fetcher = Fetcher::with_transport(transport, &config(1, 0.1));

        let (results, _) = fetcher.fetch_all(&urls(&[("care", &[url])])).await.unwrap();
        let r = &results[0];
        assert!(!r.success());
        assert_eq!(r.error.as_deref(), Some("empty response body"));
        // success flag always agrees with the error field
        assert_eq!(r.success(), r.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn same_domain_requests_respect_the_delay() {
        let a = "https://orchids.example/one";
        let b = "https://orchids.example/two";
        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Fetcher::with_transport(transport.clone(), &config(1, 2.0));

        fetcher
            .fetch_all(&urls(&[("care", &[a, b])]))
            .await
            .unwrap();

        let calls = transport.call_times();
        assert_eq!(calls.len(), 2);
        let gap = calls[1].1 - calls[0].1;
        assert!(gap >= Duration::from_secs(2), "gap {:?}", gap);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_workers_cannot_bypass_the_domain_delay() {
        let targets = [
            "https://orchids.example/a",
            "https://orchids.example/b",
            "https://orchids.example/c",
        ];
        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Fetcher::with_transport(transport.clone(), &config(3, 1.0));

        let (results, _) = fetcher
            .fetch_all(&urls(&[("care", &targets)]))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);

        let mut times: Vec<_> = transport.call_times().into_iter().map(|(_, t)| t).collect();
        times.sort();
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(1), "gap {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn different_domains_do_not_block_each_other() {
        let a = "https://first.example/page";
        let b = "https://second.example/page";
        let transport = Arc::new(ScriptedTransport::new());
        let fetcher = Fetcher::with_transport(transport.clone(), &config(2, 30.0));

        let before = tokio::time::Instant::now();
        fetcher.fetch_all(&urls(&[("care", &[a, b])])).await.unwrap();
        let elapsed = tokio::time::Instant::now() - before;
        // first request per domain never waits
        assert!(elapsed < Duration::from_secs(30), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_mode_returns_the_same_result_set() {
        let set = [
            "https://one.example/x",
            "https://two.example/y",
            "https://three.example/z",
        ];
        let make_transport = || {
            Arc::new(
                ScriptedTransport::new()
                    .script(set[1], vec![Reply::Status(404, "gone")])
                    .script(set[2], vec![Reply::Broken("timed out")]),
            )
        };

        let sequential = Fetcher::with_transport(make_transport(), &config(1, 0.01));
        let parallel = Fetcher::with_transport(make_transport(), &config(3, 0.01));
        let (mut a, _) = sequential.fetch_all(&urls(&[("care", &set)])).await.unwrap();
        let (mut b, _) = parallel.fetch_all(&urls(&[("care", &set)])).await.unwrap();

        a.sort_by(|x, y| x.url.cmp(&y.url));
        b.sort_by(|x, y| x.url.cmp(&y.url));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.url, y.url);
            assert_eq!(x.http_status, y.http_status);
            assert_eq!(x.success(), y.success());
        }
    }

    #[tokio::test]
    async fn no_urls_is_a_top_level_error() {
        let fetcher =
            Fetcher::with_transport(Arc::new(ScriptedTransport::new()), &config(1, 0.1));
        let err = fetcher.fetch_all(&BTreeMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("No URLs"));
    }

    #[test]
    fn domain_extraction_handles_www_and_ports() {
        assert_eq!(domain_of("https://www.orchids.example/a/b"), "orchids.example");
        assert_eq!(domain_of("http://host.example:8080/page"), "host.example:8080");
        assert_eq!(domain_of("not a url"), "not a url");
    }
}
