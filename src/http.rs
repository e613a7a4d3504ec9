use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};

use crate::config::RetrySettings;
use crate::error::GibError;

/// Builds the shared blocking client with the crate user agent.
pub fn build_client(timeout: Duration) -> Result<Client, GibError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("metagib/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| GibError::InvalidConfig(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| GibError::InvalidConfig(err.to_string()))
}

/// One-shot GET with bounded retries under a single wall-clock budget.
///
/// Only 5xx responses (other than 501) are retried. A transport failure or a
/// 429 ends the call straight away: the former as an error, the latter as the
/// returned response.
#[derive(Clone)]
pub struct RetryingFetcher {
    client: Client,
    policy: RetrySettings,
}

impl RetryingFetcher {
    pub fn new(policy: RetrySettings) -> Result<Self, GibError> {
        let client = build_client(policy.timeout())?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RetrySettings {
        &self.policy
    }

    pub fn get(&self, url: &str, accept: Option<&'static str>) -> Result<Response, GibError> {
        self.send_with_retries(url, || {
            let request = self.client.get(url);
            match accept {
                Some(accept) => request
                    .header(reqwest::header::ACCEPT, accept)
                    .header(reqwest::header::CONTENT_TYPE, accept),
                None => request,
            }
        })
    }

    fn send_with_retries<F>(&self, url: &str, mut make_req: F) -> Result<Response, GibError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let budget = self.policy.timeout();
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(timed_out(url, started));
            }

            let response = match make_req().timeout(remaining).send() {
                Ok(response) => response,
                Err(err) if err.is_timeout() => return Err(timed_out(url, started)),
                Err(err) => {
                    return Err(GibError::Fetch {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            };

            let status = response.status().as_u16();
            if !is_retryable_status(status) {
                return Ok(response);
            }
            if attempt >= self.policy.max_retries {
                return Err(GibError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: attempt + 1,
                    status,
                });
            }

            let wait = self.backoff(attempt, retry_after(&response));
            if started.elapsed() + wait >= budget {
                return Err(timed_out(url, started));
            }
            tracing::debug!(url, status, attempt, wait_ms = wait.as_millis() as u64, "retrying");
            drop(response);
            thread::sleep(wait);
            attempt += 1;
        }
    }

    /// Exponential from `min_backoff`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let max = self.policy.max_backoff();
        if let Some(wait) = retry_after {
            return wait.min(max);
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.policy
            .min_backoff()
            .checked_mul(factor)
            .map_or(max, |wait| wait.min(max))
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 && status != 501
}

fn retry_after(response: &Response) -> Option<Duration> {
    if response.status().as_u16() != 503 {
        return None;
    }
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn timed_out(url: &str, started: Instant) -> GibError {
    GibError::FetchTimeout {
        url: url.to_string(),
        elapsed_ms: started.elapsed().as_millis(),
    }
}

/// Passes a 200 response through; any other status is a `FetchStatus` failure.
pub fn expect_ok(response: Response) -> Result<Response, GibError> {
    let status = response.status().as_u16();
    if status == 200 {
        return Ok(response);
    }
    Err(GibError::FetchStatus {
        url: response.url().to_string(),
        status,
    })
}
