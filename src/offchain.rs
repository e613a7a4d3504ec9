use crate::domain::OffChainRecord;
use crate::error::GibError;
use crate::http::{RetryingFetcher, expect_ok};

/// The fetched document: raw body bytes plus the fields parsed from them.
#[derive(Debug, Clone, PartialEq)]
pub struct OffChainDocument {
    pub raw: Vec<u8>,
    pub record: OffChainRecord,
}

pub trait OffChainClient: Send + Sync {
    fn fetch_document(&self, uri: &str) -> Result<OffChainDocument, GibError>;
}

#[derive(Clone)]
pub struct HttpOffChainClient {
    fetcher: RetryingFetcher,
}

impl HttpOffChainClient {
    pub fn new(fetcher: RetryingFetcher) -> Self {
        Self { fetcher }
    }
}

impl OffChainClient for HttpOffChainClient {
    fn fetch_document(&self, uri: &str) -> Result<OffChainDocument, GibError> {
        let response = self.fetcher.get(uri, Some("application/json"))?;
        let response = expect_ok(response)?;
        let raw = response
            .bytes()
            .map_err(|err| GibError::Fetch {
                url: uri.to_string(),
                message: err.to_string(),
            })?
            .to_vec();
        let record = parse_document(&raw)?;
        Ok(OffChainDocument { raw, record })
    }
}

pub fn parse_document(raw: &[u8]) -> Result<OffChainRecord, GibError> {
    serde_json::from_slice(raw).map_err(|err| GibError::Parse(err.to_string()))
}
