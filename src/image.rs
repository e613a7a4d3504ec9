use std::fs::File;
use std::path::Path;

use crate::error::GibError;
use crate::http::{RetryingFetcher, expect_ok};

pub trait ImageClient: Send + Sync {
    /// Writes the image at `url` to `destination`, returning the byte count.
    fn download_image(&self, url: &str, destination: &Path) -> Result<u64, GibError>;
}

#[derive(Clone)]
pub struct HttpImageClient {
    fetcher: RetryingFetcher,
}

impl HttpImageClient {
    pub fn new(fetcher: RetryingFetcher) -> Self {
        Self { fetcher }
    }
}

impl ImageClient for HttpImageClient {
    fn download_image(&self, url: &str, destination: &Path) -> Result<u64, GibError> {
        let response = self.fetcher.get(url, None)?;
        let mut response = expect_ok(response)?;
        let mut file = File::create(destination).map_err(|err| {
            GibError::Persistence(format!("create {}: {err}", destination.display()))
        })?;
        std::io::copy(&mut response, &mut file).map_err(|err| GibError::Fetch {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}
