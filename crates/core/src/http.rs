//! HTTP fetch service
//!
//! Downloads with a blocking `ureq` agent, streaming the body into a
//! temporary file beside the destination and renaming it into place once
//! complete.

use crate::error::FetchError;
use crate::fetch::{FetchRequest, FetchService};
use std::io::{Read, Write};
use std::time::Duration;
use thumbgrid_cache::{file_age, CacheDirectory};

const CHUNK_SIZE: usize = 4096;

/// [`FetchService`] over HTTP(S).
pub struct HttpFetchService {
    agent: ureq::Agent,
}

impl HttpFetchService {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .user_agent(concat!("thumbgrid/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }

    /// Use a preconfigured agent (proxy, TLS, timeouts).
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl Default for HttpFetchService {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchService for HttpFetchService {
    fn fetch(
        &self,
        request: &FetchRequest,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<(), FetchError> {
        if let (Some(expiry), Some(age)) = (request.cache_expiry, file_age(&request.destination)) {
            if age < expiry {
                log::debug!("{} is fresh, not refetching", request.destination.display());
                return Ok(());
            }
        }

        let response = self
            .agent
            .get(&request.url)
            .call()
            .map_err(|e| map_ureq_error(&request.url, e))?;
        let total = response
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok());

        let mut reader = response.into_reader();
        let written = CacheDirectory::persist_atomically(&request.destination, |file| {
            let mut buf = [0u8; CHUNK_SIZE];
            let mut received = 0u64;
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                file.write_all(&buf[..n])?;
                received += n as u64;
                progress(received, total);
            }
            Ok(())
        })?;

        log::debug!("fetched {} ({written} bytes)", request.url);
        Ok(())
    }
}

fn map_ureq_error(url: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(code, _) => FetchError::Transfer(format!("{url}: HTTP {code}")),
        ureq::Error::Transport(transport) => match transport.kind() {
            ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                FetchError::MalformedUrl(format!("{url}: {transport}"))
            }
            _ => FetchError::Transfer(format!("{url}: {transport}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(url: &str, destination: PathBuf, cache_expiry: Option<Duration>) -> FetchRequest {
        FetchRequest {
            url: url.to_string(),
            destination,
            cache_expiry,
        }
    }

    #[test]
    fn test_malformed_url() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.img");
        let service = HttpFetchService::new();

        let err = service
            .fetch(&request("not a url", dest.clone(), None), &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedUrl(_)), "{err:?}");
        assert!(!dest.exists());
    }

    #[test]
    fn test_unknown_scheme_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.img");
        let err = HttpFetchService::new()
            .fetch(&request("gopher://example.com/a.png", dest.clone(), None), &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedUrl(_)), "{err:?}");
        assert!(!dest.exists());
    }

    #[test]
    fn test_fresh_destination_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.img");
        std::fs::write(&dest, b"cached").unwrap();

        // The URL is never contacted.
        HttpFetchService::new()
            .fetch(
                &request("not a url", dest.clone(), Some(Duration::from_secs(3600))),
                &mut |_, _| {},
            )
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"cached");
    }

    #[test]
    fn test_no_expiry_always_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.img");
        std::fs::write(&dest, b"cached").unwrap();

        let err = HttpFetchService::new()
            .fetch(&request("not a url", dest.clone(), None), &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedUrl(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), b"cached");
    }
}
