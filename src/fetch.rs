use std::time::Duration;

use anyhow::{Context, Result};

/// Guest search endpoint with every filter pinned (empty keyword, worldwide,
/// full-time/contract, remote). The start offset is the only variable part.
const SEARCH_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search?keywords=&location=Worldwide&locationId=&geoId=92000000&f_TPR=&f_JT=F%2CC&f_WT=2&start=";

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Fetching capability injected into the crawler, so tests can substitute
/// canned pages for live HTTP.
pub trait PageFetcher {
    fn fetch_page(&self, offset: usize) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch_page(&self, offset: usize) -> Result<String> {
        let url = format!("{}{}", SEARCH_URL, offset);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("Failed to fetch jobs page at offset {}", offset))?
            .error_for_status()
            .with_context(|| format!("Jobs endpoint rejected request at offset {}", offset))?;
        response
            .text()
            .with_context(|| format!("Failed to read jobs page body at offset {}", offset))
    }
}
