use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;

use crate::evtx::EvtxRecord;
use crate::output::{Envelope, OutputError, OutputSink};

/// One JSON `POST` per record.
pub struct HttpSink {
    tag: String,
    timeout: Duration,
    url: Option<Url>,
    client: Option<Client>,
}

impl HttpSink {
    pub fn new(tag: &str, timeout: Duration) -> Self {
        Self {
            tag: tag.to_string(),
            timeout,
            url: None,
            client: None,
        }
    }
}

impl OutputSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn open(&mut self, target: &str) -> Result<(), OutputError> {
        if target.trim().is_empty() {
            return Err(OutputError::MissingTarget("http"));
        }
        let url = Url::parse(target.trim()).map_err(|err| OutputError::InvalidTarget {
            target: target.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OutputError::InvalidTarget {
                target: target.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        self.client = Some(Client::builder().timeout(self.timeout).build()?);
        self.url = Some(url);
        Ok(())
    }

    fn send(&mut self, record: &EvtxRecord) -> Result<(), OutputError> {
        let (Some(client), Some(url)) = (&self.client, &self.url) else {
            return Err(OutputError::NotOpen);
        };
        client
            .post(url.clone())
            .json(&Envelope::new(&self.tag, record))
            .send()?
            .error_for_status()?;
        Ok(())
    }
}
