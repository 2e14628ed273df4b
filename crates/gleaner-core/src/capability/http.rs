//! Built-in `http(s)://` capability: GET a JSON document with libcurl.
//!
//! Accepts a top-level array, an object wrapping an array under `items`,
//! `results` or `data`, or JSON lines. The transfer is bounded by the attempt
//! deadline and aborted from curl's progress callback once cancelled.

use std::time::Duration;

use serde_json::Value;

use super::{Capability, CapabilityError, RawRecord, RecordStream, ScrapeContext};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const WRAPPER_KEYS: [&str; 3] = ["items", "results", "data"];

#[derive(Debug, Clone)]
pub struct HttpJson {
    url: url::Url,
}

impl HttpJson {
    pub fn new(url: url::Url) -> Self {
        Self { url }
    }

    fn fetch(&self, ctx: &ScrapeContext) -> Result<Vec<u8>, CapabilityError> {
        let fetch_err = |e: curl::Error| CapabilityError::Fetch(e.to_string());
        let mut body = Vec::new();
        let mut easy = curl::easy::Easy::new();
        easy.url(self.url.as_str()).map_err(fetch_err)?;
        easy.follow_location(true).map_err(fetch_err)?;
        easy.connect_timeout(CONNECT_TIMEOUT).map_err(fetch_err)?;
        easy.timeout(ctx.remaining().max(Duration::from_secs(1)))
            .map_err(fetch_err)?;
        easy.progress(true).map_err(fetch_err)?;
        {
            let cancel = ctx.cancel.clone();
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    body.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(fetch_err)?;
            transfer
                .progress_function(move |_, _, _, _| !cancel.is_cancelled())
                .map_err(fetch_err)?;
            if let Err(e) = transfer.perform() {
                if e.is_aborted_by_callback() {
                    return Err(CapabilityError::Cancelled);
                }
                return Err(fetch_err(e));
            }
        }
        let code = easy.response_code().map_err(fetch_err)?;
        if !(200..300).contains(&code) {
            return Err(CapabilityError::Fetch(format!(
                "GET {} returned HTTP {}",
                self.url, code
            )));
        }
        Ok(body)
    }
}

/// Split a response body into raw records.
pub(super) fn parse_body(body: &[u8]) -> Vec<RawRecord> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => items.into_iter().map(RawRecord::from_json).collect(),
        Ok(Value::Object(mut map)) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items.into_iter().map(RawRecord::from_json).collect();
                }
            }
            vec![RawRecord::Partial(map)]
        }
        Ok(other) => vec![RawRecord::from_json(other)],
        Err(_) => String::from_utf8_lossy(body)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| match serde_json::from_str::<Value>(l) {
                Ok(v) => RawRecord::from_json(v),
                Err(_) => RawRecord::Identifier(l.to_string()),
            })
            .collect(),
    }
}

impl Capability for HttpJson {
    fn scrape(&self, ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError> {
        let body = self.fetch(ctx)?;
        Ok(Box::new(parse_body(&body).into_iter().map(Ok)))
    }
}
