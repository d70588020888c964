use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::error::{NoteminderError, Result};

/// In-memory origin: known URLs answer 200, unknown ones 404, and the whole
/// thing can be taken offline.
pub struct StubFetcher {
    pages: Mutex<HashMap<String, String>>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn with_pages(urls: &[&str]) -> Self {
        let pages = urls
            .iter()
            .map(|url| (url.to_string(), format!("live {url}")))
            .collect();
        Self {
            pages: Mutex::new(pages),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_page(&self, url: &str, body: &str) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), body.to_string());
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(NoteminderError::Fetch {
                url: request.url.clone(),
                message: "network unreachable".into(),
            });
        }
        let pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(match pages.get(&request.url) {
            Some(body) => FetchResponse::new(200, "text/plain", body.clone()),
            None => FetchResponse::new(404, "text/plain", "not found"),
        })
    }
}
