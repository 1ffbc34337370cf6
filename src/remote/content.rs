// HTTP content API: hydration, timelines and account lookup.
//
// Endpoints (relative to the configured API URL):
//   GET events/{id}                         → Event
//   GET accounts/{id}/timeline?since=RFC3339 → { "events": [Event] }
//   GET accounts/by-handle/{handle}          → Account
//   GET accounts/{id}                        → Account
//
// Every call first waits on the shared rate limiter. Events the API returns
// without a `url` get one built from the configured post URL base, if any.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;

use super::client::ApiClient;
use super::rate_limit::RateLimiter;
use super::traits::{ContentApi, HydrateError};
use crate::event::{Account, Event};

/// Lookups allowed per window (900 per 15 minutes is a common upstream quota).
const REQUESTS_PER_WINDOW: u32 = 900;
const WINDOW: Duration = Duration::from_secs(15 * 60);
const MIN_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    events: Vec<Event>,
}

pub struct HttpContentApi {
    client: ApiClient,
    limiter: RateLimiter,
    post_url_base: Option<String>,
}

impl HttpContentApi {
    pub fn new(base_url: &str, token: Option<String>, post_url_base: Option<String>) -> Result<Self> {
        Ok(Self {
            client: ApiClient::new(base_url, token)?,
            limiter: RateLimiter::new(REQUESTS_PER_WINDOW, WINDOW, MIN_DELAY),
            post_url_base,
        })
    }

    fn with_permalinks(&self, mut event: Event) -> Event {
        if let Some(base) = &self.post_url_base {
            event.fill_permalinks(base);
        }
        event
    }

    async fn lookup_account(&self, segments: &[&str]) -> Result<Option<Account>, HydrateError> {
        self.limiter.acquire().await;
        match self.client.get_json::<Account>(segments, &[]).await {
            Ok(account) => Ok(Some(account)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ContentApi for HttpContentApi {
    async fn get_full_event(&self, event_id: &str) -> Result<Event, HydrateError> {
        self.limiter.acquire().await;
        let event: Event = self
            .client
            .get_json(&["events", event_id], &[])
            .await
            .map_err(HydrateError::from)?;
        debug!(event_id, "Hydrated event");
        Ok(self.with_permalinks(event))
    }

    async fn get_timeline(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Event>, HydrateError> {
        self.limiter.acquire().await;
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let response: TimelineResponse = self
            .client
            .get_json(&["accounts", account_id, "timeline"], &[("since", since.as_str())])
            .await
            .map_err(HydrateError::from)?;
        debug!(
            account_id,
            count = response.events.len(),
            "Fetched timeline"
        );
        Ok(response
            .events
            .into_iter()
            .map(|event| self.with_permalinks(event))
            .collect())
    }

    async fn find_account(&self, handle: &str) -> Result<Option<Account>, HydrateError> {
        let handle = handle.trim_start_matches('@');
        self.lookup_account(&["accounts", "by-handle", handle]).await
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>, HydrateError> {
        self.lookup_account(&["accounts", account_id]).await
    }
}
