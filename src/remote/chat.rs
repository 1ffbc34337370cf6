// HTTP chat API: send, edit and fetch messages.
//
// Endpoints (relative to the configured chat API URL):
//   POST  channels/{channel}/messages       body Content → { "id": "..." }
//   PATCH channels/{channel}/messages/{id}  body Content
//   GET   channels/{channel}/messages/{id}  → Content

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use super::client::ApiClient;
use super::traits::{PublishError, Publisher};
use crate::render::Content;

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

pub struct HttpPublisher {
    client: ApiClient,
}

impl HttpPublisher {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: ApiClient::new(base_url, token)?,
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn send(&self, channel: &str, content: &Content) -> Result<String, PublishError> {
        let sent: SentMessage = self
            .client
            .send_json(Method::POST, &["channels", channel, "messages"], content)
            .await?;
        Ok(sent.id)
    }

    async fn edit(
        &self,
        channel: &str,
        message_id: &str,
        content: &Content,
    ) -> Result<(), PublishError> {
        self.client
            .send_json_unit(
                Method::PATCH,
                &["channels", channel, "messages", message_id],
                content,
            )
            .await?;
        Ok(())
    }

    async fn fetch(&self, channel: &str, message_id: &str) -> Result<Content, PublishError> {
        let content: Content = self
            .client
            .get_json(&["channels", channel, "messages", message_id], &[])
            .await?;
        Ok(content)
    }
}
