// Event model: the items that flow from the upstream feed to the chat.
//
// These types are shared by the feed thread, the dispatch loop and the
// remote adapters. They are plain data so tests can build them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream account identifier (stable, unlike the handle).
pub type AccountId = String;
/// Destination chat channel identifier.
pub type ChannelId = String;
/// Upstream event identifier.
pub type EventId = String;
/// Identifier of a message we published to a chat channel.
pub type MessageId = String;

/// An upstream account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// The @-name, without the leading "@".
    pub handle: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl Account {
    /// Display name, falling back to the handle when the account has none.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.handle
        } else {
            &self.name
        }
    }
}

/// One rendition of a video attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoVariant {
    pub url: String,
    pub content_type: String,
    #[serde(default)]
    pub bitrate: Option<u64>,
}

/// A video attachment with all of its encoded variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub variants: Vec<VideoVariant>,
}

impl Video {
    /// The highest-bitrate mp4 variant, which is what gets linked in chat.
    pub fn best_mp4(&self) -> Option<&str> {
        self.variants
            .iter()
            .filter(|v| v.content_type == "video/mp4")
            .max_by_key(|v| v.bitrate.unwrap_or(0))
            .map(|v| v.url.as_str())
    }
}

/// A post as delivered by the content API (or, abbreviated, by the feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub author: Account,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    /// Photo URLs in display order.
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub videos: Vec<Video>,
    /// Account this post replies to, if it is a reply.
    #[serde(default)]
    pub reply_to: Option<AccountId>,
    #[serde(default)]
    pub reply_to_handle: Option<String>,
    /// The original post, if this is a reshare.
    #[serde(default)]
    pub reshare_of: Option<Box<Event>>,
    /// The quoted post, if this is a reshare with commentary.
    #[serde(default)]
    pub quote_of: Option<Box<Event>>,
    /// Permalink, when the upstream provides one.
    #[serde(default)]
    pub url: Option<String>,
}

impl Event {
    pub fn is_reshare(&self) -> bool {
        self.reshare_of.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    pub fn is_quote(&self) -> bool {
        self.quote_of.is_some()
    }

    /// Permalink for this post, if known.
    pub fn permalink(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Give this post, and the posts it embeds, a permalink under `base`
    /// where the upstream sent none: `{base}/{handle}/status/{id}`.
    pub fn fill_permalinks(&mut self, base: &str) {
        let base = base.trim_end_matches('/');
        if self.url.is_none() {
            self.url = Some(format!("{base}/{}/status/{}", self.author.handle, self.id));
        }
        for embedded in [self.reshare_of.as_deref_mut(), self.quote_of.as_deref_mut()]
            .into_iter()
            .flatten()
        {
            embedded.fill_permalinks(base);
        }
    }

    /// The video that should be linked under the preview, if any.
    ///
    /// For a reshare the media belongs to the original post.
    pub fn displayed_video(&self) -> Option<&str> {
        let source = self.reshare_of.as_deref().unwrap_or(self);
        source.videos.first().and_then(Video::best_mp4)
    }
}

/// The identifier all reshares of one post collapse onto.
///
/// A reshare maps to the post it reshares; anything else maps to itself.
pub fn canonical_id(event: &Event) -> &str {
    match &event.reshare_of {
        Some(original) => &original.id,
        None => &event.id,
    }
}

/// An item waiting in the event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Delivered by the live stream (abbreviated; must be hydrated).
    Streamed(Event),
    /// Synthesized by backfill or an operator requeue. Carries only what
    /// the dispatch loop needs to hydrate and route it.
    Backfilled {
        id: EventId,
        author: AccountId,
        created_at: DateTime<Utc>,
    },
}

impl FeedEvent {
    pub fn id(&self) -> &str {
        match self {
            FeedEvent::Streamed(event) => &event.id,
            FeedEvent::Backfilled { id, .. } => id,
        }
    }

    pub fn author_id(&self) -> &str {
        match self {
            FeedEvent::Streamed(event) => &event.author.id,
            FeedEvent::Backfilled { author, .. } => author,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            FeedEvent::Streamed(event) => event.created_at,
            FeedEvent::Backfilled { created_at, .. } => *created_at,
        }
    }
}

/// A feed event plus its permanent-failure retry count.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub event: FeedEvent,
    pub retries: u32,
}

impl QueuedEvent {
    pub fn new(event: FeedEvent) -> Self {
        Self { event, retries: 0 }
    }
}

impl From<FeedEvent> for QueuedEvent {
    fn from(event: FeedEvent) -> Self {
        Self::new(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            handle: format!("user{id}"),
            name: String::new(),
        }
    }

    fn post(id: &str, author: &str) -> Event {
        Event {
            id: id.to_string(),
            author: account(author),
            created_at: Utc::now(),
            text: "hello".to_string(),
            photos: vec![],
            videos: vec![],
            reply_to: None,
            reply_to_handle: None,
            reshare_of: None,
            quote_of: None,
            url: None,
        }
    }

    #[test]
    fn test_canonical_id_of_plain_post_is_its_own_id() {
        let e = post("100", "A");
        assert_eq!(canonical_id(&e), "100");
    }

    #[test]
    fn test_canonical_id_of_reshare_is_original_id() {
        let original = post("100", "A");
        let mut reshare = post("200", "B");
        reshare.reshare_of = Some(Box::new(original.clone()));
        assert_eq!(canonical_id(&reshare), canonical_id(&original));
        assert_eq!(canonical_id(&reshare), "100");
    }

    #[test]
    fn test_quote_is_not_collapsed_onto_quoted_post() {
        let quoted = post("100", "A");
        let mut quote = post("300", "B");
        quote.quote_of = Some(Box::new(quoted));
        assert_eq!(canonical_id(&quote), "300");
    }

    #[test]
    fn test_best_mp4_picks_highest_bitrate() {
        let video = Video {
            variants: vec![
                VideoVariant {
                    url: "low.mp4".into(),
                    content_type: "video/mp4".into(),
                    bitrate: Some(320_000),
                },
                VideoVariant {
                    url: "playlist.m3u8".into(),
                    content_type: "application/x-mpegURL".into(),
                    bitrate: None,
                },
                VideoVariant {
                    url: "high.mp4".into(),
                    content_type: "video/mp4".into(),
                    bitrate: Some(2_176_000),
                },
            ],
        };
        assert_eq!(video.best_mp4(), Some("high.mp4"));
    }

    #[test]
    fn test_displayed_video_of_reshare_comes_from_original() {
        let mut original = post("100", "A");
        original.videos = vec![Video {
            variants: vec![VideoVariant {
                url: "orig.mp4".into(),
                content_type: "video/mp4".into(),
                bitrate: Some(1),
            }],
        }];
        let mut reshare = post("200", "B");
        reshare.reshare_of = Some(Box::new(original));
        assert_eq!(reshare.displayed_video(), Some("orig.mp4"));
    }

    #[test]
    fn test_feed_event_accessors() {
        let streamed = FeedEvent::Streamed(post("1", "A"));
        assert_eq!(streamed.id(), "1");
        assert_eq!(streamed.author_id(), "A");

        let at = Utc::now();
        let backfilled = FeedEvent::Backfilled {
            id: "2".into(),
            author: "B".into(),
            created_at: at,
        };
        assert_eq!(backfilled.id(), "2");
        assert_eq!(backfilled.author_id(), "B");
        assert_eq!(backfilled.created_at(), at);
    }

    #[test]
    fn test_event_deserializes_with_missing_optional_fields() {
        let json = r#"{
            "id": "42",
            "author": {"id": "A123", "handle": "alice"},
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.id, "42");
        assert!(event.photos.is_empty());
        assert!(!event.is_reshare());
        assert!(!event.is_reply());
        assert_eq!(event.author.display_name(), "alice");
    }

    #[test]
    fn test_fill_permalinks_keeps_upstream_urls_and_fills_embedded_posts() {
        let mut original = post("100", "A");
        original.url = Some("https://upstream.example/p/100".into());
        let mut reshare = post("200", "B");
        reshare.reshare_of = Some(Box::new(original));
        assert_eq!(reshare.permalink(), None);

        reshare.fill_permalinks("https://feed.example/");
        assert_eq!(
            reshare.permalink(),
            Some("https://feed.example/userB/status/200")
        );
        assert_eq!(
            reshare.reshare_of.as_ref().unwrap().permalink(),
            Some("https://upstream.example/p/100")
        );
    }
}
