// Dispatch loop: drain the event queue into the chat.
//
// For each queued event:
//   1. Resolve candidate destinations from the registry (drop if none)
//   2. Hydrate the full event from the content API
//   3. Classify and render the preview sequence
//   4. Filter destinations by relevance (replies need their target watched)
//   5. Canonicalize: reshares collapse onto the post they reshare
//   6. Publish a new preview, or amend the existing one with a reshare line
//   7. On a chat connectivity failure, re-enqueue the raw event. A preview
//      cut off partway is resumed from the first unsent unit on retry.
//
// Nothing is held across drains: every event ends each pass published,
// amended, skipped, dropped or back on the queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::colors::ColorPrefs;
use crate::event::{canonical_id, ChannelId, Event, FeedEvent, QueuedEvent};
use crate::history::PostHistory;
use crate::queue::EventQueue;
use crate::registry::SubscriptionRegistry;
use crate::remote::{ContentApi, HydrateError, PublishError, Publisher};
use crate::render::{self, Content, EventKind, Preview};

/// A permanently failing event is retried until its counter reaches this.
pub const MAX_PERMANENT_RETRIES: u32 = 5;

/// What a single drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Destinations that received a new preview.
    pub published: usize,
    /// Destinations whose existing preview gained a reshare line.
    pub amended: usize,
    /// Events put back on the queue.
    pub requeued: usize,
    /// Events discarded (unwatched author or retries exhausted).
    pub dropped: usize,
    /// Destinations skipped (irrelevant, duplicate, or rejected by chat).
    pub skipped: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Outcome of delivering one event to one destination.
enum Delivery {
    Published,
    Amended,
    Skipped,
    /// Chat is unreachable; stop and retry the whole event later.
    Unreachable,
}

pub struct Dispatcher {
    queue: EventQueue,
    content: Arc<dyn ContentApi>,
    publisher: Arc<dyn Publisher>,
    history: PostHistory,
    last_published_at: DateTime<Utc>,
}

impl Dispatcher {
    pub fn new(
        queue: EventQueue,
        content: Arc<dyn ContentApi>,
        publisher: Arc<dyn Publisher>,
        history: PostHistory,
    ) -> Self {
        Self {
            queue,
            content,
            publisher,
            history,
            last_published_at: Utc::now(),
        }
    }

    pub fn history(&self) -> &PostHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut PostHistory {
        &mut self.history
    }

    /// When a preview was last published. Starts out as the time the
    /// dispatcher was created.
    pub fn last_published_at(&self) -> DateTime<Utc> {
        self.last_published_at
    }

    /// Process the events that were queued when the drain began.
    ///
    /// Events re-enqueued during the drain land behind that boundary and are
    /// retried on the next call.
    pub async fn drain(
        &mut self,
        registry: &SubscriptionRegistry,
        colors: &ColorPrefs,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        let pending = self.queue.len();

        for _ in 0..pending {
            let Some(queued) = self.queue.pop() else {
                break;
            };
            self.process(queued, registry, colors, &mut report).await;
        }

        if !report.is_empty() {
            debug!(?report, remaining = self.queue.len(), "Drain complete");
        }
        report
    }

    async fn process(
        &mut self,
        queued: QueuedEvent,
        registry: &SubscriptionRegistry,
        colors: &ColorPrefs,
        report: &mut DrainReport,
    ) {
        if !has_candidates(&queued.event, registry) {
            debug!(
                event_id = %queued.event.id(),
                author = %queued.event.author_id(),
                "Author no longer watched, dropping event"
            );
            report.dropped += 1;
            return;
        }

        let event = match self.content.get_full_event(queued.event.id()).await {
            Ok(event) => event,
            Err(err) => {
                self.handle_hydrate_error(queued, err, report);
                return;
            }
        };

        let destinations = candidate_destinations(&event, registry);
        if destinations.is_empty() {
            report.dropped += 1;
            return;
        }

        let kind = render::classify(&event);
        let units = preview_units(&event, render::render_event(&event, colors));
        let canonical = canonical_id(&event).to_string();

        for destination in &destinations {
            if !is_relevant(&event, destination, registry) {
                debug!(event_id = %event.id, %destination, "Reply target not watched here, skipping");
                report.skipped += 1;
                continue;
            }

            let existing = self
                .history
                .entry_for(&canonical, destination)
                .map(|copy| copy.resume_at);
            let delivery = match existing {
                None => self.publish(&event, &canonical, destination, &units, 0).await,
                Some(Some(next)) => {
                    debug!(event_id = %event.id, %destination, next, "Resuming cut-off preview");
                    self.publish(&event, &canonical, destination, &units, next).await
                }
                Some(None) if kind == EventKind::Reshare => {
                    self.amend(&event, &canonical, destination).await
                }
                Some(None) => {
                    debug!(event_id = %event.id, %destination, "Already published here, skipping");
                    Delivery::Skipped
                }
            };

            match delivery {
                Delivery::Published => report.published += 1,
                Delivery::Amended => report.amended += 1,
                Delivery::Skipped => report.skipped += 1,
                Delivery::Unreachable => {
                    info!(event_id = %queued.event.id(), "Chat unreachable, requeueing event");
                    self.queue.push(queued);
                    report.requeued += 1;
                    return;
                }
            }
        }
    }

    fn handle_hydrate_error(&self, queued: QueuedEvent, err: HydrateError, report: &mut DrainReport) {
        match err {
            HydrateError::Transient(reason) => {
                debug!(event_id = %queued.event.id(), %reason, "Transient hydration failure, requeueing");
                self.queue.push(queued);
                report.requeued += 1;
            }
            HydrateError::Permanent(reason) if queued.retries >= MAX_PERMANENT_RETRIES => {
                warn!(
                    event_id = %queued.event.id(),
                    author = %queued.event.author_id(),
                    attempts = queued.retries + 1,
                    %reason,
                    "Giving up on event"
                );
                report.dropped += 1;
            }
            HydrateError::Permanent(reason) => {
                debug!(
                    event_id = %queued.event.id(),
                    retries = queued.retries + 1,
                    %reason,
                    "Hydration failed, requeueing"
                );
                self.queue.push(QueuedEvent {
                    event: queued.event,
                    retries: queued.retries + 1,
                });
                report.requeued += 1;
            }
        }
    }

    /// Send the units from `start` on, in order, then mark the copy
    /// complete.
    ///
    /// The first unit's message id is recorded as soon as it is sent. A
    /// non-zero `start` resumes a copy that an earlier attempt cut off.
    async fn publish(
        &mut self,
        event: &Event,
        canonical: &str,
        destination: &str,
        units: &[Content],
        start: usize,
    ) -> Delivery {
        for (index, unit) in units.iter().enumerate().skip(start) {
            match self.publisher.send(destination, unit).await {
                Ok(message_id) => {
                    if index == 0 {
                        self.history
                            .record_publish(canonical, destination, &message_id);
                    }
                }
                Err(err) => return self.publish_failed(event, canonical, destination, err, index),
            }
        }

        if !self.history.set_resume_at(canonical, destination, None) {
            return Delivery::Skipped;
        }
        self.published(event, canonical, destination)
    }

    /// Handle a send failure at unit `failed`.
    ///
    /// Before the first unit is out nothing was published. After it, a
    /// connectivity failure marks where the copy resumes and requeues the
    /// event, while a rejection keeps what was sent and drops the rest.
    fn publish_failed(
        &mut self,
        event: &Event,
        canonical: &str,
        destination: &str,
        err: PublishError,
        failed: usize,
    ) -> Delivery {
        if failed == 0 {
            if err.is_connectivity() {
                return Delivery::Unreachable;
            }
            warn!(event_id = %event.id, %destination, error = %err, "Chat rejected preview");
            return Delivery::Skipped;
        }

        if err.is_connectivity() {
            self.history
                .set_resume_at(canonical, destination, Some(failed));
            warn!(
                event_id = %event.id,
                %destination,
                units_sent = failed,
                error = %err,
                "Chat unreachable partway through preview"
            );
            return Delivery::Unreachable;
        }

        warn!(event_id = %event.id, %destination, error = %err, "Chat rejected part of preview");
        self.history.set_resume_at(canonical, destination, None);
        self.published(event, canonical, destination)
    }

    fn published(&mut self, event: &Event, canonical: &str, destination: &str) -> Delivery {
        if event.is_reshare() {
            self.history
                .record_reshare(canonical, destination, &event.author.id);
        }
        self.last_published_at = Utc::now();
        info!(url = event.permalink().unwrap_or(event.id.as_str()), %destination, "Published");
        Delivery::Published
    }

    /// Add a reshare line to the preview already published in `destination`.
    async fn amend(&mut self, event: &Event, canonical: &str, destination: &str) -> Delivery {
        if self
            .history
            .has_reshare(canonical, destination, &event.author.id)
        {
            debug!(event_id = %event.id, %destination, "Reshare already attributed, skipping");
            return Delivery::Skipped;
        }

        let Some(message_id) = self
            .history
            .entry_for(canonical, destination)
            .map(|copy| copy.message_id.clone())
        else {
            return Delivery::Skipped;
        };

        let mut content = match self.publisher.fetch(destination, &message_id).await {
            Ok(content) => content,
            Err(err) => return self.amend_failed(event, destination, err),
        };

        let Some(preview) = content.preview.as_mut() else {
            warn!(%message_id, %destination, "Published message has no preview to amend");
            return Delivery::Skipped;
        };
        render::add_reshare_line(preview, &render::reshare_line(event));

        if let Err(err) = self.publisher.edit(destination, &message_id, &content).await {
            return self.amend_failed(event, destination, err);
        }

        self.history
            .record_reshare(canonical, destination, &event.author.id);
        info!(url = event.permalink().unwrap_or(event.id.as_str()), %destination, "Reshare added to existing preview");
        Delivery::Amended
    }

    fn amend_failed(&self, event: &Event, destination: &str, err: PublishError) -> Delivery {
        if err.is_connectivity() {
            Delivery::Unreachable
        } else {
            warn!(event_id = %event.id, %destination, error = %err, "Could not amend preview");
            Delivery::Skipped
        }
    }
}

/// Everything a new copy consists of, in order: the previews, then the
/// video link as plain text.
fn preview_units(event: &Event, previews: Vec<Preview>) -> Vec<Content> {
    let mut units: Vec<Content> = previews.into_iter().map(Content::preview).collect();
    if let Some(video) = event.displayed_video() {
        units.push(Content::text(video));
    }
    units
}

/// Cheap pre-hydration check: does anyone still watch this event's author
/// (or, for a streamed reshare, the original author)?
fn has_candidates(event: &FeedEvent, registry: &SubscriptionRegistry) -> bool {
    if !registry.destinations_for(event.author_id()).is_empty() {
        return true;
    }
    match event {
        FeedEvent::Streamed(event) => event
            .reshare_of
            .as_deref()
            .is_some_and(|original| !registry.destinations_for(&original.author.id).is_empty()),
        FeedEvent::Backfilled { .. } => false,
    }
}

/// Destinations watching the author, followed by any further destinations
/// watching the original author of a reshare. No duplicates.
pub fn candidate_destinations(event: &Event, registry: &SubscriptionRegistry) -> Vec<ChannelId> {
    let mut destinations: Vec<ChannelId> = registry.destinations_for(&event.author.id).to_vec();
    if let Some(original) = event.reshare_of.as_deref() {
        for channel in registry.destinations_for(&original.author.id) {
            if !destinations.contains(channel) {
                destinations.push(channel.clone());
            }
        }
    }
    destinations
}

/// Replies only matter to a destination that also watches the account
/// being replied to. Everything else is relevant wherever it was routed.
pub fn is_relevant(event: &Event, destination: &str, registry: &SubscriptionRegistry) -> bool {
    if event.is_reshare() {
        return true;
    }
    match event.reply_to.as_deref() {
        Some(target) => registry.is_watched_in(target, destination),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Account;
    use chrono::TimeZone;

    fn event(id: &str, author: &str) -> Event {
        Event {
            id: id.into(),
            author: Account {
                id: author.into(),
                handle: author.to_lowercase(),
                name: String::new(),
            },
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            text: String::new(),
            photos: vec![],
            videos: vec![],
            reply_to: None,
            reply_to_handle: None,
            reshare_of: None,
            quote_of: None,
            url: None,
        }
    }

    fn registry(pairs: &[(&str, &str)]) -> SubscriptionRegistry {
        let mut registry = SubscriptionRegistry::new();
        for (account, channel) in pairs {
            registry.watch(account, channel);
        }
        registry
    }

    #[test]
    fn test_reply_relevant_only_where_target_watched() {
        let registry = registry(&[("A", "chan1"), ("A", "chan2"), ("C", "chan2")]);
        let mut reply = event("1", "A");
        reply.reply_to = Some("C".into());

        assert!(!is_relevant(&reply, "chan1", &registry));
        assert!(is_relevant(&reply, "chan2", &registry));
    }

    #[test]
    fn test_plain_post_always_relevant() {
        let registry = registry(&[("A", "chan1")]);
        assert!(is_relevant(&event("1", "A"), "chan1", &registry));
    }

    #[test]
    fn test_reshare_routes_to_original_authors_destinations() {
        let registry = registry(&[("A", "chan1"), ("B", "chan2"), ("B", "chan1")]);
        let mut reshare = event("2", "B");
        reshare.reshare_of = Some(Box::new(event("1", "A")));

        assert_eq!(
            candidate_destinations(&reshare, &registry),
            vec!["chan2".to_string(), "chan1".to_string()]
        );
    }

    #[test]
    fn test_unwatched_resharer_of_watched_post_has_candidates() {
        let registry = registry(&[("A", "chan1")]);
        let mut reshare = event("2", "B");
        reshare.reshare_of = Some(Box::new(event("1", "A")));

        assert!(has_candidates(&FeedEvent::Streamed(reshare), &registry));
        assert!(!has_candidates(
            &FeedEvent::Streamed(event("3", "B")),
            &registry
        ));
    }

    #[test]
    fn test_backfilled_candidates_use_author() {
        let registry = registry(&[("A", "chan1")]);
        let backfilled = FeedEvent::Backfilled {
            id: "1".into(),
            author: "A".into(),
            created_at: Utc::now(),
        };
        assert!(has_candidates(&backfilled, &registry));
    }
}
