// In-process fakes for the remote traits, shared by the integration tests.
//
// Each fake records what was asked of it and can be scripted to fail, so
// tests drive the dispatch loop, supervisor and commands without a network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use feedrelay::event::{Account, AccountId, Event};
use feedrelay::feed::{FeedStream, StopSignal, StreamMessage, StreamSource};
use feedrelay::remote::{ContentApi, HydrateError, PublishError, Publisher};
use feedrelay::render::Content;

// ============================================================
// Builders
// ============================================================

pub fn account(id: &str, handle: &str) -> Account {
    Account {
        id: id.to_string(),
        handle: handle.to_string(),
        name: String::new(),
    }
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

pub fn post(id: &str, author: Account, created_at: DateTime<Utc>) -> Event {
    let url = Some(format!("https://feed.example/{}/status/{id}", author.handle));
    Event {
        id: id.to_string(),
        author,
        created_at,
        text: format!("post {id}"),
        photos: vec![],
        videos: vec![],
        reply_to: None,
        reply_to_handle: None,
        reshare_of: None,
        quote_of: None,
        url,
    }
}

pub fn reshare(id: &str, by: Account, original: &Event, created_at: DateTime<Utc>) -> Event {
    let mut event = post(id, by, created_at);
    event.text = String::new();
    event.reshare_of = Some(Box::new(original.clone()));
    event
}

// ============================================================
// Content API
// ============================================================

#[derive(Default)]
pub struct FakeContent {
    events: Mutex<HashMap<String, Event>>,
    failures: Mutex<HashMap<String, VecDeque<HydrateError>>>,
    accounts: Mutex<Vec<Account>>,
    timelines: Mutex<HashMap<AccountId, Vec<Event>>>,
    hydrations: AtomicUsize,
}

impl FakeContent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_event(&self, event: Event) {
        self.events
            .lock()
            .unwrap()
            .insert(event.id.clone(), event);
    }

    pub fn add_account(&self, account: Account) {
        self.accounts.lock().unwrap().push(account);
    }

    pub fn set_timeline(&self, account: &str, events: Vec<Event>) {
        self.timelines
            .lock()
            .unwrap()
            .insert(account.to_string(), events);
    }

    /// Make the next `count` hydrations of `event_id` fail.
    pub fn fail_times(&self, event_id: &str, count: usize, transient: bool) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(event_id.to_string()).or_default();
        for _ in 0..count {
            queue.push_back(if transient {
                HydrateError::Transient("rate limited".into())
            } else {
                HydrateError::Permanent("not found".into())
            });
        }
    }

    pub fn hydrations(&self) -> usize {
        self.hydrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentApi for FakeContent {
    async fn get_full_event(&self, event_id: &str) -> Result<Event, HydrateError> {
        self.hydrations.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(event_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        self.events
            .lock()
            .unwrap()
            .get(event_id)
            .cloned()
            .ok_or_else(|| HydrateError::Permanent(format!("no event {event_id}")))
    }

    async fn get_timeline(
        &self,
        account_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Event>, HydrateError> {
        Ok(self
            .timelines
            .lock()
            .unwrap()
            .get(account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_account(&self, handle: &str) -> Result<Option<Account>, HydrateError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.handle.eq_ignore_ascii_case(handle))
            .cloned())
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>, HydrateError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == account_id)
            .cloned())
    }
}

// ============================================================
// Publisher
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: String,
    pub id: String,
    pub content: Content,
}

#[derive(Default)]
pub struct FakePublisher {
    sent: Mutex<Vec<SentMessage>>,
    edits: Mutex<Vec<(String, String)>>,
    send_script: Mutex<VecDeque<Result<(), PublishError>>>,
    edit_script: Mutex<VecDeque<Result<(), PublishError>>>,
    fetch_script: Mutex<VecDeque<Result<(), PublishError>>>,
    next_id: AtomicUsize,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the outcome of the next sends, in order. `Ok(())` lets a send
    /// through; unscripted sends succeed.
    pub fn script_sends(&self, outcomes: Vec<Result<(), PublishError>>) {
        self.send_script.lock().unwrap().extend(outcomes);
    }

    /// Same as `script_sends`, for edits.
    pub fn script_edits(&self, outcomes: Vec<Result<(), PublishError>>) {
        self.edit_script.lock().unwrap().extend(outcomes);
    }

    /// Same as `script_sends`, for fetches.
    pub fn script_fetches(&self, outcomes: Vec<Result<(), PublishError>>) {
        self.fetch_script.lock().unwrap().extend(outcomes);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel: &str) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.channel == channel)
            .collect()
    }

    /// (channel, message id) of every edit, in order.
    pub fn edits(&self) -> Vec<(String, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn message(&self, channel: &str, id: &str) -> Option<SentMessage> {
        self.sent()
            .into_iter()
            .find(|m| m.channel == channel && m.id == id)
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn send(&self, channel: &str, content: &Content) -> Result<String, PublishError> {
        if let Some(Err(err)) = self.send_script.lock().unwrap().pop_front() {
            return Err(err);
        }
        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.sent.lock().unwrap().push(SentMessage {
            channel: channel.to_string(),
            id: id.clone(),
            content: content.clone(),
        });
        Ok(id)
    }

    async fn edit(
        &self,
        channel: &str,
        message_id: &str,
        content: &Content,
    ) -> Result<(), PublishError> {
        if let Some(Err(err)) = self.edit_script.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut sent = self.sent.lock().unwrap();
        let message = sent
            .iter_mut()
            .find(|m| m.channel == channel && m.id == message_id)
            .ok_or_else(|| PublishError::Rejected(format!("unknown message {message_id}")))?;
        message.content = content.clone();
        self.edits
            .lock()
            .unwrap()
            .push((channel.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn fetch(&self, channel: &str, message_id: &str) -> Result<Content, PublishError> {
        if let Some(Err(err)) = self.fetch_script.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.message(channel, message_id)
            .map(|m| m.content)
            .ok_or_else(|| PublishError::Rejected(format!("unknown message {message_id}")))
    }
}

// ============================================================
// Stream source
// ============================================================

/// Hands out one scripted message list per connection. After its script a
/// stream stays open (idle) until it is told to stop.
#[derive(Default)]
pub struct FakeSource {
    scripts: Mutex<VecDeque<Vec<StreamMessage>>>,
    connects: Mutex<Vec<Vec<AccountId>>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next connection.
    pub fn script(&self, messages: Vec<StreamMessage>) {
        self.scripts.lock().unwrap().push_back(messages);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    /// The follow list of every connection, in order.
    pub fn connects(&self) -> Vec<Vec<AccountId>> {
        self.connects.lock().unwrap().clone()
    }
}

impl StreamSource for FakeSource {
    fn connect(&self, follow: &[AccountId], stop: &StopSignal) -> Result<Box<dyn FeedStream>> {
        self.connects.lock().unwrap().push(follow.to_vec());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(FakeStream {
            script: script.into(),
            stop: stop.clone(),
        }))
    }
}

struct FakeStream {
    script: VecDeque<StreamMessage>,
    stop: StopSignal,
}

impl FeedStream for FakeStream {
    fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        if let Some(message) = self.script.pop_front() {
            return Ok(Some(message));
        }
        while !self.stop.is_stopped() {
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(None)
    }
}

/// Poll `condition` on a real clock until it holds or a second passes.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
