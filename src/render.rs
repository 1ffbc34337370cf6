// Preview rendering: turn a hydrated event into chat messages.
//
// A post renders to one main preview plus one supplementary preview per
// extra photo. The last preview in the sequence carries the footer and
// timestamp. Reshares of an already-published post don't render at all;
// they become a "Reshared by" line on the existing message.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::colors::ColorPrefs;
use crate::event::Event;

/// Name of the preview field that lists later reshares.
pub const RESHARED_BY_FIELD: &str = "Reshared by";

/// Longest quoted text shown inside a quote field.
const QUOTE_PREVIEW_CHARS: usize = 280;

/// One message as sent to (or fetched from) the chat API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
}

impl Content {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            preview: None,
        }
    }

    pub fn preview(preview: Preview) -> Self {
        Self {
            body: None,
            preview: Some(preview),
        }
    }
}

/// A rich preview card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<PreviewField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// What kind of post an event is. A reshare of a quote is a reshare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Post,
    Reply,
    Reshare,
    Quote,
}

pub fn classify(event: &Event) -> EventKind {
    if event.is_reshare() {
        EventKind::Reshare
    } else if event.is_quote() {
        EventKind::Quote
    } else if event.is_reply() {
        EventKind::Reply
    } else {
        EventKind::Post
    }
}

/// Build the preview sequence for a freshly seen post.
///
/// Content (text, photos, quote) comes from the original for a reshare;
/// the color follows the account that put it in our feed.
pub fn render_event(event: &Event, colors: &ColorPrefs) -> Vec<Preview> {
    let kind = classify(event);
    let source = event.reshare_of.as_deref().unwrap_or(event);
    let color = colors.get(&event.author.id);
    let url = source.permalink().map(str::to_string);

    let title = match kind {
        EventKind::Reshare => Some(format!(
            "Reshared by {} (@{})",
            event.author.display_name(),
            event.author.handle
        )),
        EventKind::Reply => {
            let target = event
                .reply_to_handle
                .as_deref()
                .or(event.reply_to.as_deref())
                .unwrap_or_default();
            Some(format!("Replying to @{target}"))
        }
        EventKind::Post | EventKind::Quote => None,
    };

    let mut fields = Vec::new();
    if let Some(quoted) = source.quote_of.as_deref() {
        let mut value = truncate_chars(&quoted.text, QUOTE_PREVIEW_CHARS);
        if let Some(link) = quoted.permalink() {
            value.push('\n');
            value.push_str(link);
        }
        fields.push(PreviewField {
            name: format!("Quoting @{}", quoted.author.handle),
            value,
            inline: false,
        });
    }

    let mut previews = vec![Preview {
        author: Some(format!(
            "{} (@{})",
            source.author.display_name(),
            source.author.handle
        )),
        title,
        url: url.clone(),
        description: (!source.text.is_empty()).then(|| source.text.clone()),
        image: source.photos.first().cloned(),
        color,
        fields,
        ..Preview::default()
    }];

    previews.extend(source.photos.iter().skip(1).map(|photo| Preview {
        url: url.clone(),
        image: Some(photo.clone()),
        color,
        ..Preview::default()
    }));

    if let Some(last) = previews.last_mut() {
        last.footer = Some(format!("@{}", source.author.handle));
        last.timestamp = Some(source.created_at);
    }

    previews
}

/// The line added to an existing preview when `reshare` reposts it.
pub fn reshare_line(reshare: &Event) -> String {
    let link = match reshare.permalink() {
        Some(url) => format!("[@{}]({url})", reshare.author.handle),
        None => format!("@{}", reshare.author.handle),
    };
    let delta = reshare
        .reshare_of
        .as_deref()
        .map(|original| format_time_delta(reshare.created_at - original.created_at))
        .unwrap_or_default();

    if delta.is_empty() {
        link
    } else {
        format!("{link} ({delta} later)")
    }
}

/// Append `line` to the preview's "Reshared by" field, creating it if needed.
pub fn add_reshare_line(preview: &mut Preview, line: &str) {
    match preview
        .fields
        .iter_mut()
        .find(|field| field.name == RESHARED_BY_FIELD)
    {
        Some(field) => {
            field.value.push('\n');
            field.value.push_str(line);
        }
        None => preview.fields.push(PreviewField {
            name: RESHARED_BY_FIELD.to_string(),
            value: line.to_string(),
            inline: false,
        }),
    }
}

/// Format a duration as `1d 2h 3m 4s`, largest unit first, zero units omitted.
///
/// Zero renders as an empty string. Anything else renders non-empty:
/// sub-second durations become `<1s`. Negative durations (clock skew between
/// a reshare and its original) are formatted by magnitude.
pub fn format_time_delta(delta: TimeDelta) -> String {
    let delta = delta.abs();
    if delta.is_zero() {
        return String::new();
    }

    let total_seconds = delta.num_seconds();
    if total_seconds == 0 {
        return "<1s".to_string();
    }

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    [(days, 'd'), (hours, 'h'), (minutes, 'm'), (seconds, 's')]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Counts characters, not bytes, so it never splits a multi-byte character.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}
