// Operator commands: watch, unwatch, list, color, backfill, requeue, restart.
//
// Commands arrive as text lines tagged with the channel they were issued in
// and run on the daemon task, with direct access to the registry and color
// preferences. Each returns the reply to post back to that channel.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use regex_lite::Regex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::colors::{format_hex_color, parse_hex_color, ColorPrefs};
use crate::event::{Account, ChannelId, FeedEvent};
use crate::feed::RestartFlag;
use crate::queue::EventQueue;
use crate::registry::{RegistryError, SubscriptionRegistry};
use crate::remote::ContentApi;
use crate::store::{self, StateStore, COLORS_KEY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Watch accounts in this channel, optionally for a limited time.
    Watch {
        handles: Vec<String>,
        minutes: Option<u64>,
    },
    /// Stop watching an account here. `timed` marks the automatic unwatch
    /// scheduled by a timed watch.
    Unwatch { handle: String, timed: bool },
    List,
    Color { handle: String, hex: Option<String> },
    /// Re-queue every watched account's posts since a point in time.
    Backfill { since: Option<DateTime<Utc>> },
    /// Re-queue one post by link or id.
    Requeue { target: String },
    Restart,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("could not parse time '{0}' (use RFC 3339 or 'YYYY MM DD HH MM')")]
    BadTime(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(ParseError::Empty)?.to_lowercase();
        let args: Vec<&str> = words.collect();

        match name.as_str() {
            "watch" => match args.as_slice() {
                [] => Ok(Command::List),
                [handle] => Ok(Command::Watch {
                    handles: vec![clean_handle(handle)],
                    minutes: None,
                }),
                [rest @ .., last] => match last.parse::<u64>() {
                    Ok(minutes) => Ok(Command::Watch {
                        handles: rest.iter().map(|h| clean_handle(h)).collect(),
                        minutes: Some(minutes),
                    }),
                    Err(_) => Ok(Command::Watch {
                        handles: args.iter().map(|h| clean_handle(h)).collect(),
                        minutes: None,
                    }),
                },
            },
            "unwatch" => match args.as_slice() {
                [handle] => Ok(Command::Unwatch {
                    handle: clean_handle(handle),
                    timed: false,
                }),
                _ => Err(ParseError::Usage("unwatch <handle>")),
            },
            "list" => Ok(Command::List),
            "color" => match args.as_slice() {
                [handle] => Ok(Command::Color {
                    handle: clean_handle(handle),
                    hex: None,
                }),
                [handle, hex] => Ok(Command::Color {
                    handle: clean_handle(handle),
                    hex: Some(hex.to_string()),
                }),
                _ => Err(ParseError::Usage("color <handle> [hex]")),
            },
            "backfill" => {
                if args.is_empty() {
                    return Ok(Command::Backfill { since: None });
                }
                let raw = args.join(" ");
                let since = parse_since(&raw).ok_or(ParseError::BadTime(raw))?;
                Ok(Command::Backfill { since: Some(since) })
            }
            "requeue" => match args.as_slice() {
                [target] => Ok(Command::Requeue {
                    target: target.to_string(),
                }),
                _ => Err(ParseError::Usage("requeue <link-or-id>")),
            },
            "restart" => Ok(Command::Restart),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn clean_handle(handle: &str) -> String {
    handle.trim_start_matches('@').to_string()
}

/// Parse a backfill start time: RFC 3339, or five space-separated numbers
/// `YYYY MM DD HH MM` in local time.
pub fn parse_since(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Some(time.with_timezone(&Utc));
    }

    let parts: Vec<u32> = raw
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    let [year, month, day, hour, minute] = parts.as_slice() else {
        return None;
    };
    let naive = NaiveDate::from_ymd_opt(i32::try_from(*year).ok()?, *month, *day)?
        .and_hms_opt(*hour, *minute, 0)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|time| time.with_timezone(&Utc))
}

/// Matches `/status/{id}` and `/statuses/{id}` in post links.
static EVENT_LINK: OnceLock<Option<Regex>> = OnceLock::new();

fn event_link() -> Option<&'static Regex> {
    EVENT_LINK
        .get_or_init(|| Regex::new(r"/status(?:es)?/([A-Za-z0-9_-]+)").ok())
        .as_ref()
}

/// Pull a post id out of a permalink, or accept a bare id.
pub fn parse_event_ref(target: &str) -> Option<String> {
    let target = target.trim().trim_matches(|c| c == '<' || c == '>');
    if let Some(captures) = event_link().and_then(|re| re.captures(target)) {
        return captures.get(1).map(|m| m.as_str().to_string());
    }

    let bare = !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    bare.then(|| target.to_string())
}

/// A command together with the channel it was issued in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub channel: ChannelId,
    pub command: Command,
}

/// Everything a command may read or change.
pub struct CommandContext<'a> {
    pub registry: &'a mut SubscriptionRegistry,
    pub colors: &'a mut ColorPrefs,
    pub queue: &'a EventQueue,
    pub restart: &'a RestartFlag,
    pub content: &'a dyn ContentApi,
    pub store: &'a dyn StateStore,
    /// Default backfill start.
    pub last_published_at: DateTime<Utc>,
    /// Used to schedule the automatic unwatch of a timed watch.
    pub commands: &'a mpsc::Sender<CommandRequest>,
}

/// Run a command. `Ok(None)` means there is nothing to reply.
pub async fn execute(ctx: CommandContext<'_>, request: &CommandRequest) -> Result<Option<String>> {
    let channel = request.channel.as_str();
    match &request.command {
        Command::Watch { handles, minutes } => {
            watch(ctx, channel, handles, *minutes).await.map(Some)
        }
        Command::Unwatch { handle, timed } => unwatch(ctx, channel, handle, *timed).await,
        Command::List => list(ctx, channel).await.map(Some),
        Command::Color { handle, hex } => color(ctx, handle, hex.as_deref()).await.map(Some),
        Command::Backfill { since } => backfill(ctx, *since).await.map(Some),
        Command::Requeue { target } => requeue(ctx, target).await.map(Some),
        Command::Restart => {
            ctx.restart.set();
            info!(%channel, "Stream restart requested");
            Ok(Some("Restarting stream.".to_string()))
        }
    }
}

async fn resolve(content: &dyn ContentApi, handle: &str) -> Result<Option<Account>> {
    Ok(content.find_account(handle).await?)
}

async fn watch(
    mut ctx: CommandContext<'_>,
    channel: &str,
    handles: &[String],
    minutes: Option<u64>,
) -> Result<String> {
    let mut replies = Vec::new();

    for handle in handles {
        let Some(account) = resolve(ctx.content, handle).await? else {
            replies.push(format!("@{handle} is not a valid account!"));
            break;
        };

        let outcome = ctx.registry.watch(&account.id, channel);
        if outcome.already_watched {
            replies.push(format!(
                "@{} is already being watched in this channel!",
                account.handle
            ));
            break;
        }
        if outcome.new_account {
            ctx.restart.set();
        }

        match minutes {
            Some(minutes) => {
                info!(handle = %account.handle, %channel, minutes, "Watching account for a limited time");
                replies.push(format!(
                    "Watching @{} in this channel! Will stop after {minutes} minutes.",
                    account.handle
                ));
                schedule_unwatch(ctx.commands.clone(), channel, &account.handle, minutes);
            }
            None => {
                info!(handle = %account.handle, %channel, "Watching account");
                replies.push(format!("Watching @{} in this channel!", account.handle));
            }
        }
    }

    Ok(replies.join("\n"))
}

fn schedule_unwatch(
    commands: mpsc::Sender<CommandRequest>,
    channel: &str,
    handle: &str,
    minutes: u64,
) {
    let request = CommandRequest {
        channel: channel.to_string(),
        command: Command::Unwatch {
            handle: handle.to_string(),
            timed: true,
        },
    };
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(minutes * 60)).await;
        if commands.send(request).await.is_err() {
            warn!("Daemon stopped before a timed unwatch could run");
        }
    });
}

async fn unwatch(
    mut ctx: CommandContext<'_>,
    channel: &str,
    handle: &str,
    timed: bool,
) -> Result<Option<String>> {
    let Some(account) = resolve(ctx.content, handle).await? else {
        return Ok(Some(format!("@{handle} is not a valid account!")));
    };

    match ctx.registry.unwatch(&account.id, channel) {
        Ok(outcome) => {
            if outcome.account_removed {
                ctx.restart.set();
            }
            info!(handle = %account.handle, %channel, timed, "Stopped watching account");
            Ok(Some(format!(
                "Stopped watching @{} in this channel!",
                account.handle
            )))
        }
        Err(RegistryError::NotWatched { .. }) if timed => Ok(None),
        Err(RegistryError::NotWatched { .. }) => Ok(Some(format!(
            "@{} is not being watched in this channel!",
            account.handle
        ))),
    }
}

async fn list(ctx: CommandContext<'_>, channel: &str) -> Result<String> {
    let Some(accounts) = ctx.registry.watched_in(channel) else {
        return Ok("No accounts watched in this channel!".to_string());
    };

    let mut handles = Vec::with_capacity(accounts.len());
    for id in accounts {
        let label = match ctx.content.get_account(id).await {
            Ok(Some(account)) => format!("@{}", account.handle),
            Ok(None) => format!("(unknown account {id})"),
            Err(e) => {
                warn!(account = %id, error = %e, "Account lookup failed");
                format!("(account {id})")
            }
        };
        handles.push(label);
    }

    Ok(format!(
        "Accounts watched in this channel: {}",
        handles.join(", ")
    ))
}

async fn color(mut ctx: CommandContext<'_>, handle: &str, hex: Option<&str>) -> Result<String> {
    let Some(account) = resolve(ctx.content, handle).await? else {
        return Ok(format!("@{handle} is not a valid account!"));
    };

    let Some(hex) = hex else {
        return Ok(match ctx.colors.get(&account.id) {
            Some(color) => format!("@{} has color {}", account.handle, format_hex_color(color)),
            None => format!("@{} has no color", account.handle),
        });
    };

    let Some(color) = parse_hex_color(hex) else {
        return Ok("Invalid hex code!".to_string());
    };

    ctx.colors.set(&account.id, color);
    store::save(ctx.store, COLORS_KEY, &*ctx.colors).await?;
    info!(handle = %account.handle, color = %format_hex_color(color), "Color updated");
    Ok(format!(
        "@{} now has color {}",
        account.handle,
        format_hex_color(color)
    ))
}

async fn backfill(ctx: CommandContext<'_>, since: Option<DateTime<Utc>>) -> Result<String> {
    let since = since.unwrap_or(ctx.last_published_at);
    let mut found = Vec::new();

    for account in ctx.registry.accounts() {
        match ctx.content.get_timeline(&account, since).await {
            Ok(events) => found.extend(
                events
                    .into_iter()
                    .filter(|event| event.created_at > since)
                    .map(|event| FeedEvent::Backfilled {
                        id: event.id,
                        author: account.clone(),
                        created_at: event.created_at,
                    }),
            ),
            Err(e) => warn!(%account, error = %e, "Timeline fetch failed during backfill"),
        }
    }

    found.sort_by_key(FeedEvent::created_at);
    let count = found.len();
    for event in found {
        ctx.queue.push(event);
    }

    info!(count, since = %since, "Backfill queued");
    Ok(format!(
        "Queued {count} posts since {}",
        since.format("%Y-%m-%d %H:%M UTC")
    ))
}

async fn requeue(ctx: CommandContext<'_>, target: &str) -> Result<String> {
    let Some(id) = parse_event_ref(target) else {
        return Ok(format!("Could not find a post id in '{target}'"));
    };

    let event = ctx.content.get_full_event(&id).await?;
    ctx.queue.push(FeedEvent::Backfilled {
        id: event.id.clone(),
        author: event.author.id.clone(),
        created_at: event.created_at,
    });
    info!(event_id = %id, "Requeued post");
    Ok(format!("Queued post {id}!"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn test_parse_watch_with_minutes() {
        assert_eq!(
            Command::parse("watch @alice bob 30").unwrap(),
            Command::Watch {
                handles: vec!["alice".into(), "bob".into()],
                minutes: Some(30),
            }
        );
    }

    #[test]
    fn test_parse_watch_single_numeric_handle_is_a_handle() {
        assert_eq!(
            Command::parse("watch 12345").unwrap(),
            Command::Watch {
                handles: vec!["12345".into()],
                minutes: None,
            }
        );
    }

    #[test]
    fn test_parse_watch_without_minutes() {
        assert_eq!(
            Command::parse("watch alice bob").unwrap(),
            Command::Watch {
                handles: vec!["alice".into(), "bob".into()],
                minutes: None,
            }
        );
    }

    #[test]
    fn test_parse_bare_watch_lists() {
        assert_eq!(Command::parse("watch").unwrap(), Command::List);
    }

    #[test]
    fn test_parse_unwatch_requires_handle() {
        assert_eq!(
            Command::parse("unwatch").unwrap_err(),
            ParseError::Usage("unwatch <handle>")
        );
        assert_eq!(
            Command::parse("UNWATCH @bob").unwrap(),
            Command::Unwatch {
                handle: "bob".into(),
                timed: false
            }
        );
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(
            Command::parse("color alice #ff0000").unwrap(),
            Command::Color {
                handle: "alice".into(),
                hex: Some("#ff0000".into())
            }
        );
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        assert_eq!(Command::parse("   ").unwrap_err(), ParseError::Empty);
        assert!(matches!(
            Command::parse("dance").unwrap_err(),
            ParseError::Unknown(_)
        ));
    }

    #[test]
    fn test_parse_backfill_variants() {
        assert_eq!(
            Command::parse("backfill").unwrap(),
            Command::Backfill { since: None }
        );
        match Command::parse("backfill 2024-05-01T12:00:00Z").unwrap() {
            Command::Backfill { since: Some(since) } => {
                assert_eq!(since, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Command::parse("backfill yesterday").unwrap_err(),
            ParseError::BadTime(_)
        ));
    }

    #[test]
    fn test_parse_since_numeric_form_is_local_time() {
        let since = parse_since("2024 05 01 12 30").unwrap();
        let local = since.with_timezone(&Local);
        assert_eq!((local.hour(), local.minute()), (12, 30));
    }

    #[test]
    fn test_parse_since_rejects_bad_dates() {
        assert!(parse_since("2024 13 01 12 30").is_none());
        assert!(parse_since("2024 05 01").is_none());
    }

    // ── requeue targets ─────────────────────────────────────────────

    #[test]
    fn test_parse_event_ref_from_link() {
        assert_eq!(
            parse_event_ref("https://x.com/alice/status/1790000000000000000?s=20").as_deref(),
            Some("1790000000000000000")
        );
        assert_eq!(
            parse_event_ref("<https://twitter.com/i/web/statuses/42>").as_deref(),
            Some("42")
        );
    }

    #[test]
    fn test_event_link_pattern_compiles_and_is_shared() {
        let first = event_link().expect("link pattern compiles");
        let second = event_link().expect("link pattern compiles");
        assert!(std::ptr::eq(first, second));
        assert!(first.is_match("https://feed.example/alice/status/7"));
    }

    #[test]
    fn test_parse_event_ref_bare_id() {
        assert_eq!(parse_event_ref("12345").as_deref(), Some("12345"));
        assert_eq!(parse_event_ref("https://example.com/nothing"), None);
        assert_eq!(parse_event_ref(""), None);
    }
}
