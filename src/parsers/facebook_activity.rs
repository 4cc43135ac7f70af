//! Facebook activity outside Messenger: event responses, events the owner
//! created, timeline posts and check-ins. Every item becomes its own thread
//! with a single message.

use super::{ParseContext, PlatformParser, UnitCounts, read_json_file};
use crate::error::ParseError;
use crate::hub::platform::Platform;
use crate::hub::records::{LatestActivity, MediaRef, MessageRecord, ThreadRecord};
use crate::hub::text::repair_mojibake;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const FACEBOOK_ORIGIN: &str = "https://www.facebook.com";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EventResponses {
    event_responses_v2: ResponseLists,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseLists {
    events_joined: Vec<EventEntry>,
    events_interested: Vec<EventEntry>,
    events_declined: Vec<EventEntry>,
}

impl ResponseLists {
    /// Each list with its message text and thread snippet.
    fn categories(&self) -> [(&[EventEntry], &'static str, &'static str); 3] {
        [
            (self.events_joined.as_slice(), "Joined Event", "You joined this event."),
            (
                self.events_interested.as_slice(),
                "Interested in Event",
                "You expressed interest in this event.",
            ),
            (self.events_declined.as_slice(), "Declined Event", "You declined this event."),
        ]
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct OwnedEvents {
    your_events_v2: Vec<EventEntry>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct EventEntry {
    name: Option<String>,
    start_timestamp: i64,
    description: Option<String>,
    place: Option<Place>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct Place {
    name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct Post {
    timestamp: i64,
    title: Option<String>,
    data: Vec<PostData>,
    attachments: Vec<PostAttachment>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct PostData {
    post: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct PostAttachment {
    data: Vec<AttachmentData>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct AttachmentData {
    external_context: Option<ExternalContext>,
    place: Option<Place>,
    media: Option<MediaUri>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct ExternalContext {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct MediaUri {
    uri: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CheckIn {
    timestamp: i64,
    label_values: Vec<LabelValue>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct LabelValue {
    label: Option<String>,
    value: Option<String>,
    dict: Vec<LabelValue>,
}

/// One item ready to be stored as a single-message thread.
#[derive(Debug, Clone, PartialEq)]
struct ActivityItem {
    thread_id: String,
    title: String,
    label: &'static str,
    snippet: String,
    message: MessageRecord,
}

fn fixed(raw: Option<&str>) -> String {
    raw.map(repair_mojibake).unwrap_or_default()
}

/// Files in `dir` whose name starts with `prefix` and ends in `.json`,
/// sorted by name.
fn json_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".json"))
        })
        .collect();
    files.sort();
    files
}

/// Tracks readable versus unreadable activity files for one unit.
#[derive(Default)]
struct FileTally {
    read: usize,
    last_error: Option<ParseError>,
}

impl FileTally {
    fn load<T: DeserializeOwned>(&mut self, path: &Path) -> Option<T> {
        let parsed = read_json_file(path).and_then(|value| {
            serde_json::from_value::<T>(value).map_err(|err| ParseError::malformed(path, err))
        });
        match parsed {
            Ok(doc) => {
                self.read += 1;
                Some(doc)
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable activity file");
                self.last_error = Some(err);
                None
            }
        }
    }
}

fn event_thread_id(ts_ms: i64) -> String {
    format!("fb_event_{ts_ms}")
}

/// RSVPs across every `your_event_responses*.json`. The first entry seen
/// for a start time wins.
fn event_responses(events_dir: &Path, tally: &mut FileTally) -> Vec<ActivityItem> {
    let mut merged: BTreeMap<i64, ActivityItem> = BTreeMap::new();
    for path in json_files(events_dir, "your_event_responses") {
        let Some(doc) = tally.load::<EventResponses>(&path) else {
            continue;
        };
        for (events, status, snippet) in doc.event_responses_v2.categories() {
            for event in events {
                let ts_ms = event.start_timestamp.saturating_mul(1000);
                merged.entry(ts_ms).or_insert_with(|| {
                    let title = event
                        .name
                        .as_deref()
                        .map(repair_mojibake)
                        .unwrap_or_else(|| "Unknown Event".to_string());
                    let thread_id = event_thread_id(ts_ms);
                    ActivityItem {
                        message: MessageRecord::new(
                            &thread_id,
                            "Facebook",
                            ts_ms,
                            Some(status.to_string()),
                        ),
                        thread_id,
                        title,
                        label: "event",
                        snippet: snippet.to_string(),
                    }
                });
            }
        }
    }
    merged.into_values().collect()
}

/// Events the owner created, from every `your_events*.json`.
fn owned_events(events_dir: &Path, owner: &str, tally: &mut FileTally) -> Vec<ActivityItem> {
    let mut merged: BTreeMap<i64, EventEntry> = BTreeMap::new();
    for path in json_files(events_dir, "your_events") {
        let Some(doc) = tally.load::<OwnedEvents>(&path) else {
            continue;
        };
        for event in doc.your_events_v2 {
            merged.entry(event.start_timestamp.saturating_mul(1000)).or_insert(event);
        }
    }

    merged
        .into_iter()
        .map(|(ts_ms, event)| {
            let thread_id = event_thread_id(ts_ms);
            let location = fixed(event.place.as_ref().and_then(|p| p.name.as_deref()));
            let description = fixed(event.description.as_deref());
            let mut details = Map::new();
            if !location.is_empty() {
                details.insert("location".to_string(), Value::String(location));
            }
            if !description.is_empty() {
                details.insert("description".to_string(), Value::String(description));
            }
            let mut message =
                MessageRecord::new(&thread_id, owner, ts_ms, Some("Created Event".to_string()));
            message.share = (!details.is_empty()).then_some(Value::Object(details));
            ActivityItem {
                title: event
                    .name
                    .as_deref()
                    .map(repair_mojibake)
                    .unwrap_or_else(|| "Unknown Event".to_string()),
                thread_id,
                label: "event",
                snippet: "You created this event.".to_string(),
                message,
            }
        })
        .collect()
}

/// Same-second posts from several files describe one post: the longer
/// title is kept and text and attachments are pooled.
fn merge_posts(posts: impl IntoIterator<Item = Post>, into: &mut BTreeMap<i64, Post>) {
    for post in posts {
        match into.get_mut(&post.timestamp) {
            None => {
                into.insert(post.timestamp, post);
            }
            Some(existing) => {
                let new_len = post.title.as_deref().map_or(0, str::len);
                let old_len = existing.title.as_deref().map_or(0, str::len);
                if new_len > old_len {
                    existing.title = post.title;
                }
                existing.data.extend(post.data);
                existing.attachments.extend(post.attachments);
            }
        }
    }
}

fn absolute_link(url: &str) -> String {
    if url.starts_with('/') {
        format!("{FACEBOOK_ORIGIN}{url}")
    } else {
        url.to_string()
    }
}

fn post_item(ts: i64, post: Post, owner: &str) -> ActivityItem {
    let ts_ms = ts.saturating_mul(1000);
    let thread_id = format!("fb_post_{ts_ms}");
    let title = post
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(repair_mojibake)
        .unwrap_or_else(|| "Post".to_string());

    let text = post
        .data
        .iter()
        .filter_map(|d| d.post.as_deref())
        .map(repair_mojibake)
        .fold(String::new(), |best, candidate| {
            if candidate.len() > best.len() { candidate } else { best }
        });

    let mut link = None;
    let mut media = Vec::new();
    let mut seen = BTreeSet::new();
    for data in post.attachments.iter().flat_map(|a| a.data.iter()) {
        let url = data
            .external_context
            .as_ref()
            .and_then(|c| c.url.as_deref())
            .filter(|u| !u.is_empty())
            .or_else(|| {
                data.place
                    .as_ref()
                    .and_then(|p| p.url.as_deref())
                    .filter(|u| !u.is_empty())
            });
        if let Some(url) = url {
            link = Some(absolute_link(url));
        }
        if let Some(uri) = data.media.as_ref().and_then(|m| m.uri.as_deref()) {
            if seen.insert(uri.to_string()) {
                let kind = if uri.to_ascii_lowercase().contains(".mp4") {
                    "video"
                } else {
                    "photo"
                };
                media.push(MediaRef::new(uri, kind));
            }
        }
    }

    let content = if !text.is_empty() {
        Some(text.clone())
    } else if let Some(link) = &link {
        Some(link.clone())
    } else if media.is_empty() {
        Some(title.clone())
    } else {
        None
    };
    let snippet = if !text.is_empty() {
        text
    } else if link.is_some() {
        "Shared a link".to_string()
    } else {
        "(Media Post)".to_string()
    };

    let mut message = MessageRecord::new(&thread_id, owner, ts_ms, content);
    message.media = media;
    message.share = link.map(|link| json!({ "link": link }));
    ActivityItem {
        thread_id,
        title,
        label: "post",
        snippet,
        message,
    }
}

/// Every `your_*.json` under `posts/`. Files that are not a list of posts
/// are skipped.
fn posts(posts_dir: &Path, owner: &str, tally: &mut FileTally) -> Vec<ActivityItem> {
    let mut merged = BTreeMap::new();
    for path in json_files(posts_dir, "your_") {
        if let Some(list) = tally.load::<Vec<Post>>(&path) {
            merge_posts(list, &mut merged);
        }
    }
    merged
        .into_iter()
        .map(|(ts, post)| post_item(ts, post, owner))
        .collect()
}

fn check_in_item(check_in: CheckIn, owner: &str) -> ActivityItem {
    let ts_ms = check_in.timestamp.saturating_mul(1000);
    let mut place = "Check-in".to_string();
    let mut note = String::new();
    for item in &check_in.label_values {
        match item.label.as_deref() {
            Some("Place tags") => {
                if let Some(name) = item
                    .dict
                    .iter()
                    .rfind(|d| d.label.as_deref() == Some("Name"))
                {
                    place = fixed(name.value.as_deref());
                }
            }
            Some("Message") => note = fixed(item.value.as_deref()),
            _ => {}
        }
    }
    let title = format!("Checked in at {place}");
    let text = if note.is_empty() { title.clone() } else { note };
    let thread_id = format!("fb_ci_{ts_ms}");
    ActivityItem {
        message: MessageRecord::new(&thread_id, owner, ts_ms, Some(text.clone())),
        thread_id,
        title,
        label: "checkin",
        snippet: text,
    }
}

fn check_ins(posts_dir: &Path, owner: &str, tally: &mut FileTally) -> Vec<ActivityItem> {
    let path = posts_dir.join("check-ins.json");
    if !path.is_file() {
        return Vec::new();
    }
    let Some(list) = tally.load::<Vec<CheckIn>>(&path) else {
        return Vec::new();
    };
    let mut merged: BTreeMap<i64, CheckIn> = BTreeMap::new();
    for check_in in list {
        merged.entry(check_in.timestamp).or_insert(check_in);
    }
    merged
        .into_values()
        .map(|check_in| check_in_item(check_in, owner))
        .collect()
}

pub struct FacebookActivityParser;

impl PlatformParser for FacebookActivityParser {
    fn parse(&self, ctx: &mut ParseContext<'_>, unit: &Path) -> Result<UnitCounts, ParseError> {
        let owner = ctx
            .identities
            .name_for(Platform::Facebook)
            .unwrap_or("Me")
            .to_string();
        let events_dir = unit.join("events");
        let posts_dir = unit.join("posts");

        let mut tally = FileTally::default();
        let mut items = event_responses(&events_dir, &mut tally);
        items.extend(owned_events(&events_dir, &owner, &mut tally));
        items.extend(posts(&posts_dir, &owner, &mut tally));
        items.extend(check_ins(&posts_dir, &owner, &mut tally));
        if tally.read == 0 {
            if let Some(err) = tally.last_error {
                return Err(err);
            }
        }
        tracing::info!(items = items.len(), "collected facebook activity");

        let mut counts = UnitCounts::default();
        for item in items {
            let thread = ThreadRecord::new(
                &item.thread_id,
                Platform::Facebook,
                &item.title,
                Vec::new(),
            );
            ctx.store_thread(&thread, item.label)?;
            counts.add(ctx.store.insert_message_if_absent(&item.message)?);
            let mut latest = LatestActivity::default();
            latest.observe_with(item.message.timestamp_ms, item.snippet);
            ctx.finish_thread(&item.thread_id, &latest)?;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::identity::IdentityRegistry;
    use crate::hub::store::IngestionStore;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, body).expect("write");
    }

    fn parse_unit(store: &IngestionStore, unit: &Path) -> Result<UnitCounts, ParseError> {
        let mut identities = IdentityRegistry::new();
        let mut ctx = ParseContext {
            store,
            identities: &mut identities,
            root: unit,
            snippet_max_chars: 160,
        };
        FacebookActivityParser.parse(&mut ctx, unit)
    }

    fn thread_rows(store: &IngestionStore) -> Vec<(String, String, i64, String, String)> {
        store
            .conn()
            .prepare(
                "SELECT t.id, t.title, t.last_activity_ms, t.snippet, l.label
                 FROM threads t JOIN thread_labels l ON l.thread_id = t.id
                 ORDER BY t.id",
            )
            .expect("prepare")
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("rows")
    }

    #[test]
    fn event_responses_and_owned_events_become_event_threads() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let unit = tmp.path().join("your_facebook_activity");
        write(
            &unit.join("events/your_event_responses.json"),
            r#"{"event_responses_v2":{
                "events_joined":[{"name":"Picnic","start_timestamp":100}],
                "events_declined":[{"name":"Picnic again","start_timestamp":100},
                                   {"name":"Gala","start_timestamp":200}]}}"#,
        );
        write(
            &unit.join("events/your_events.json"),
            r#"{"your_events_v2":[{"name":"My Party","start_timestamp":300,
                "place":{"name":"Home"},"description":"bring snacks"}]}"#,
        );

        let store = IngestionStore::open_in_memory().expect("store");
        let counts = parse_unit(&store, &unit).expect("parse");
        assert_eq!(counts, UnitCounts { inserted: 3, skipped: 0 });

        assert_eq!(
            thread_rows(&store),
            vec![
                (
                    "fb_event_100000".to_string(),
                    "Picnic".to_string(),
                    100_000,
                    "You joined this event.".to_string(),
                    "event".to_string(),
                ),
                (
                    "fb_event_200000".to_string(),
                    "Gala".to_string(),
                    200_000,
                    "You declined this event.".to_string(),
                    "event".to_string(),
                ),
                (
                    "fb_event_300000".to_string(),
                    "My Party".to_string(),
                    300_000,
                    "You created this event.".to_string(),
                    "event".to_string(),
                ),
            ]
        );

        let (sender, content, share): (String, String, String) = store
            .conn()
            .query_row(
                "SELECT sender_name, content, share_json FROM messages
                 WHERE thread_id = 'fb_event_300000'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("owned event message");
        assert_eq!(sender, "Me");
        assert_eq!(content, "Created Event");
        let share: Value = serde_json::from_str(&share).expect("share json");
        assert_eq!(share, json!({"location": "Home", "description": "bring snacks"}));

        let again = parse_unit(&store, &unit).expect("reparse");
        assert_eq!(again, UnitCounts { inserted: 0, skipped: 3 });
    }

    #[test]
    fn posts_merge_by_second_and_check_ins_get_their_own_label() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let unit = tmp.path().join("your_facebook_activity");
        write(
            &unit.join("posts/your_posts_1.json"),
            r#"[{"timestamp":10,"title":"Me","data":[{"post":"short"}]},
                {"timestamp":20,"attachments":[{"data":[{"external_context":{"url":"/groups/1"}}]}]},
                {"timestamp":30,"attachments":[{"data":[{"media":{"uri":"posts/media/a.mp4"}}]}]}]"#,
        );
        write(
            &unit.join("posts/your_uncategorized_photos.json"),
            r#"[{"timestamp":10,"title":"Me updated my status","data":[{"post":"the longer text"}],
                 "attachments":[{"data":[{"media":{"uri":"posts/media/b.jpg"}}]}]},
                {"timestamp":30,"attachments":[{"data":[{"media":{"uri":"posts/media/a.mp4"}}]}]}]"#,
        );
        write(
            &unit.join("posts/check-ins.json"),
            r#"[{"timestamp":40,"label_values":[
                  {"label":"Place tags","dict":[{"label":"Name","value":"CafÃ© Luna"}]},
                  {"label":"Message","value":"coffee time"}]},
                {"timestamp":40,"label_values":[]},
                {"timestamp":50,"label_values":[]}]"#,
        );

        let store = IngestionStore::open_in_memory().expect("store");
        let counts = parse_unit(&store, &unit).expect("parse");
        assert_eq!(counts.inserted, 5);

        let rows = thread_rows(&store);
        let summary: Vec<(&str, &str, &str, &str)> = rows
            .iter()
            .map(|(id, title, _, snippet, label)| {
                (id.as_str(), title.as_str(), snippet.as_str(), label.as_str())
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("fb_ci_40000", "Checked in at Café Luna", "coffee time", "checkin"),
                ("fb_ci_50000", "Checked in at Check-in", "Checked in at Check-in", "checkin"),
                ("fb_post_10000", "Me updated my status", "the longer text", "post"),
                ("fb_post_20000", "Post", "Shared a link", "post"),
                ("fb_post_30000", "Post", "(Media Post)", "post"),
            ]
        );

        let (content, share): (String, String) = store
            .conn()
            .query_row(
                "SELECT content, share_json FROM messages WHERE thread_id = 'fb_post_20000'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("link post");
        assert_eq!(content, "https://www.facebook.com/groups/1");
        assert!(share.contains("https://www.facebook.com/groups/1"));

        let (content, media): (Option<String>, String) = store
            .conn()
            .query_row(
                "SELECT content, media_json FROM messages WHERE thread_id = 'fb_post_30000'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("media post");
        assert_eq!(content, None);
        let media: Value = serde_json::from_str(&media).expect("media json");
        assert_eq!(media, json!([{"uri": "posts/media/a.mp4", "type": "video"}]));
    }

    #[test]
    fn owner_name_comes_from_the_discovered_identity() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(
            &tmp.path()
                .join("Facebook/profile_information/profile_information.json"),
            r#"{"profile_v2":{"name":{"full_name":"Sam Roe"}}}"#,
        );
        let unit = tmp.path().join("Facebook/your_facebook_activity");
        write(
            &unit.join("posts/check-ins.json"),
            r#"[{"timestamp":1,"label_values":[{"label":"Message","value":"here"}]}]"#,
        );

        let store = IngestionStore::open_in_memory().expect("store");
        let mut identities = IdentityRegistry::new();
        identities.discover(Platform::Facebook, tmp.path());
        let mut ctx = ParseContext {
            store: &store,
            identities: &mut identities,
            root: tmp.path(),
            snippet_max_chars: 160,
        };
        FacebookActivityParser.parse(&mut ctx, &unit).expect("parse");
        let sender: String = store
            .conn()
            .query_row("SELECT sender_name FROM messages", [], |row| row.get(0))
            .expect("row");
        assert_eq!(sender, "Sam Roe");
    }

    #[test]
    fn unit_with_only_unreadable_files_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let unit = tmp.path().join("your_facebook_activity");
        write(&unit.join("events/your_events.json"), "{broken");

        let store = IngestionStore::open_in_memory().expect("store");
        let err = parse_unit(&store, &unit).expect_err("should fail");
        assert!(!err.is_fatal());
    }
}
