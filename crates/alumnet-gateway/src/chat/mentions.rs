use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use uuid::Uuid;

use alumnet_db::queries::{groups, mentions};

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w@])@([A-Za-z0-9_][A-Za-z0-9_.\-]*)").expect("mention pattern compiles")
});

/// Usernames mentioned in `content`, lowercased, in first-seen order.
/// An `@` glued to a preceding word (an email address) is not a mention.
/// A trailing dot is sentence punctuation, not part of the name.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}

/// Resolve mentions in a group message against the current member list and
/// store one row per mentioned member. The sender never mentions themself.
pub(super) fn record(
    conn: &Connection,
    message_id: Uuid,
    group_id: Uuid,
    sender_id: Uuid,
    content: &str,
) -> anyhow::Result<Vec<Uuid>> {
    let names = extract_mentions(content);
    if names.is_empty() {
        return Ok(vec![]);
    }

    let mut mentioned = Vec::new();
    for member in groups::members(conn, group_id)? {
        if member.user_id == sender_id {
            continue;
        }
        if names.contains(&member.username.to_lowercase())
            && mentions::insert_mention(conn, message_id, member.user_id)?
        {
            mentioned.push(member.user_id);
        }
    }
    Ok(mentioned)
}
