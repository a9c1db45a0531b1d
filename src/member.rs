//! Member records built from raw Telegram users and participants

use std::fmt;

use chrono::{DateTime, Utc};
use grammers_tl_types as tl;
use serde::Serialize;

/// Placeholder written for optional text fields the API did not expose.
pub const NOT_SET: &str = "Not set";

/// Export column headers, in row order.
pub const COLUMNS: [&str; 12] = [
    "User ID",
    "Username",
    "First Name",
    "Last Name",
    "Phone",
    "Is Bot",
    "Verified",
    "Premium",
    "Role",
    "Joined",
    "Last Seen",
    "Access Hash",
];

/// Participant role inside the queried channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    #[default]
    Member,
    Admin,
    Creator,
    /// The account running the export
    Myself,
    Banned,
    Left,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
            MemberRole::Creator => "creator",
            MemberRole::Myself => "self",
            MemberRole::Banned => "banned",
            MemberRole::Left => "left",
        };
        f.write_str(s)
    }
}

/// Last-seen status as far as the user's privacy settings allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "at")]
pub enum LastSeen {
    Online,
    Offline(DateTime<Utc>),
    Recently,
    WithinWeek,
    WithinMonth,
    #[default]
    Hidden,
}

impl LastSeen {
    pub fn from_status(status: Option<&tl::enums::UserStatus>) -> Self {
        match status {
            None | Some(tl::enums::UserStatus::Empty) => LastSeen::Hidden,
            Some(tl::enums::UserStatus::Online(_)) => LastSeen::Online,
            Some(tl::enums::UserStatus::Offline(s)) => timestamp(s.was_online)
                .map(LastSeen::Offline)
                .unwrap_or(LastSeen::Hidden),
            Some(tl::enums::UserStatus::Recently(_)) => LastSeen::Recently,
            Some(tl::enums::UserStatus::LastWeek(_)) => LastSeen::WithinWeek,
            Some(tl::enums::UserStatus::LastMonth(_)) => LastSeen::WithinMonth,
        }
    }
}

impl fmt::Display for LastSeen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastSeen::Online => f.write_str("online"),
            LastSeen::Offline(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S")),
            LastSeen::Recently => f.write_str("recently"),
            LastSeen::WithinWeek => f.write_str("within a week"),
            LastSeen::WithinMonth => f.write_str("within a month"),
            LastSeen::Hidden => f.write_str("hidden"),
        }
    }
}

/// One exported participant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Member {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub is_bot: bool,
    pub is_verified: bool,
    pub is_premium: bool,
    pub access_hash: Option<i64>,
    pub role: MemberRole,
    pub joined_at: Option<DateTime<Utc>>,
    pub last_seen: LastSeen,
}

/// Role and join date extracted from a channel participant entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticipantMeta {
    pub user_id: i64,
    pub role: MemberRole,
    pub joined_at: Option<DateTime<Utc>>,
}

impl ParticipantMeta {
    pub fn from_raw(participant: &tl::enums::ChannelParticipant) -> Option<Self> {
        use tl::enums::ChannelParticipant as P;

        let (user_id, role, date) = match participant {
            P::Participant(p) => (p.user_id, MemberRole::Member, Some(p.date)),
            P::ParticipantSelf(p) => (p.user_id, MemberRole::Myself, Some(p.date)),
            P::Creator(p) => (p.user_id, MemberRole::Creator, None),
            P::Admin(p) => (p.user_id, MemberRole::Admin, Some(p.date)),
            P::Banned(p) => (peer_user_id(&p.peer)?, MemberRole::Banned, Some(p.date)),
            P::Left(p) => (peer_user_id(&p.peer)?, MemberRole::Left, None),
        };

        Some(Self {
            user_id,
            role,
            joined_at: date.and_then(timestamp),
        })
    }

    /// Same as `from_raw`, for basic-group participant entries.
    pub fn from_chat(participant: &tl::enums::ChatParticipant) -> Self {
        use tl::enums::ChatParticipant as P;

        let (user_id, role, date) = match participant {
            P::Participant(p) => (p.user_id, MemberRole::Member, Some(p.date)),
            P::Creator(p) => (p.user_id, MemberRole::Creator, None),
            P::Admin(p) => (p.user_id, MemberRole::Admin, Some(p.date)),
        };

        Self {
            user_id,
            role,
            joined_at: date.and_then(timestamp),
        }
    }
}

fn peer_user_id(peer: &tl::enums::Peer) -> Option<i64> {
    match peer {
        tl::enums::Peer::User(u) => Some(u.user_id),
        _ => None,
    }
}

fn timestamp(secs: i32) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(i64::from(secs), 0)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

impl Member {
    /// Build a member from a raw user. Empty (deleted-from-cache) users yield `None`.
    pub fn from_raw_user(user: &tl::enums::User) -> Option<Self> {
        let u = match user {
            tl::enums::User::User(u) => u,
            tl::enums::User::Empty(_) => return None,
        };

        Some(Self {
            id: u.id,
            username: non_empty(&u.username),
            first_name: non_empty(&u.first_name),
            last_name: non_empty(&u.last_name),
            phone: non_empty(&u.phone),
            is_bot: u.bot,
            is_verified: u.verified,
            is_premium: u.premium,
            access_hash: u.access_hash,
            role: if u.is_self {
                MemberRole::Myself
            } else {
                MemberRole::Member
            },
            joined_at: None,
            last_seen: LastSeen::from_status(u.status.as_ref()),
        })
    }

    /// Merge role and join date from the matching participant entry.
    pub fn with_meta(mut self, meta: Option<&ParticipantMeta>) -> Self {
        if let Some(meta) = meta {
            self.role = meta.role;
            self.joined_at = meta.joined_at;
        }
        self
    }

    /// Text cells in `COLUMNS` order.
    pub fn row(&self) -> [String; 12] {
        [
            self.id.to_string(),
            text_cell(&self.username),
            text_cell(&self.first_name),
            text_cell(&self.last_name),
            text_cell(&self.phone),
            self.is_bot.to_string(),
            self.is_verified.to_string(),
            self.is_premium.to_string(),
            self.role.to_string(),
            self.joined_at
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| NOT_SET.to_string()),
            self.last_seen.to_string(),
            self.access_hash
                .map(|h| h.to_string())
                .unwrap_or_else(|| NOT_SET.to_string()),
        ]
    }
}

pub(crate) fn text_cell(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| NOT_SET.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_matches_column_count_and_uses_placeholders() {
        let member = Member {
            id: 42,
            first_name: Some("Ada".into()),
            ..Default::default()
        };

        let row = member.row();
        assert_eq!(row.len(), COLUMNS.len());
        assert_eq!(row[0], "42");
        assert_eq!(row[1], NOT_SET);
        assert_eq!(row[2], "Ada");
        assert_eq!(row[5], "false");
        assert_eq!(row[8], "member");
        assert_eq!(row[9], NOT_SET);
        assert_eq!(row[10], "hidden");
        assert_eq!(row[11], NOT_SET);
    }

    #[test]
    fn basic_group_entry_with_zero_date_has_no_join_date() {
        let entry = tl::enums::ChatParticipant::Participant(tl::types::ChatParticipant {
            user_id: 7,
            inviter_id: 1,
            date: 0,
        });
        let meta = ParticipantMeta::from_chat(&entry);
        assert_eq!(meta.user_id, 7);
        assert_eq!(meta.role, MemberRole::Member);
        assert!(meta.joined_at.is_none());

        let admin = tl::enums::ChatParticipant::Admin(tl::types::ChatParticipantAdmin {
            user_id: 8,
            inviter_id: 1,
            date: 1_700_000_000,
        });
        let meta = ParticipantMeta::from_chat(&admin);
        assert_eq!(meta.role, MemberRole::Admin);
        assert_eq!(meta.joined_at.map(|d| d.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn unset_dates_have_no_timestamp() {
        assert!(timestamp(0).is_none());
        assert!(timestamp(-5).is_none());
        assert_eq!(timestamp(1_700_000_000).map(|d| d.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn empty_raw_user_is_skipped() {
        let raw = tl::enums::User::Empty(tl::types::UserEmpty { id: 7 });
        assert!(Member::from_raw_user(&raw).is_none());
    }

    #[test]
    fn offline_status_carries_timestamp() {
        let status = tl::enums::UserStatus::Offline(tl::types::UserStatusOffline {
            was_online: 1_700_000_000,
        });
        match LastSeen::from_status(Some(&status)) {
            LastSeen::Offline(at) => assert_eq!(at.timestamp(), 1_700_000_000),
            other => panic!("Expected Offline, got {:?}", other),
        }
        assert_eq!(LastSeen::from_status(None), LastSeen::Hidden);
    }

    #[test]
    fn with_meta_overrides_role_and_join_date() {
        let meta = ParticipantMeta {
            user_id: 1,
            role: MemberRole::Admin,
            joined_at: DateTime::from_timestamp(1_600_000_000, 0),
        };
        let member = Member {
            id: 1,
            ..Default::default()
        }
        .with_meta(Some(&meta));

        assert_eq!(member.role, MemberRole::Admin);
        assert_eq!(member.row()[9], "2020-09-13 12:26:40");

        let unchanged = Member::default().with_meta(None);
        assert_eq!(unchanged.role, MemberRole::Member);
    }

    #[test]
    fn left_participant_without_user_peer_is_ignored() {
        let raw = tl::enums::ChannelParticipant::Left(tl::types::ChannelParticipantLeft {
            peer: tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: 5 }),
        });
        assert!(ParticipantMeta::from_raw(&raw).is_none());
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(MemberRole::Creator.to_string(), "creator");
        assert_eq!(MemberRole::Myself.to_string(), "self");
    }
}
