//! Channel link parsing and resolution to a Telegram peer

use std::fmt;
use std::sync::LazyLock;

use grammers_client::types::peer::Peer;
use grammers_client::Client;
use grammers_tl_types as tl;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

static INVITE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?(?:t|telegram)\.(?:me|dog)/(?:\+|joinchat/)([A-Za-z0-9_-]+)/?$")
        .expect("valid invite regex")
});

static PUBLIC_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?(?:t|telegram)\.(?:me|dog)/(?:s/)?([A-Za-z][A-Za-z0-9_]{3,31})(?:/\d+)?/?(?:\?.*)?$")
        .expect("valid link regex")
});

static TG_RESOLVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^tg://resolve\?domain=([A-Za-z][A-Za-z0-9_]{3,31})(?:&.*)?$")
        .expect("valid tg:// regex")
});

static USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?([A-Za-z][A-Za-z0-9_]{3,31})$").expect("valid username regex")
});

/// Channel id prefix used by bot-style "marked" ids (`-100<id>`).
const MARKED_CHANNEL_PREFIX: &str = "-100";

/// Target of an export, as written in the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLink {
    /// Public @username or t.me/name link
    Username(String),
    /// Private invite link hash (t.me/+hash, t.me/joinchat/hash)
    Invite(String),
    /// Bare channel or chat id
    Id(i64),
}

impl ChannelLink {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::ChannelNotFound("channel link is empty".to_string()));
        }

        if let Some(caps) = INVITE_LINK.captures(input) {
            return Ok(ChannelLink::Invite(caps[1].to_string()));
        }

        for re in [&*PUBLIC_LINK, &*TG_RESOLVE, &*USERNAME] {
            if let Some(caps) = re.captures(input) {
                return Ok(ChannelLink::Username(caps[1].to_string()));
            }
        }

        if let Some(id) = parse_id(input) {
            return Ok(ChannelLink::Id(id));
        }

        Err(Error::ChannelNotFound(format!(
            "'{}' is not a valid channel link",
            input
        )))
    }
}

fn parse_id(input: &str) -> Option<i64> {
    let id = if let Some(rest) = input.strip_prefix(MARKED_CHANNEL_PREFIX) {
        rest.parse::<i64>().ok()?
    } else if let Some(rest) = input.strip_prefix('-') {
        rest.parse::<i64>().ok()?
    } else {
        input.parse::<i64>().ok()?
    };
    (id > 0).then_some(id)
}

impl fmt::Display for ChannelLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLink::Username(name) => write!(f, "@{}", name),
            ChannelLink::Invite(_) => f.write_str("private invite link"),
            ChannelLink::Id(id) => write!(f, "id {}", id),
        }
    }
}

/// What sort of chat the link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Broadcast,
    Supergroup,
    BasicGroup,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelKind::Broadcast => "channel",
            ChannelKind::Supergroup => "supergroup",
            ChannelKind::BasicGroup => "group",
        })
    }
}

/// Raw API handle for the resolved chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRef {
    Channel { id: i64, access_hash: i64 },
    Chat { id: i64 },
}

impl ChatRef {
    pub fn input_channel(&self) -> Option<tl::enums::InputChannel> {
        match *self {
            ChatRef::Channel { id, access_hash } => {
                Some(tl::enums::InputChannel::Channel(tl::types::InputChannel {
                    channel_id: id,
                    access_hash,
                }))
            }
            ChatRef::Chat { .. } => None,
        }
    }
}

/// A resolved export target
#[derive(Debug, Clone)]
pub struct Target {
    pub title: String,
    pub kind: ChannelKind,
    pub chat: ChatRef,
}

impl Target {
    pub fn from_peer(peer: &Peer) -> Result<Self> {
        let title = peer.name().unwrap_or("Unknown Channel").to_string();

        let (kind, chat) = match peer {
            Peer::User(_) => {
                return Err(Error::ChannelNotFound(format!(
                    "'{}' is a user, not a channel or group",
                    title
                )))
            }
            Peer::Channel(channel) => {
                let kind = if channel.raw.megagroup {
                    ChannelKind::Supergroup
                } else {
                    ChannelKind::Broadcast
                };
                (
                    kind,
                    ChatRef::Channel {
                        id: channel.raw.id,
                        access_hash: channel.raw.access_hash.unwrap_or(0),
                    },
                )
            }
            Peer::Group(group) => match &group.raw {
                tl::enums::Chat::Chat(c) => (ChannelKind::BasicGroup, ChatRef::Chat { id: c.id }),
                tl::enums::Chat::Channel(c) => (
                    ChannelKind::Supergroup,
                    ChatRef::Channel {
                        id: c.id,
                        access_hash: c.access_hash.unwrap_or(0),
                    },
                ),
                tl::enums::Chat::Forbidden(_) | tl::enums::Chat::ChannelForbidden(_) => {
                    return Err(Error::PermissionDenied(format!(
                        "access to '{}' is forbidden for this account",
                        title
                    )))
                }
                tl::enums::Chat::Empty(_) => {
                    return Err(Error::ChannelNotFound(format!(
                        "'{}' is no longer available",
                        title
                    )))
                }
            },
        };

        Ok(Self { title, kind, chat })
    }
}

/// Bare id of a raw chat, whatever its state
fn raw_chat_id(chat: &tl::enums::Chat) -> i64 {
    match chat {
        tl::enums::Chat::Empty(c) => c.id,
        tl::enums::Chat::Chat(c) => c.id,
        tl::enums::Chat::Forbidden(c) => c.id,
        tl::enums::Chat::Channel(c) => c.id,
        tl::enums::Chat::ChannelForbidden(c) => c.id,
    }
}

/// Resolve a parsed link to a peer the account can see.
pub async fn resolve(client: &Client, link: &ChannelLink) -> Result<Peer> {
    match link {
        ChannelLink::Username(name) => client
            .resolve_username(name)
            .await?
            .ok_or_else(|| Error::ChannelNotFound(format!("@{} does not exist", name))),
        ChannelLink::Invite(hash) => {
            let invite = client
                .invoke(&tl::functions::messages::CheckChatInvite { hash: hash.clone() })
                .await?;
            match invite {
                tl::enums::ChatInvite::Already(already) => {
                    find_in_dialogs(client, raw_chat_id(&already.chat)).await
                }
                tl::enums::ChatInvite::Peek(peek) => {
                    find_in_dialogs(client, raw_chat_id(&peek.chat)).await
                }
                tl::enums::ChatInvite::Invite(invite) => Err(Error::PermissionDenied(format!(
                    "this account is not a member of '{}', join it before exporting",
                    invite.title
                ))),
            }
        }
        ChannelLink::Id(id) => find_in_dialogs(client, *id).await,
    }
}

/// Scan the account's dialogs for a channel or group with the given id.
async fn find_in_dialogs(client: &Client, target_id: i64) -> Result<Peer> {
    debug!(target_id, "Searching dialogs for chat");
    let mut dialogs = client.iter_dialogs();

    while let Some(dialog) = dialogs.next().await? {
        let id = match &dialog.peer {
            Peer::Channel(channel) => channel.raw.id,
            Peer::Group(group) => raw_chat_id(&group.raw),
            Peer::User(_) => continue,
        };
        if id == target_id {
            return Ok(dialog.peer.clone());
        }
    }

    Err(Error::ChannelNotFound(format!(
        "chat {} not found in this account's dialogs",
        target_id
    )))
}

/// Member count the platform reports for the target, when readable.
pub async fn reported_count(client: &Client, target: &Target) -> Option<usize> {
    let result = match target.chat {
        ChatRef::Channel { .. } => {
            let channel = target.chat.input_channel()?;
            client
                .invoke(&tl::functions::channels::GetFullChannel { channel })
                .await
                .map(|full| {
                    let tl::enums::messages::ChatFull::Full(full) = full;
                    full_chat_count(&full.full_chat)
                })
        }
        ChatRef::Chat { id } => client
            .invoke(&tl::functions::messages::GetFullChat { chat_id: id })
            .await
            .map(|full| {
                let tl::enums::messages::ChatFull::Full(full) = full;
                full_chat_count(&full.full_chat)
            }),
    };

    match result {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "Could not read the channel member count");
            None
        }
    }
}

fn full_chat_count(full: &tl::enums::ChatFull) -> Option<usize> {
    match full {
        tl::enums::ChatFull::ChannelFull(cf) => cf.participants_count.map(|n| n.max(0) as usize),
        tl::enums::ChatFull::Full(cf) => match &cf.participants {
            tl::enums::ChatParticipants::Participants(p) => Some(p.participants.len()),
            tl::enums::ChatParticipants::Forbidden(_) => None,
        },
    }
}
