//! Paginated membership fetching
//!
//! Telegram only lists a limited number of participants per search query, so
//! a channel is walked once with the empty query and then, optionally, once per
//! letter and digit. Results are merged by user id in first-seen order.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use grammers_client::Client;
use grammers_tl_types as tl;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::channel::{ChatRef, Target};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::member::{Member, ParticipantMeta};

/// Knobs for one fetch run
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: i32,
    pub request_delay: Duration,
    pub pattern_delay: Duration,
    /// 0 means no limit
    pub max_members: usize,
    pub search_patterns: bool,
}

impl FetchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            request_delay: config.request_delay,
            pattern_delay: config.pattern_delay,
            max_members: config.max_members,
            search_patterns: config.search_patterns,
        }
    }
}

/// Participant search queries, in the order they are tried.
pub fn search_plan(widen: bool) -> Vec<String> {
    let mut plan = vec![String::new()];
    if widen {
        plan.extend(('a'..='z').map(String::from));
        plan.extend(('0'..='9').map(String::from));
    }
    plan
}

/// Ordered, id-unique member accumulator with an optional row cap.
#[derive(Debug, Default)]
pub struct MemberCollector {
    members: Vec<Member>,
    seen: HashSet<i64>,
    cap: Option<usize>,
}

impl MemberCollector {
    /// The cap is the smaller of `max_members` (0 = unlimited) and the
    /// platform-reported count, so an export never has more rows than the
    /// channel was reported to have.
    pub fn new(max_members: usize, reported: Option<usize>) -> Self {
        let configured = (max_members > 0).then_some(max_members);
        let cap = match (configured, reported) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            cap,
            ..Default::default()
        }
    }

    pub fn cap(&self) -> Option<usize> {
        self.cap
    }

    /// Returns true if the member was new and there was room for it.
    pub fn push(&mut self, member: Member) -> bool {
        if self.is_full() || !self.seen.insert(member.id) {
            return false;
        }
        self.members.push(member);
        true
    }

    /// Returns how many of `members` were added.
    pub fn extend<I: IntoIterator<Item = Member>>(&mut self, members: I) -> usize {
        let mut added = 0;
        for member in members {
            if self.push(member) {
                added += 1;
            }
        }
        added
    }

    pub fn is_full(&self) -> bool {
        self.cap.is_some_and(|cap| self.members.len() >= cap)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn into_members(self) -> Vec<Member> {
        self.members
    }
}

/// Exported share of the reported membership, in percent.
pub fn coverage(exported: usize, reported: Option<usize>) -> Option<f64> {
    match reported {
        Some(total) if total > 0 => Some(exported as f64 * 100.0 / total as f64),
        _ => None,
    }
}

/// One page of participants for a search query.
#[derive(Debug, Default)]
pub struct Page {
    pub members: Vec<Member>,
    /// Entries the server returned, before dropping ones without a user.
    pub returned: usize,
}

/// Source of participant pages, separated from the API for testing.
pub(crate) trait ParticipantPages {
    fn page(&self, query: &str, offset: i32, limit: i32) -> impl Future<Output = Result<Page>>;
}

struct ChannelPages<'a> {
    client: &'a Client,
    channel: tl::enums::InputChannel,
}

impl ParticipantPages for ChannelPages<'_> {
    async fn page(&self, query: &str, offset: i32, limit: i32) -> Result<Page> {
        let request = tl::functions::channels::GetParticipants {
            channel: self.channel.clone(),
            filter: tl::enums::ChannelParticipantsFilter::ChannelParticipantsSearch(
                tl::types::ChannelParticipantsSearch {
                    q: query.to_string(),
                },
            ),
            offset,
            limit,
            hash: 0,
        };

        match self.client.invoke(&request).await? {
            tl::enums::channels::ChannelParticipants::Participants(p) => {
                let metas: Vec<ParticipantMeta> = p
                    .participants
                    .iter()
                    .filter_map(ParticipantMeta::from_raw)
                    .collect();
                Ok(Page {
                    members: join_users(&metas, &p.users),
                    returned: p.participants.len(),
                })
            }
            tl::enums::channels::ChannelParticipants::NotModified => Ok(Page::default()),
        }
    }
}

/// Pair participant entries with their user objects, in participant order.
fn join_users(metas: &[ParticipantMeta], users: &[tl::enums::User]) -> Vec<Member> {
    let by_id: HashMap<i64, Member> = users
        .iter()
        .filter_map(Member::from_raw_user)
        .map(|m| (m.id, m))
        .collect();

    metas
        .iter()
        .filter_map(|meta| {
            by_id
                .get(&meta.user_id)
                .cloned()
                .map(|m| m.with_meta(Some(meta)))
        })
        .collect()
}

/// Fetch every visible member of the target.
pub async fn fetch_members(
    client: &Client,
    target: &Target,
    reported: Option<usize>,
    options: &FetchOptions,
) -> Result<Vec<Member>> {
    let mut collector = MemberCollector::new(options.max_members, reported);
    if let Some(cap) = collector.cap() {
        info!(cap, "Collecting at most {} members", cap);
    }

    match target.chat {
        ChatRef::Channel { .. } => {
            let channel = target.chat.input_channel().ok_or_else(|| {
                Error::ChannelNotFound(format!("'{}' has no channel handle", target.title))
            })?;
            let pages = ChannelPages { client, channel };
            collect_pages(&pages, &search_plan(options.search_patterns), options, &mut collector)
                .await?;
        }
        ChatRef::Chat { id } => {
            let added = collector.extend(fetch_basic_group(client, id).await?);
            info!(added, "Fetched basic group members");
        }
    }

    Ok(collector.into_members())
}

/// Walk every query of the plan, page by page, into the collector.
///
/// Errors on the first query, and errors that no later query could avoid,
/// abort the fetch. Other failures end only the current query.
pub(crate) async fn collect_pages<S: ParticipantPages>(
    source: &S,
    plan: &[String],
    options: &FetchOptions,
    collector: &mut MemberCollector,
) -> Result<()> {
    let limit = options.page_size;

    for (index, query) in plan.iter().enumerate() {
        if collector.is_full() {
            info!("Member cap reached, skipping remaining queries");
            break;
        }
        if index > 0 && !options.pattern_delay.is_zero() {
            sleep(options.pattern_delay).await;
        }

        let before = collector.len();
        let mut offset = 0i32;

        loop {
            let page = match source.page(query, offset, limit).await {
                Ok(page) => page,
                Err(e) if index == 0 || e.is_fatal_for_fetch() => return Err(e),
                Err(e) => {
                    error!(query = %query, offset, error = %e, "Failed to fetch participants");
                    break;
                }
            };

            if page.returned == 0 {
                break;
            }

            collector.extend(page.members);
            offset += page.returned as i32;
            info!(
                query = %query,
                offset,
                total = collector.len(),
                "Fetched {} members so far",
                collector.len()
            );

            if collector.is_full() || page.returned < limit as usize {
                break;
            }
            if !options.request_delay.is_zero() {
                sleep(options.request_delay).await;
            }
        }

        info!(
            query = %query,
            added = collector.len() - before,
            total = collector.len(),
            "Search query finished"
        );
    }

    Ok(())
}

/// Basic groups return their whole member list in one full-chat call.
async fn fetch_basic_group(client: &Client, chat_id: i64) -> Result<Vec<Member>> {
    let tl::enums::messages::ChatFull::Full(full) = client
        .invoke(&tl::functions::messages::GetFullChat { chat_id })
        .await?;

    let participants = match &full.full_chat {
        tl::enums::ChatFull::Full(chat) => match &chat.participants {
            tl::enums::ChatParticipants::Participants(p) => p.participants.clone(),
            tl::enums::ChatParticipants::Forbidden(_) => {
                return Err(Error::PermissionDenied(
                    "the member list of this group is hidden".to_string(),
                ))
            }
        },
        tl::enums::ChatFull::ChannelFull(_) => {
            warn!("Group turned out to be a channel, no members listed");
            Vec::new()
        }
    };

    let metas: Vec<ParticipantMeta> = participants
        .iter()
        .map(ParticipantMeta::from_chat)
        .collect();

    Ok(join_users(&metas, &full.users))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberRole;
    use grammers_client::InvocationError;
    use grammers_mtsender::RpcError;
    use std::cell::RefCell;

    fn member(id: i64) -> Member {
        Member {
            id,
            ..Default::default()
        }
    }

    fn options(page_size: i32, max_members: usize) -> FetchOptions {
        FetchOptions {
            page_size,
            request_delay: Duration::ZERO,
            pattern_delay: Duration::ZERO,
            max_members,
            search_patterns: true,
        }
    }

    /// Serves fixed member ids per query, sliced by offset/limit.
    struct FakePages {
        by_query: HashMap<String, Vec<i64>>,
        fail_on: Option<(&'static str, fn() -> Error)>,
        calls: RefCell<Vec<(String, i32)>>,
    }

    impl FakePages {
        fn new(entries: &[(&str, Vec<i64>)]) -> Self {
            Self {
                by_query: entries
                    .iter()
                    .map(|(q, ids)| (q.to_string(), ids.clone()))
                    .collect(),
                fail_on: None,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ParticipantPages for FakePages {
        async fn page(&self, query: &str, offset: i32, limit: i32) -> Result<Page> {
            self.calls.borrow_mut().push((query.to_string(), offset));
            if let Some((q, make_error)) = self.fail_on {
                if q == query {
                    return Err(make_error());
                }
            }
            let ids = self.by_query.get(query).cloned().unwrap_or_default();
            let start = (offset as usize).min(ids.len());
            let end = (start + limit as usize).min(ids.len());
            let members: Vec<Member> = ids[start..end].iter().map(|&id| member(id)).collect();
            Ok(Page {
                returned: members.len(),
                members,
            })
        }
    }

    fn plan(queries: &[&str]) -> Vec<String> {
        queries.iter().map(|q| q.to_string()).collect()
    }

    #[test]
    fn search_plan_covers_letters_and_digits() {
        let full = search_plan(true);
        assert_eq!(full.len(), 1 + 26 + 10);
        assert_eq!(full[0], "");
        assert_eq!(full[1], "a");
        assert_eq!(full.last().unwrap(), "9");

        assert_eq!(search_plan(false), vec![String::new()]);
    }

    #[test]
    fn collector_deduplicates_and_keeps_order() {
        let mut collector = MemberCollector::new(0, None);
        assert_eq!(collector.extend([member(3), member(1), member(3), member(2)]), 3);
        let ids: Vec<i64> = collector.into_members().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn collector_never_exceeds_reported_count() {
        let mut collector = MemberCollector::new(10_000, Some(2));
        collector.extend((1..=5).map(member));
        assert_eq!(collector.len(), 2);
        assert!(collector.is_full());
        assert!(!collector.push(member(99)));
    }

    #[test]
    fn collector_cap_is_smallest_limit() {
        assert_eq!(MemberCollector::new(0, None).cap(), None);
        assert_eq!(MemberCollector::new(0, Some(7)).cap(), Some(7));
        assert_eq!(MemberCollector::new(5, None).cap(), Some(5));
        assert_eq!(MemberCollector::new(5, Some(7)).cap(), Some(5));
        assert_eq!(MemberCollector::new(9, Some(7)).cap(), Some(7));
    }

    #[test]
    fn coverage_percent() {
        assert_eq!(coverage(48, Some(50)), Some(96.0));
        assert_eq!(coverage(10, None), None);
        assert_eq!(coverage(0, Some(0)), None);
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let source = FakePages::new(&[("", (1..=5).collect())]);
        let mut collector = MemberCollector::new(0, None);

        collect_pages(&source, &plan(&[""]), &options(2, 0), &mut collector)
            .await
            .unwrap();

        assert_eq!(collector.len(), 5);
        let offsets: Vec<i32> = source.calls.borrow().iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn stops_on_empty_page() {
        let source = FakePages::new(&[("", (1..=4).collect())]);
        let mut collector = MemberCollector::new(0, None);

        collect_pages(&source, &plan(&[""]), &options(2, 0), &mut collector)
            .await
            .unwrap();

        assert_eq!(collector.len(), 4);
        assert_eq!(source.calls.borrow().len(), 3);
    }

    #[tokio::test]
    async fn later_queries_only_add_new_members() {
        let source = FakePages::new(&[
            ("", vec![1, 2, 3]),
            ("a", vec![2, 3, 4, 5]),
            ("b", vec![5, 6]),
        ]);
        let mut collector = MemberCollector::new(0, None);

        collect_pages(&source, &plan(&["", "a", "b"]), &options(200, 0), &mut collector)
            .await
            .unwrap();

        let ids: Vec<i64> = collector.into_members().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn cap_skips_remaining_queries() {
        let source = FakePages::new(&[("", vec![1, 2, 3]), ("a", vec![4, 5])]);
        let mut collector = MemberCollector::new(0, Some(3));

        collect_pages(&source, &plan(&["", "a"]), &options(200, 0), &mut collector)
            .await
            .unwrap();

        assert_eq!(collector.len(), 3);
        assert!(source.calls.borrow().iter().all(|(q, _)| q.is_empty()));
    }

    #[tokio::test]
    async fn permission_error_is_fatal() {
        let mut source = FakePages::new(&[("", vec![1])]);
        source.fail_on = Some(("", || Error::PermissionDenied("CHAT_ADMIN_REQUIRED".into())));
        let mut collector = MemberCollector::new(0, None);

        let err = collect_pages(&source, &plan(&["", "a"]), &options(200, 0), &mut collector)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn transient_error_in_widening_query_is_skipped() {
        let mut source = FakePages::new(&[("", vec![1, 2]), ("b", vec![3])]);
        source.fail_on = Some(("a", || Error::TelegramError("timeout".into())));
        let mut collector = MemberCollector::new(0, None);

        collect_pages(&source, &plan(&["", "a", "b"]), &options(200, 0), &mut collector)
            .await
            .unwrap();

        assert_eq!(collector.len(), 3);
    }

    #[tokio::test]
    async fn admin_required_in_widening_query_is_fatal() {
        let mut source = FakePages::new(&[("", vec![1, 2])]);
        source.fail_on = Some(("a", || {
            Error::from(InvocationError::Rpc(RpcError {
                code: 400,
                name: "CHAT_ADMIN_REQUIRED".into(),
                value: None,
                caused_by: None,
            }))
        }));
        let mut collector = MemberCollector::new(0, None);

        let err = collect_pages(&source, &plan(&["", "a", "b"]), &options(200, 0), &mut collector)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(err.to_string().contains("administrator"));
    }

    #[tokio::test]
    async fn error_on_first_query_is_fatal() {
        let mut source = FakePages::new(&[]);
        source.fail_on = Some(("", || Error::TelegramError("timeout".into())));
        let mut collector = MemberCollector::new(0, None);

        let result = collect_pages(&source, &plan(&["", "a"]), &options(200, 0), &mut collector).await;
        assert!(result.is_err());
    }

    #[test]
    fn empty_users_are_not_joined() {
        let users = vec![tl::enums::User::Empty(tl::types::UserEmpty { id: 1 })];
        let metas = vec![ParticipantMeta {
            user_id: 1,
            role: MemberRole::Admin,
            joined_at: None,
        }];
        // Empty users carry no profile, so nothing is joined.
        assert!(join_users(&metas, &users).is_empty());
    }
}
