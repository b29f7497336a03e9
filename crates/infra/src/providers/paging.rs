//! Cursor and window bookkeeping shared by the adapters

use chrono::{DateTime, SecondsFormat, Utc};
use ledgerlink_domain::constants::DEFAULT_PAGE_LIMIT;
use ledgerlink_domain::{FetchPage, FetchWindow, ProviderTransaction, SyncCursor};

/// One item of a provider page
///
/// Items the provider returned but that are not settled still advance the
/// watermark; they carry no transaction.
#[derive(Debug)]
pub(crate) struct Observed {
    pub occurred_at: DateTime<Utc>,
    pub transaction: Option<ProviderTransaction>,
}

impl Observed {
    pub(crate) const fn settled(transaction: ProviderTransaction) -> Self {
        Self { occurred_at: transaction.occurred_at, transaction: Some(transaction) }
    }

    pub(crate) const fn skipped(occurred_at: DateTime<Utc>) -> Self {
        Self { occurred_at, transaction: None }
    }
}

/// Lower bound of the next request: the cursor watermark, else the window start
pub(crate) fn resume_from(cursor: Option<&SyncCursor>, window: &FetchWindow) -> Option<DateTime<Utc>> {
    cursor.map(|c| c.watermark).or(window.start)
}

/// Provider page token to continue from, if the cursor carries one
pub(crate) fn resume_token(cursor: Option<&SyncCursor>) -> Option<&str> {
    cursor.and_then(|c| c.token.as_deref()).filter(|t| !t.is_empty())
}

pub(crate) fn page_limit(window: &FetchWindow) -> u32 {
    window.limit.clamp(1, DEFAULT_PAGE_LIMIT)
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Turn one provider page into a [`FetchPage`]
///
/// Items outside the window are dropped and an item past `window.end` ends
/// paging. The next watermark never falls behind `previous`; the provider
/// token is kept only while more pages remain.
pub(crate) fn assemble_page(
    mut observed: Vec<Observed>,
    previous: Option<&SyncCursor>,
    window: &FetchWindow,
    provider_token: Option<String>,
) -> FetchPage {
    observed.sort_by_key(|item| item.occurred_at);

    let passed_end = window.end.is_some_and(|end| observed.iter().any(|item| item.occurred_at > end));
    let in_window: Vec<Observed> =
        observed.into_iter().filter(|item| window.contains(item.occurred_at)).collect();

    let latest = in_window.last().map(|item| item.occurred_at);
    let watermark = match (previous.map(|c| c.watermark), latest) {
        (Some(prev), Some(latest)) => Some(prev.max(latest)),
        (prev, latest) => prev.or(latest),
    };

    let provider_token = provider_token.filter(|t| !t.is_empty());
    let has_more = provider_token.is_some() && !passed_end;
    let next_cursor = watermark.map(|watermark| SyncCursor {
        watermark,
        token: if has_more { provider_token } else { None },
    });

    FetchPage {
        transactions: in_window.into_iter().filter_map(|item| item.transaction).collect(),
        next_cursor,
        has_more,
    }
}
