use askama::Template;

use crate::poll::{Poll, ResultsSnapshot, VoteRecord};
use crate::refresh::{LiveSnapshot, RefreshSettings};
use crate::templates::ResultsTemplate;

/// Number of votes listed under the bars
pub const RECENT_VOTES: usize = 12;

/// One bar of the results
#[derive(Debug, PartialEq)]
pub struct OptionTally<'a> {
    pub code: &'a str,
    pub label: &'a str,
    pub count: u64,
    pub percentage: u64,
}

/// One row of the live votes table
#[derive(Debug, PartialEq)]
pub struct RecentVote<'a> {
    pub voter: &'a str,
    pub option: &'a str,
    pub label: &'a str,
    pub time: String,
}

/// `round(100 * count / total)` rounding halves up, 0 when nobody voted yet
pub fn percentage(count: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    // Counts come from the API unchecked, keep the arithmetic wide
    let (count, total) = (u128::from(count), u128::from(total));
    u64::try_from((200 * count + total) / (2 * total)).unwrap_or(u64::MAX)
}

/// Last [`RECENT_VOTES`] votes, most recent first
pub fn recent_votes(votes: &[VoteRecord]) -> impl Iterator<Item = &VoteRecord> {
    let start = votes.len().saturating_sub(RECENT_VOTES);
    votes[start..].iter().rev()
}

/// Bars in the poll's own option order, options missing from `counts` count 0
pub fn tallies<'a>(poll: &'a Poll, snapshot: &ResultsSnapshot) -> Vec<OptionTally<'a>> {
    poll.options
        .iter()
        .map(|o| {
            let count = snapshot.count(&o.code);
            OptionTally {
                code: &o.code,
                label: &o.label,
                count,
                percentage: percentage(count, snapshot.total),
            }
        })
        .collect()
}

fn recent_rows<'a>(poll: &'a Poll, snapshot: &'a ResultsSnapshot) -> Vec<RecentVote<'a>> {
    recent_votes(&snapshot.votes)
        .map(|v| {
            let option = v.option.as_deref().unwrap_or("-");
            RecentVote {
                voter: v.voter(),
                option,
                label: poll.label(option),
                time: v
                    .created_at
                    .as_ref()
                    .and_then(|t| t.to_datetime())
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect()
}

/// Presenter view of the results. Renders whatever snapshot is current, with
/// the last error next to it.
pub fn results_site(
    poll: &Poll,
    live: &LiveSnapshot,
    settings: RefreshSettings,
    presenter_enabled: bool,
) -> Result<String, askama::Error> {
    ResultsTemplate {
        poll,
        total: live.snapshot.total,
        tallies: &tallies(poll, &live.snapshot),
        recent: &recent_rows(poll, &live.snapshot),
        error: live.error.as_deref(),
        updated: live
            .updated_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string()),
        settings,
        presenter_enabled,
    }
    .render()
}
