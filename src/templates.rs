use askama::Template;

use crate::poll::Poll;
use crate::refresh::RefreshSettings;
use crate::view::{OptionTally, RecentVote};

#[derive(Template)]
#[template(path = "results.html")]
pub struct ResultsTemplate<'a> {
    pub poll: &'a Poll,
    pub total: u64,
    pub tallies: &'a [OptionTally<'a>],
    /// Most recent first
    pub recent: &'a [RecentVote<'a>],
    pub error: Option<&'a str>,
    pub updated: String,
    pub settings: RefreshSettings,
    /// Whether to show the presenter form
    pub presenter_enabled: bool,
}

impl ResultsTemplate<'_> {
    /// Page reload period, never under a second
    fn refresh_secs(&self) -> u64 {
        self.settings.interval_ms.div_ceil(1000).max(1)
    }
}

#[derive(Template)]
#[template(path = "vote.html")]
pub struct VoteTemplate<'a> {
    pub poll: &'a Poll,
    pub voter: &'a str,
    /// (code, label, selected)
    pub options: &'a [(&'a str, &'a str, bool)],
    pub can_select: bool,
    pub submitting: bool,
    pub succeeded: bool,
    pub success: &'a str,
    pub error: Option<&'a str>,
}

/// Placeholder shown instead of a protected page
#[derive(Template)]
#[template(path = "gate.html")]
pub struct GateTemplate<'a> {
    pub title: &'a str,
    pub sub: &'a str,
    pub waiting: bool,
}

#[derive(Template)]
#[template(path = "return.html")]
pub struct ReturnTemplate<'a> {
    pub heading: &'a str,
    pub links: &'a [(&'a str, &'a str)],
}
