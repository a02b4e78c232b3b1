use askama::Template;

use crate::error::{ClientError, UserError};
use crate::poll::{Poll, VoteSubmission};
use crate::templates::VoteTemplate;

pub const SUCCESS_MESSAGE: &str = "Your vote has been recorded! Redirecting…";
pub const INTERRUPTED_MESSAGE: &str = "Your vote was interrupted. Please submit again.";

#[derive(Debug, Clone, PartialEq)]
pub enum PanelState {
    Idle,
    Submitting,
    /// Final, nothing can be submitted afterwards
    Succeeded,
    /// The selector stays usable and the vote can be sent again
    Failed(ClientError),
}

/// Option picker and submission status of the vote page
#[derive(Debug, Clone)]
pub struct VotePanel {
    poll_id: String,
    options: Vec<String>,
    choice: String,
    state: PanelState,
}

impl VotePanel {
    pub fn new(poll: &Poll) -> VotePanel {
        VotePanel {
            poll_id: poll.id.clone(),
            options: poll.options.iter().map(|o| o.code.clone()).collect(),
            choice: poll.first_option().to_string(),
            state: PanelState::Idle,
        }
    }

    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    pub fn choice(&self) -> &str {
        &self.choice
    }

    pub fn state(&self) -> &PanelState {
        &self.state
    }

    pub fn can_select(&self) -> bool {
        !matches!(self.state, PanelState::Submitting | PanelState::Succeeded)
    }

    pub fn can_submit(&self) -> bool {
        self.can_select()
    }

    /// Changes the pending choice. Never talks to the API.
    pub fn select(&mut self, option: &str) -> Result<(), UserError> {
        if !self.options.iter().any(|o| o == option) {
            return Err(UserError::UnknownOption(option.to_string()));
        }
        if !self.can_select() {
            return Ok(());
        }
        self.choice = option.to_string();
        if let PanelState::Failed(_) = self.state {
            self.state = PanelState::Idle;
        }
        Ok(())
    }

    /// Starts a submission of the current choice. Returns `None` while another
    /// one is outstanding or after a successful vote.
    pub fn begin_submit(&mut self) -> Option<VoteSubmission> {
        if !self.can_submit() {
            return None;
        }
        self.state = PanelState::Submitting;
        Some(VoteSubmission {
            poll_id: self.poll_id.clone(),
            option: self.choice.clone(),
        })
    }

    pub fn finish(&mut self, result: Result<(), ClientError>) {
        self.state = match result {
            Ok(()) => PanelState::Succeeded,
            Err(e) => PanelState::Failed(e),
        };
    }

    /// The submission never finished, so nothing is known about its outcome.
    /// The vote can be sent again.
    pub fn interrupt(&mut self) {
        if self.state == PanelState::Submitting {
            self.state = PanelState::Failed(ClientError::Submission(
                INTERRUPTED_MESSAGE.to_string(),
            ));
        }
    }

    /// Renders the vote page for a signed in `voter`
    pub fn voting_site(&self, poll: &Poll, voter: &str) -> Result<String, askama::Error> {
        let options: Vec<_> = poll
            .options
            .iter()
            .map(|o| (o.code.as_str(), o.label.as_str(), o.code == self.choice))
            .collect();
        let error = match &self.state {
            PanelState::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        VoteTemplate {
            poll,
            voter,
            options: &options,
            can_select: self.can_select(),
            submitting: self.state == PanelState::Submitting,
            succeeded: self.state == PanelState::Succeeded,
            success: SUCCESS_MESSAGE,
            error: error.as_deref(),
        }
        .render()
    }
}
