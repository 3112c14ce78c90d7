//! Scripted mailbox for tests.
//!
//! Messages are delivered with a future `received_at`; a search only sees
//! messages whose time has come on the shared clock. Implements both
//! [`MailboxSession`] (rendering messages to RFC 822 so the decode path runs)
//! and [`MailboxSearchClient`] directly.

use super::{
    CandidateMessage, MailboxSearchClient, MailboxSession, RawMessage, SearchCriteria,
    SubjectAllowList,
};
use crate::clock::SharedClock;
use crate::result::{SleuthError, SleuthResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Failure injected into the next search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Transport failure
    Connectivity,
    /// Credential rejection
    Auth,
}

impl MockFailure {
    fn to_error(self) -> SleuthError {
        match self {
            Self::Connectivity => SleuthError::connectivity("mock connection reset"),
            Self::Auth => SleuthError::auth("mock credentials rejected"),
        }
    }
}

/// In-memory mailbox
#[derive(Debug)]
pub struct MockMailbox {
    clock: SharedClock,
    messages: Vec<CandidateMessage>,
    failures: VecDeque<MockFailure>,
    reject_all: bool,
    connected: bool,
    search_calls: usize,
    connects: usize,
    disconnects: usize,
}

impl MockMailbox {
    /// Empty mailbox on the given clock
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            messages: Vec::new(),
            failures: VecDeque::new(),
            reject_all: false,
            connected: false,
            search_calls: 0,
            connects: 0,
            disconnects: 0,
        }
    }

    /// Add a message; it becomes visible at its `received_at`
    pub fn deliver(&mut self, message: CandidateMessage) -> &mut Self {
        self.messages.push(message);
        self
    }

    /// Fail the next searches, in order
    pub fn fail_next(&mut self, failures: impl IntoIterator<Item = MockFailure>) -> &mut Self {
        self.failures.extend(failures);
        self
    }

    /// Reject every connect and search
    pub fn reject_credentials(&mut self) -> &mut Self {
        self.reject_all = true;
        self
    }

    /// Searches made so far, failed ones included
    #[must_use]
    pub const fn search_calls(&self) -> usize {
        self.search_calls
    }

    /// Successful connects
    #[must_use]
    pub const fn connects(&self) -> usize {
        self.connects
    }

    /// Disconnects
    #[must_use]
    pub const fn disconnects(&self) -> usize {
        self.disconnects
    }

    fn visible(&self) -> impl Iterator<Item = (usize, &CandidateMessage)> {
        let now = self.clock.now();
        self.messages
            .iter()
            .enumerate()
            .filter(move |(_, m)| m.received_at <= now)
    }

    fn begin_search(&mut self) -> SleuthResult<()> {
        self.search_calls += 1;
        if self.reject_all {
            return Err(MockFailure::Auth.to_error());
        }
        if let Some(failure) = self.failures.pop_front() {
            return Err(failure.to_error());
        }
        Ok(())
    }
}

/// Render a message as RFC 822 text with a base64 body
#[must_use]
pub fn render_rfc822(message: &CandidateMessage) -> Vec<u8> {
    let subject = if message.subject.is_ascii() {
        message.subject.clone()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(message.subject.as_bytes()))
    };
    format!(
        "From: <{}>\r\nSubject: {}\r\nDate: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: base64\r\n\r\n{}\r\n",
        message.sender,
        subject,
        message.received_at.to_rfc2822(),
        STANDARD.encode(message.body.as_bytes()),
    )
    .into_bytes()
}

impl MailboxSession for MockMailbox {
    fn connect(&mut self) -> SleuthResult<()> {
        if self.reject_all {
            return Err(MockFailure::Auth.to_error());
        }
        self.connected = true;
        self.connects += 1;
        Ok(())
    }

    fn search(&mut self, criteria: &SearchCriteria) -> SleuthResult<Vec<u32>> {
        if !self.connected {
            return Err(SleuthError::connectivity("not connected"));
        }
        self.begin_search()?;
        // Day granularity, like IMAP SINCE
        let since_day = criteria.since.date_naive();
        let hint = criteria.subject.as_deref().map(str::to_lowercase);
        Ok(self
            .visible()
            .filter(|(_, m)| m.sender.eq_ignore_ascii_case(&criteria.sender))
            .filter(|(_, m)| m.received_at.date_naive() >= since_day)
            .filter(|(_, m)| {
                hint.as_deref()
                    .map_or(true, |h| m.subject.to_lowercase().contains(h))
            })
            .map(|(i, _)| i as u32)
            .collect())
    }

    fn fetch(&mut self, id: u32) -> SleuthResult<RawMessage> {
        let message = self
            .messages
            .get(id as usize)
            .ok_or_else(|| SleuthError::connectivity(format!("no message {id}")))?;
        Ok(RawMessage {
            id,
            internal_date: Some(message.received_at),
            bytes: render_rfc822(message),
        })
    }

    fn disconnect(&mut self) -> SleuthResult<()> {
        self.connected = false;
        self.disconnects += 1;
        Ok(())
    }
}

impl MailboxSearchClient for MockMailbox {
    fn search(
        &mut self,
        sender: &str,
        subjects: &SubjectAllowList,
        since: DateTime<Utc>,
    ) -> SleuthResult<Vec<CandidateMessage>> {
        self.begin_search()?;
        let mut found: Vec<CandidateMessage> = self
            .visible()
            .map(|(_, m)| m)
            .filter(|m| m.sender.eq_ignore_ascii_case(sender))
            .filter(|m| m.received_at >= since)
            .filter(|m| subjects.matches(&m.subject))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(found)
    }
}
