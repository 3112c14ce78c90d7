//! Mailbox access.
//!
//! Two layers:
//!
//! - [`MailboxSession`]: the raw protocol capabilities (connect, search ids,
//!   fetch, decode, disconnect). Implemented by `imap::ImapSession` and by
//!   [`mock::MockMailbox`].
//! - [`MailboxSearchClient`]: "messages from this sender, matching these
//!   subjects, received since T, newest first". [`SessionSearchClient`]
//!   builds it on top of any session.

#[cfg(feature = "imap")]
pub mod imap;
pub mod mime;
pub mod mock;

use crate::result::{SleuthError, SleuthResult};
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// One message as seen by the engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMessage {
    /// Sender address
    pub sender: String,
    /// Decoded subject
    pub subject: String,
    /// Server receive time
    pub received_at: DateTime<Utc>,
    /// Decoded body text (markup not yet stripped)
    pub body: String,
}

impl CandidateMessage {
    /// Create a message
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        received_at: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            received_at,
            body: body.into(),
        }
    }
}

/// A subject rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectPattern {
    /// Whole subject equals the text
    Exact(String),
    /// Case-insensitive substring
    Contains(String),
    /// Regular expression
    Regex(String),
}

impl SubjectPattern {
    /// Substitute `{name}` placeholders
    #[must_use]
    pub fn render(&self, vars: &[(&str, &str)]) -> Self {
        let fill = |text: &str| {
            vars.iter().fold(text.to_string(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        };
        match self {
            Self::Exact(t) => Self::Exact(fill(t)),
            Self::Contains(t) => Self::Contains(fill(t)),
            Self::Regex(t) => Self::Regex(fill(t)),
        }
    }
}

#[derive(Debug, Clone)]
enum CompiledPattern {
    Exact(String),
    Contains(String),
    Regex(Regex),
}

/// Compiled subject allow-list. A subject passes if any pattern matches.
#[derive(Debug, Clone)]
pub struct SubjectAllowList {
    patterns: Vec<CompiledPattern>,
}

impl SubjectAllowList {
    /// Compile patterns
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Config`] on an invalid regex
    pub fn new(patterns: &[SubjectPattern]) -> SleuthResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| match p {
                SubjectPattern::Exact(t) => Ok(CompiledPattern::Exact(t.clone())),
                SubjectPattern::Contains(t) => Ok(CompiledPattern::Contains(t.to_lowercase())),
                SubjectPattern::Regex(r) => RegexBuilder::new(r)
                    .case_insensitive(true)
                    .build()
                    .map(CompiledPattern::Regex)
                    .map_err(|e| SleuthError::config(format!("invalid subject regex '{r}': {e}"))),
            })
            .collect::<SleuthResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Allow-list of exact subjects
    ///
    /// # Errors
    ///
    /// Never fails for exact patterns; kept fallible for symmetry with `new`
    pub fn exact<I, S>(subjects: I) -> SleuthResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<SubjectPattern> = subjects
            .into_iter()
            .map(|s| SubjectPattern::Exact(s.into()))
            .collect();
        Self::new(&patterns)
    }

    /// Accept everything
    #[must_use]
    pub const fn any() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Whether the subject passes. An empty list accepts everything.
    #[must_use]
    pub fn matches(&self, subject: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let trimmed = subject.trim();
        let lowered = trimmed.to_lowercase();
        self.patterns.iter().any(|p| match p {
            CompiledPattern::Exact(t) => trimmed == t.trim(),
            CompiledPattern::Contains(t) => lowered.contains(t.as_str()),
            CompiledPattern::Regex(r) => r.is_match(trimmed),
        })
    }

    /// Literal text a server-side SUBJECT search can use, when there is
    /// exactly one non-regex pattern
    #[must_use]
    pub fn server_hint(&self) -> Option<&str> {
        match self.patterns.as_slice() {
            [CompiledPattern::Exact(t) | CompiledPattern::Contains(t)] => Some(t.as_str()),
            _ => None,
        }
    }
}

/// Search scope: sender plus earliest receive time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Sender address
    pub sender: String,
    /// Earliest receive time (inclusive)
    pub since: DateTime<Utc>,
    /// Optional server-side subject filter
    pub subject: Option<String>,
}

/// Message as fetched from the server, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Server message id
    pub id: u32,
    /// Server receive time, when reported
    pub internal_date: Option<DateTime<Utc>>,
    /// RFC 822 bytes
    pub bytes: Vec<u8>,
}

/// Raw mailbox protocol session
pub trait MailboxSession {
    /// Open and authenticate
    fn connect(&mut self) -> SleuthResult<()>;

    /// Ids of messages matching the criteria. The date part of `since` may be
    /// applied at day granularity.
    fn search(&mut self, criteria: &SearchCriteria) -> SleuthResult<Vec<u32>>;

    /// Fetch one message
    fn fetch(&mut self, id: u32) -> SleuthResult<RawMessage>;

    /// Close the session
    fn disconnect(&mut self) -> SleuthResult<()>;

    /// Decoded subject
    fn decode_subject(&self, raw: &RawMessage) -> String {
        mime::ParsedMessage::parse(&raw.bytes).subject()
    }

    /// Decoded body text, preferring `text/plain`
    fn decode_body(&self, raw: &RawMessage) -> String {
        mime::ParsedMessage::parse(&raw.bytes).body_text()
    }

    /// Sender address
    fn decode_sender(&self, raw: &RawMessage) -> String {
        mime::ParsedMessage::parse(&raw.bytes).sender()
    }

    /// Receive time: server date first, then the Date header
    fn decode_received_at(&self, raw: &RawMessage) -> Option<DateTime<Utc>> {
        raw.internal_date
            .or_else(|| mime::ParsedMessage::parse(&raw.bytes).date())
    }
}

/// Sender/subject/time search returning decoded messages, newest first.
pub trait MailboxSearchClient {
    /// Messages from `sender` whose subject passes `subjects`, received at or
    /// after `since`, newest first.
    ///
    /// Fails with `Connectivity` on transport failure and `Auth` on
    /// credential rejection.
    fn search(
        &mut self,
        sender: &str,
        subjects: &SubjectAllowList,
        since: DateTime<Utc>,
    ) -> SleuthResult<Vec<CandidateMessage>>;
}

impl<T: MailboxSearchClient + ?Sized> MailboxSearchClient for &mut T {
    fn search(
        &mut self,
        sender: &str,
        subjects: &SubjectAllowList,
        since: DateTime<Utc>,
    ) -> SleuthResult<Vec<CandidateMessage>> {
        (**self).search(sender, subjects, since)
    }
}

/// [`MailboxSearchClient`] over a [`MailboxSession`].
///
/// Connects lazily on first search, reconnects after a connectivity failure,
/// and disconnects when dropped.
#[derive(Debug)]
pub struct SessionSearchClient<S: MailboxSession> {
    session: S,
    connected: bool,
}

impl<S: MailboxSession> SessionSearchClient<S> {
    /// Wrap a session
    pub const fn new(session: S) -> Self {
        Self {
            session,
            connected: false,
        }
    }

    /// Borrow the session
    pub const fn session(&self) -> &S {
        &self.session
    }

    /// Disconnect now
    ///
    /// # Errors
    ///
    /// Returns the session's disconnect error
    pub fn close(&mut self) -> SleuthResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.session.disconnect()
    }

    fn ensure_connected(&mut self) -> SleuthResult<()> {
        if !self.connected {
            self.session.connect()?;
            self.connected = true;
        }
        Ok(())
    }

    fn search_connected(
        &mut self,
        sender: &str,
        subjects: &SubjectAllowList,
        since: DateTime<Utc>,
    ) -> SleuthResult<Vec<CandidateMessage>> {
        let criteria = SearchCriteria {
            sender: sender.to_string(),
            since,
            subject: subjects.server_hint().map(str::to_string),
        };
        let ids = self.session.search(&criteria)?;

        let mut found = Vec::new();
        for id in ids {
            let raw = self.session.fetch(id)?;
            let Some(received_at) = self.session.decode_received_at(&raw) else {
                tracing::debug!(id, "message without a receive time skipped");
                continue;
            };
            // Server-side SINCE is date granular
            if received_at < since {
                continue;
            }
            let subject = self.session.decode_subject(&raw);
            if !subjects.matches(&subject) {
                continue;
            }
            found.push(CandidateMessage {
                sender: self.session.decode_sender(&raw),
                subject,
                received_at,
                body: self.session.decode_body(&raw),
            });
        }

        found.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(found)
    }
}

impl<S: MailboxSession> MailboxSearchClient for SessionSearchClient<S> {
    fn search(
        &mut self,
        sender: &str,
        subjects: &SubjectAllowList,
        since: DateTime<Utc>,
    ) -> SleuthResult<Vec<CandidateMessage>> {
        self.ensure_connected()?;
        let result = self.search_connected(sender, subjects, since);
        if let Err(err) = &result {
            if matches!(err, SleuthError::Connectivity { .. }) {
                // Next search opens a fresh connection
                self.connected = false;
            }
        }
        result
    }
}

impl<S: MailboxSession> Drop for SessionSearchClient<S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "mailbox disconnect failed");
        }
    }
}
