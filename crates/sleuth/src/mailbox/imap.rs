//! IMAP over TLS.

use super::{MailboxSession, RawMessage, SearchCriteria};
use crate::result::{SleuthError, SleuthResult};
use chrono::Utc;
use native_tls::{TlsConnector, TlsStream};
use serde::{Deserialize, Serialize};
use std::net::TcpStream;
use std::time::Duration;

/// Server date plus the full message, without setting \Seen
const FETCH_ATTRS: &str = "(INTERNALDATE BODY.PEEK[])";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapSettings {
    /// Server host
    pub host: String,
    /// Server port (implicit TLS)
    pub port: u16,
    /// Login name
    pub username: String,
    /// App password
    #[serde(skip_serializing)]
    pub password: String,
    /// Mailbox to select
    pub mailbox: String,
    /// Socket read/write timeout in seconds
    pub io_timeout_secs: u64,
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            host: "imap.gmail.com".to_string(),
            port: 993,
            username: String::new(),
            password: String::new(),
            mailbox: "INBOX".to_string(),
            io_timeout_secs: 20,
        }
    }
}

type TlsSession = ::imap::Session<TlsStream<TcpStream>>;

/// [`MailboxSession`] backed by a real IMAP server
pub struct ImapSession {
    settings: ImapSettings,
    session: Option<TlsSession>,
}

impl std::fmt::Debug for ImapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSession")
            .field("host", &self.settings.host)
            .field("port", &self.settings.port)
            .field("username", &self.settings.username)
            .field("connected", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl ImapSession {
    /// Create an unconnected session
    #[must_use]
    pub const fn new(settings: ImapSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    fn session_mut(&mut self) -> SleuthResult<&mut TlsSession> {
        self.session
            .as_mut()
            .ok_or_else(|| SleuthError::connectivity("imap session not connected"))
    }
}

/// Classify a login failure: a tagged NO/BAD is a credential rejection
fn map_imap_error(context: &str, err: ::imap::error::Error) -> SleuthError {
    use ::imap::error::Error;
    match err {
        Error::No(msg) | Error::Bad(msg) => {
            SleuthError::auth(format!("{context}: server refused: {msg}"))
        }
        other => SleuthError::connectivity(format!("{context}: {other}")),
    }
}

/// IMAP date for SEARCH SINCE, e.g. `1-Mar-2024`
fn imap_date(date: chrono::DateTime<Utc>) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// Quote a string for an IMAP search key
fn imap_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Build the SEARCH query.
///
/// SINCE compares dates in the server's timezone, so the date is taken one
/// day early; the exact bound is applied after fetching.
fn search_query(criteria: &SearchCriteria) -> String {
    let mut query = format!(
        "FROM {} SINCE {}",
        imap_quote(&criteria.sender),
        imap_date(criteria.since - chrono::Duration::days(1))
    );
    if let Some(subject) = &criteria.subject {
        query.push_str(" SUBJECT ");
        query.push_str(&imap_quote(subject));
    }
    query
}

impl MailboxSession for ImapSession {
    fn connect(&mut self) -> SleuthResult<()> {
        let ImapSettings {
            host,
            port,
            username,
            password,
            mailbox,
            io_timeout_secs,
        } = &self.settings;

        let tcp = TcpStream::connect((host.as_str(), *port)).map_err(|e| {
            SleuthError::connectivity(format!("imap connect to {host}:{port} failed: {e}"))
        })?;
        let timeout = Some(Duration::from_secs(*io_timeout_secs));
        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)?;

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| SleuthError::connectivity(format!("imap tls builder failed: {e}")))?;
        let stream = tls
            .connect(host, tcp)
            .map_err(|e| SleuthError::connectivity(format!("imap tls handshake failed: {e}")))?;

        let mut client = ::imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| SleuthError::connectivity(format!("imap greeting failed: {e}")))?;

        let mut session = client
            .login(username, password)
            .map_err(|(e, _client)| map_imap_error(&format!("imap login for '{username}'"), e))?;

        session
            .select(mailbox)
            .map_err(|e| {
                SleuthError::connectivity(format!("imap select '{mailbox}' failed: {e}"))
            })?;

        tracing::debug!(host = %host, mailbox = %mailbox, "imap session open");
        self.session = Some(session);
        Ok(())
    }

    fn search(&mut self, criteria: &SearchCriteria) -> SleuthResult<Vec<u32>> {
        let query = search_query(criteria);
        let session = self.session_mut()?;
        // A failed search after login is a transport problem, not a credential one
        let ids = session.search(&query).map_err(|e| {
            SleuthError::connectivity(format!("imap search '{query}' failed: {e}"))
        })?;
        let mut ids: Vec<u32> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch(&mut self, id: u32) -> SleuthResult<RawMessage> {
        let session = self.session_mut()?;
        let fetches = session
            .fetch(id.to_string(), FETCH_ATTRS)
            .map_err(|e| SleuthError::connectivity(format!("imap fetch {id} failed: {e}")))?;
        let fetch = fetches
            .iter()
            .next()
            .ok_or_else(|| SleuthError::connectivity(format!("imap fetch {id} returned nothing")))?;

        Ok(RawMessage {
            id,
            internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            bytes: fetch.body().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    fn disconnect(&mut self) -> SleuthResult<()> {
        if let Some(mut session) = self.session.take() {
            session
                .logout()
                .map_err(|e| SleuthError::connectivity(format!("imap logout failed: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_imap_date_format() {
        let d = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        assert_eq!(imap_date(d), "1-Mar-2024");
    }

    #[test]
    fn test_search_query_quotes_values() {
        let criteria = SearchCriteria {
            sender: "no-reply@codesherlock.ai".to_string(),
            since: Utc.with_ymd_and_hms(2024, 11, 12, 8, 0, 0).unwrap(),
            subject: Some("Say \"hi\"".to_string()),
        };
        assert_eq!(
            search_query(&criteria),
            "FROM \"no-reply@codesherlock.ai\" SINCE 11-Nov-2024 SUBJECT \"Say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_since_covers_servers_west_of_utc() {
        // 00:10 UTC is still the previous day on a -0800 server
        let criteria = SearchCriteria {
            sender: "a@b.c".to_string(),
            since: Utc.with_ymd_and_hms(2024, 3, 2, 0, 10, 0).unwrap(),
            subject: None,
        };
        assert_eq!(search_query(&criteria), "FROM \"a@b.c\" SINCE 1-Mar-2024");
    }

    #[test]
    fn test_no_response_maps_to_auth() {
        let err = map_imap_error("login", ::imap::error::Error::No("bad creds".into()));
        assert!(err.is_auth());
    }

    #[test]
    fn test_connection_lost_maps_to_connectivity() {
        let err = map_imap_error("search", ::imap::error::Error::ConnectionLost);
        assert!(err.is_transient());
    }

    #[test]
    fn test_settings_default() {
        let settings = ImapSettings::default();
        assert_eq!(settings.port, 993);
        assert_eq!(settings.mailbox, "INBOX");
    }

    #[test]
    fn test_search_without_connect_fails() {
        let mut session = ImapSession::new(ImapSettings::default());
        let criteria = SearchCriteria {
            sender: "a".into(),
            since: Utc::now(),
            subject: None,
        };
        assert!(session.search(&criteria).is_err());
    }
}
