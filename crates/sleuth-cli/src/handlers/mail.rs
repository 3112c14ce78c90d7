//! Mail command handler

use crate::error::CliResult;
use crate::output::{OutputFormat, Reporter};
use crate::MailArgs;
use chrono::{DateTime, Utc};
use sleuth::{CandidateMessage, RunConfig, SubjectAllowList, SubjectPattern};

/// Execute the mail command: one search, newest first
#[cfg(feature = "imap")]
pub fn execute_mail(reporter: &Reporter, args: &MailArgs) -> CliResult<()> {
    use sleuth::{ImapSession, MailboxSearchClient, SessionSearchClient};

    let config = RunConfig::load(&args.config)?;
    config.validate_mail()?;
    let subjects = allow_list(&config, &args.subjects)?;
    let since = since(Utc::now(), args.since_minutes);

    let mut client = SessionSearchClient::new(ImapSession::new(config.mail.imap_settings()));
    let messages = client.search(&config.mail.sender, &subjects, since)?;
    if let Err(e) = client.close() {
        tracing::warn!(error = %e, "mailbox disconnect failed");
    }

    print_messages(reporter, args, &messages)?;
    reporter.info(&format!(
        "{} message(s) from {} since {}",
        messages.len(),
        config.mail.sender,
        since.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    Ok(())
}

/// Without the mailbox adapter there is nothing to search
#[cfg(not(feature = "imap"))]
pub fn execute_mail(_reporter: &Reporter, _args: &MailArgs) -> CliResult<()> {
    Err(crate::CliError::feature_disabled("mail", "imap"))
}

/// `--subject` substrings, or the configured code subjects
pub fn allow_list(config: &RunConfig, subjects: &[String]) -> CliResult<SubjectAllowList> {
    if subjects.is_empty() {
        return Ok(SubjectAllowList::new(&config.otp.subjects)?);
    }
    let patterns: Vec<SubjectPattern> = subjects
        .iter()
        .map(|s| SubjectPattern::Contains(s.clone()))
        .collect();
    Ok(SubjectAllowList::new(&patterns)?)
}

/// Start of the search window
#[must_use]
pub fn since(now: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
    now - chrono::Duration::minutes(i64::from(minutes))
}

/// `received_at  subject` per message
pub fn print_messages(
    reporter: &Reporter,
    args: &MailArgs,
    messages: &[CandidateMessage],
) -> CliResult<()> {
    match OutputFormat::from(args.format) {
        OutputFormat::Json => reporter.emit(&serde_json::to_string_pretty(messages)?),
        OutputFormat::Text => {
            for message in messages {
                reporter.emit(&message_line(message));
            }
        }
    }
    Ok(())
}

/// One text line for a message
#[must_use]
pub fn message_line(message: &CandidateMessage) -> String {
    format!(
        "{}  {}",
        message.received_at.format("%Y-%m-%d %H:%M:%S"),
        message.subject
    )
}
