//! Sleuth: end-to-end verification for sign-in and analysis workflows
//!
//! Sleuth drives a web application through a user journey and checks what it
//! cannot see directly: the one-time code that arrives by email, the analysis
//! that finishes asynchronously, and the report that must agree with the
//! table on screen.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         SLEUTH Architecture                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌──────────────────┐   ┌──────────────────────┐ │
//! │  │ RunConfig │──►│ WorkflowOrchestr.│──►│ Stages (Scenario)    │ │
//! │  │ (YAML+env)│   │ fail-soft / hard │   │ sign-in, analyze ... │ │
//! │  └───────────┘   └──────────────────┘   └──────────┬───────────┘ │
//! │                                                     │             │
//! │     ┌──────────────┬────────────────┬───────────────┤             │
//! │     ▼              ▼                ▼               ▼             │
//! │  ┌────────┐  ┌─────────────┐  ┌────────────┐  ┌────────────┐     │
//! │  │ OTP    │  │ Completion  │  │ Reconcile  │  │ Mailbox    │     │
//! │  │ engine │  │ watcher     │  │ engine     │  │ search     │     │
//! │  └───┬────┘  └──────┬──────┘  └────────────┘  └────────────┘     │
//! │      └──────────────┴──► BoundedPoller (Clock, AttemptBudget)     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All waiting goes through [`BoundedPoller`] on an injected [`Clock`], so the
//! whole workflow runs deterministically against [`MockUi`], [`MockMailbox`]
//! and [`FakeClock`].

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod result;

/// Attempt budgets and backoff
pub mod backoff;

/// Injectable time source
pub mod clock;

/// Bounded polling with cancellation
pub mod poll;

/// UI driver abstraction and its in-memory double
pub mod driver;

/// Chromium driver over CDP
#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc)]
pub mod chromium;

/// Mailbox search: allow-lists, MIME decoding, IMAP and mock clients
pub mod mailbox;

/// Visible text from HTML
pub mod text;

/// One-time code correlation
pub mod otp;

/// Busy-indicator watcher
pub mod watcher;

/// Tally reconciliation and content comparison
pub mod reconcile;

/// Downloaded files
pub mod artifact;

/// Screenshots by outcome
pub mod screenshot;

/// Run configuration
pub mod config;

/// Stage orchestration and run reports
pub mod workflow;

/// The sign-in and analysis scenario
pub mod scenario;

pub use artifact::{Artifact, ArtifactStore, DownloadTracker};
pub use backoff::{AttemptBudget, BudgetConfig};
#[cfg(feature = "browser")]
pub use chromium::ChromiumUi;
pub use clock::{Clock, FakeClock, SharedClock, SystemClock};
pub use config::{Locators, RunConfig};
pub use driver::{ClickEffect, Element, Locator, MockState, MockUi, UiDriver, UiSession, WaitState};
#[cfg(feature = "imap")]
pub use mailbox::imap::{ImapSession, ImapSettings};
pub use mailbox::mock::MockMailbox;
pub use mailbox::{
    CandidateMessage, MailboxSearchClient, MailboxSession, SessionSearchClient, SubjectAllowList,
    SubjectPattern,
};
pub use otp::{OneTimeCodeEngine, OtpOutcome, OtpReport, OtpSettings, OtpState, OtpUi};
pub use poll::{BoundedPoller, CancellationToken, Observation, PollOutcome, StopReason};
pub use reconcile::{
    compare_content, reconcile, ArtifactTallyRule, ContentComparison, Mismatch, Tally,
};
pub use result::{SleuthError, SleuthResult};
pub use scenario::{LoginOutcome, PageSignIn, Scenario};
pub use screenshot::{ScreenshotRecorder, ShotStatus};
pub use watcher::{CompletionStatus, TaskCompletionWatcher};
pub use workflow::{RunReport, StagePolicy, StageRecord, StageStatus, WorkflowOrchestrator};
