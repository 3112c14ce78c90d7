//! The concrete sign-in and analysis workflow.
//!
//! Stages run through a [`WorkflowOrchestrator`]; per-factor stages are named
//! `stage:factor` so a single override in the configuration applies to every
//! factor.

use crate::artifact::{self, Artifact, ArtifactStore, DownloadTracker};
use crate::backoff::AttemptBudget;
use crate::clock::SharedClock;
use crate::config::RunConfig;
use crate::driver::{upload_path, xpath_literal, Element, Locator, UiDriver, UiSession, WaitState};
use crate::mailbox::{CandidateMessage, MailboxSearchClient, SubjectAllowList};
use crate::otp::{OneTimeCodeEngine, OtpOutcome, OtpUi};
use crate::poll::{BoundedPoller, CancellationToken, Observation};
use crate::reconcile::{compare_content, reconcile, ui_tally, ContentComparison, Tally};
use crate::result::{SleuthError, SleuthResult};
use crate::screenshot::{ScreenshotRecorder, ShotStatus};
use crate::watcher::{CompletionStatus, TaskCompletionWatcher};
use crate::workflow::{RunReport, StagePolicy, WorkflowOrchestrator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Poll interval while waiting for the UI to react to a submitted code
const CONFIRM_INTERVAL: Duration = Duration::from_millis(500);

/// Short look to see whether a collapsible section is already open
const EXPANDED_PROBE: Duration = Duration::from_secs(2);

/// How signing in ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginOutcome {
    /// Existing account signed in
    Success,
    /// A new account was created on the way
    SuccessWithSignup {
        /// Name entered in the sign-up form
        first_name: String,
    },
    /// Not signed in
    Failure {
        /// Why
        reason: String,
    },
}

impl LoginOutcome {
    /// Turn `Failure` into a stage error
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::StageFailure`] for `Failure`
    pub fn into_result(self, stage: &str) -> SleuthResult<Self> {
        match self {
            Self::Failure { reason } => Err(SleuthError::stage(stage, reason)),
            other => Ok(other),
        }
    }
}

/// [`OtpUi`] over the sign-in page
pub struct PageSignIn<'a, U: UiDriver + ?Sized> {
    ui: &'a mut U,
    config: &'a RunConfig,
    poller: BoundedPoller,
    cancel: CancellationToken,
}

impl<'a, U: UiDriver + ?Sized> PageSignIn<'a, U> {
    /// Sign in as the configured mailbox address
    pub fn new(ui: &'a mut U, config: &'a RunConfig, poller: BoundedPoller) -> Self {
        Self {
            ui,
            config,
            poller: poller.with_label("otp_confirm"),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop waiting for confirmation when `cancel` fires
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn timeout(&self) -> Duration {
        self.config.app.element_timeout()
    }
}

impl<U: UiDriver + ?Sized> OtpUi for PageSignIn<'_, U> {
    fn request_code(&mut self) -> SleuthResult<()> {
        let locators = &self.config.locators;
        let timeout = self.timeout();
        let field = self.ui.require_visible(&locators.email_input, timeout)?;
        self.ui.type_text(&field, &self.config.mail.address)?;
        let button = self.ui.require_visible(&locators.request_code, timeout)?;
        self.ui.click(&button)?;
        tracing::info!(address = %self.config.mail.address, "one-time code requested");
        Ok(())
    }

    fn resend_code(&mut self) -> SleuthResult<()> {
        let timeout = self.timeout();
        let link = self
            .ui
            .require_visible(&self.config.locators.resend_code, timeout)?;
        self.ui.click(&link)?;
        tracing::info!("one-time code resent");
        Ok(())
    }

    fn submit_code(&mut self, code: &str) -> SleuthResult<()> {
        let locators = &self.config.locators;
        let timeout = self.timeout();
        let field = self.ui.require_visible(&locators.code_input, timeout)?;
        self.ui.type_text(&field, code)?;
        let button = self.ui.require_visible(&locators.verify_code, timeout)?;
        self.ui.click(&button)
    }

    fn confirm_accepted(&mut self) -> SleuthResult<bool> {
        let locators = &self.config.locators;
        let budget = AttemptBudget::fixed(u32::MAX, CONFIRM_INTERVAL)?;
        let timeout = Duration::from_secs(self.config.otp.confirm_timeout_secs);
        let ui = &mut *self.ui;

        let outcome = self.poller.poll(
            || {
                if ui.find(&locators.code_rejected)?.is_some() {
                    return Ok(Observation::Satisfied(false));
                }
                let accepted = ui.find(&locators.signed_in)?.is_some()
                    || ui.find(&locators.first_name_input)?.is_some();
                Ok(Observation::from_bool(accepted, accepted))
            },
            &budget,
            Some(timeout),
            &self.cancel,
        )?;
        Ok(outcome.into_satisfied().unwrap_or(false))
    }
}

/// Poll `mailbox` until a message from `sender` with an allowed subject,
/// received at or after `since`, shows up. Returns the newest one.
///
/// # Errors
///
/// Returns `ObservationFailed` when every search failed
pub fn await_message<M: MailboxSearchClient + ?Sized>(
    poller: &BoundedPoller,
    mailbox: &mut M,
    sender: &str,
    subjects: &SubjectAllowList,
    since: DateTime<Utc>,
    budget: &AttemptBudget,
    cancel: &CancellationToken,
) -> SleuthResult<Option<CandidateMessage>> {
    let outcome = poller.poll(
        || {
            let newest = mailbox
                .search(sender, subjects, since)?
                .into_iter()
                .max_by_key(|m| m.received_at);
            Ok(Observation::from_bool(newest.is_some(), newest))
        },
        budget,
        None,
        cancel,
    )?;
    Ok(outcome.into_satisfied().flatten())
}

fn factor_label(factor: &str) -> Locator {
    Locator::xpath(format!(
        "//label[normalize-space()={}]",
        xpath_literal(factor)
    ))
}

/// Runs the whole workflow against one UI session and one mailbox
#[derive(Debug)]
pub struct Scenario<'c> {
    config: &'c RunConfig,
    clock: SharedClock,
    cancel: CancellationToken,
}

impl<'c> Scenario<'c> {
    /// Create a scenario
    #[must_use]
    pub fn new(config: &'c RunConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop all waits when `cancel` fires
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn poller(&self) -> BoundedPoller {
        BoundedPoller::new(self.clock.clone())
    }

    fn timeout(&self) -> Duration {
        self.config.app.element_timeout()
    }

    /// Run every stage, then clean up. The UI session is closed on every
    /// path; a failing close is recorded and never changes the outcome.
    pub fn run<D, M>(&self, session: &mut UiSession<D>, mailbox: &mut M) -> RunReport
    where
        D: UiDriver,
        M: MailboxSearchClient + ?Sized,
    {
        let recorder = ScreenshotRecorder::new(&self.config.screenshots.dir, self.clock.clone());
        let mut orch = WorkflowOrchestrator::new(self.clock.clone())
            .with_policies(&self.config.stages)
            .with_screenshots(recorder.clone(), self.config.screenshots.on_success);

        if let Err(err) = self.stages(&mut orch, &mut **session, mailbox) {
            tracing::error!(error = %err, "workflow aborted");
        }

        let status = if orch.report().succeeded() {
            ShotStatus::Success
        } else {
            ShotStatus::Failure
        };
        orch.finish(|| {
            recorder.capture(&mut **session, status, "final_state");
            session.close()
        })
    }

    fn stages<U, M>(
        &self,
        orch: &mut WorkflowOrchestrator,
        ui: &mut U,
        mailbox: &mut M,
    ) -> SleuthResult<()>
    where
        U: UiDriver + ?Sized,
        M: MailboxSearchClient + ?Sized,
    {
        let app = &self.config.app;
        let mut tracker = DownloadTracker::new(&app.download_dir, &app.download_extension);
        match tracker.snapshot() {
            Ok(existing) => {
                tracing::debug!(existing, dir = %app.download_dir.display(), "download dir snapshot");
            }
            Err(err) => tracing::warn!(error = %err, "cannot list download dir"),
        }

        let login = orch.stage(ui, "sign_in", StagePolicy::FailHard, |ui| {
            self.sign_in(ui, mailbox)?.into_result("sign_in")
        })?;

        match &login {
            Some(LoginOutcome::SuccessWithSignup { first_name }) if self.config.welcome.enabled => {
                orch.stage(ui, "welcome_email", StagePolicy::FailSoft, |_| {
                    self.welcome_email(mailbox, first_name)
                })?;
            }
            Some(LoginOutcome::SuccessWithSignup { .. }) => {
                orch.skip("welcome_email", StagePolicy::FailSoft, "disabled");
            }
            _ => orch.skip("welcome_email", StagePolicy::FailSoft, "existing account"),
        }

        orch.stage(ui, "verify_login", StagePolicy::FailHard, |ui| {
            ui.require_visible(&self.config.locators.signed_in, self.timeout())
                .map(|_| ())
                .map_err(|_| SleuthError::stage("verify_login", "signed-in marker not shown"))
        })?;

        for factor in &app.factors {
            self.factor(orch, ui, mailbox, &mut tracker, factor)?;
        }

        orch.stage(ui, "logout", StagePolicy::FailSoft, |ui| self.logout(ui))?;
        Ok(())
    }

    fn factor<U, M>(
        &self,
        orch: &mut WorkflowOrchestrator,
        ui: &mut U,
        mailbox: &mut M,
        tracker: &mut DownloadTracker,
        factor: &str,
    ) -> SleuthResult<()>
    where
        U: UiDriver + ?Sized,
        M: MailboxSearchClient + ?Sized,
    {
        let name = |stage: &str| format!("{stage}:{factor}");
        tracing::info!(factor, "starting factor");

        orch.stage(ui, &name("select_factor"), StagePolicy::FailHard, |ui| {
            self.select_factor(ui, factor)
        })?;
        orch.stage(ui, &name("upload"), StagePolicy::FailHard, |ui| self.upload(ui))?;
        let submitted_at = self.clock.now();
        orch.stage(ui, &name("submit"), StagePolicy::FailHard, |ui| {
            let button = ui.require_visible(&self.config.locators.submit, self.timeout())?;
            ui.click(&button)
        })?;
        orch.stage(ui, &name("await_completion"), StagePolicy::FailHard, |ui| {
            self.await_completion(ui)
        })?;
        orch.stage(ui, &name("error_banners"), StagePolicy::FailSoft, |ui| {
            self.error_banners(ui)
        })?;

        let mut first: Option<Artifact> = None;
        orch.stage(ui, &name("reconcile"), StagePolicy::FailSoft, |ui| {
            self.reconcile(ui, tracker, &mut first)
        })?;

        if let Some(first) = first {
            orch.stage(ui, &name("download_idempotency"), StagePolicy::FailSoft, |ui| {
                self.download_again(ui, tracker, &first)
            })?;
        } else {
            orch.skip(
                &name("download_idempotency"),
                StagePolicy::FailSoft,
                "no first download to compare",
            );
        }

        if self.config.completion_email.enabled {
            orch.stage(ui, &name("completion_email"), StagePolicy::FailSoft, |_| {
                self.completion_email(mailbox, factor, submitted_at)
            })?;
        } else {
            orch.skip(&name("completion_email"), StagePolicy::FailSoft, "disabled");
        }
        Ok(())
    }

    /// Navigate, settle, exchange a code and finish sign-up when the account
    /// is new
    ///
    /// # Errors
    ///
    /// Returns driver and configuration errors; a failed code exchange is a
    /// [`LoginOutcome::Failure`]
    pub fn sign_in<U, M>(&self, ui: &mut U, mailbox: &mut M) -> SleuthResult<LoginOutcome>
    where
        U: UiDriver + ?Sized,
        M: MailboxSearchClient + ?Sized,
    {
        ui.navigate(&self.config.app.login_url)?;
        self.settle(ui)?;

        let mut engine = OneTimeCodeEngine::new(self.poller(), self.config.otp_settings()?);
        let report = {
            let mut page =
                PageSignIn::new(ui, self.config, self.poller()).with_cancel(self.cancel.clone());
            engine.run(&mut page, mailbox, &self.cancel)
        };
        tracing::info!(
            cycles = report.cycles,
            search_calls = report.search_calls,
            verified = report.verified(),
            "one-time code exchange finished"
        );
        if let OtpOutcome::Failed { reason } = report.outcome {
            return Ok(LoginOutcome::Failure { reason });
        }

        let locators = &self.config.locators;
        let Some(field) = ui.find(&locators.first_name_input)? else {
            return Ok(LoginOutcome::Success);
        };
        let first_name = self.config.app.first_name.clone();
        tracing::info!(first_name = %first_name, "new account, completing sign-up");
        ui.type_text(&field, &first_name)?;
        let submit = ui.require_visible(&locators.signup_submit, self.timeout())?;
        ui.click(&submit)?;
        Ok(LoginOutcome::SuccessWithSignup { first_name })
    }

    fn settle<U: UiDriver + ?Sized>(&self, ui: &mut U) -> SleuthResult<()> {
        let completion = &self.config.completion;
        let status = TaskCompletionWatcher::new(
            self.poller().with_label("page_load"),
            self.config.locators.page_loading.clone(),
            completion.interval(),
        )
        .settle(
            ui,
            Duration::from_secs(completion.settle_appear_secs),
            Duration::from_secs(completion.settle_max_wait_secs),
            &self.cancel,
        )?;
        if status.indicator_cleared {
            Ok(())
        } else {
            Err(SleuthError::stage(
                "page_load",
                format!(
                    "page still loading after {}s",
                    completion.settle_max_wait_secs
                ),
            ))
        }
    }

    /// Open `toggle` unless `target` is already visible
    fn expand<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        toggle: &Locator,
        target: &Locator,
    ) -> SleuthResult<Element> {
        if let Some(element) = ui.wait_for(target, WaitState::Visible, EXPANDED_PROBE)? {
            return Ok(element);
        }
        tracing::debug!(%toggle, "expanding section");
        let button = ui.require_visible(toggle, self.timeout())?;
        ui.click(&button)?;
        ui.require_visible(target, self.timeout())
    }

    fn select_factor<U: UiDriver + ?Sized>(&self, ui: &mut U, factor: &str) -> SleuthResult<()> {
        let label = self.expand(ui, &self.config.locators.factors_toggle, &factor_label(factor))?;
        ui.click(&label)?;
        tracing::info!(factor, "factor selected");
        Ok(())
    }

    fn upload<U: UiDriver + ?Sized>(&self, ui: &mut U) -> SleuthResult<()> {
        let file = self
            .config
            .app
            .upload_file
            .as_deref()
            .ok_or_else(|| SleuthError::config("app.upload_file is not set"))?;
        let path = upload_path(file)?;
        let input = ui
            .wait_for(&self.config.locators.file_input, WaitState::Present, self.timeout())?
            .ok_or_else(|| SleuthError::not_found(&self.config.locators.file_input))?;
        ui.set_files(&input, std::slice::from_ref(&path))?;
        tracing::info!(file = %path.display(), "file attached");
        Ok(())
    }

    fn await_completion<U: UiDriver + ?Sized>(&self, ui: &mut U) -> SleuthResult<CompletionStatus> {
        let completion = &self.config.completion;
        let locators = &self.config.locators;
        let status = TaskCompletionWatcher::new(
            self.poller(),
            locators.busy_indicator.clone(),
            completion.interval(),
        )
        .with_message(locators.status_message.clone())
        .settle(
            ui,
            Duration::from_secs(completion.settle_appear_secs),
            completion.max_wait(),
            &self.cancel,
        )?;

        if !status.indicator_cleared {
            return Err(SleuthError::stage(
                "await_completion",
                format!(
                    "analysis still running after {}s (last status: {})",
                    completion.max_wait_secs,
                    status.last_message.as_deref().unwrap_or("none")
                ),
            ));
        }
        tracing::info!(last = ?status.last_message, attempts = status.attempts, "analysis finished");
        Ok(status)
    }

    fn error_banners<U: UiDriver + ?Sized>(&self, ui: &mut U) -> SleuthResult<()> {
        for banner in &self.config.locators.error_banners {
            if let Some(element) = ui.find(banner)? {
                let text = ui
                    .read_text(&element)
                    .map(|t| t.trim().to_string())
                    .unwrap_or_else(|_| banner.to_string());
                return Err(SleuthError::stage("error_banners", text));
            }
        }
        Ok(())
    }

    fn download<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        tracker: &mut DownloadTracker,
    ) -> SleuthResult<Artifact> {
        let app = &self.config.app;
        let button = ui.require_visible(&self.config.locators.download, self.timeout())?;
        ui.click(&button)?;

        let store = ArtifactStore::new(self.poller());
        let artifact = store
            .next_download(tracker, app.download_timeout(), &self.cancel)?
            .ok_or_else(|| {
                SleuthError::stage(
                    "download",
                    format!(
                        "no new .{} file in {} after {}s",
                        app.download_extension,
                        app.download_dir.display(),
                        app.download_timeout_secs
                    ),
                )
            })?;
        artifact::ensure_non_empty(&artifact)?;
        tracing::info!(file = %artifact.path.display(), size = artifact.size, "downloaded");
        Ok(artifact)
    }

    fn reconcile<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        tracker: &mut DownloadTracker,
        first: &mut Option<Artifact>,
    ) -> SleuthResult<Tally> {
        let observed = ui_tally(ui, &self.config.reconcile.ui_cells)?;
        let artifact = self.download(ui, tracker)?;
        let content = artifact::read(&artifact.path)?;
        *first = Some(artifact);

        let reference = self.config.reconcile.artifact.extract(&content)?;
        let mismatches = reconcile(&observed, &reference);
        if mismatches.is_empty() {
            tracing::info!(total = observed.total(), "tallies agree");
            return Ok(observed);
        }
        for m in &mismatches {
            tracing::warn!(key = %m.key, observed = m.observed_count, reference = m.reference_count, "tally mismatch");
        }
        let summary: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
        Err(SleuthError::stage("reconcile", summary.join(", ")))
    }

    fn download_again<U: UiDriver + ?Sized>(
        &self,
        ui: &mut U,
        tracker: &mut DownloadTracker,
        first: &Artifact,
    ) -> SleuthResult<ContentComparison> {
        let locators = &self.config.locators;
        let entry = self.expand(ui, &locators.history_toggle, &locators.history_latest)?;
        ui.click(&entry)?;
        self.settle(ui)?;

        let second = self.download(ui, tracker)?;
        let comparison = compare_content(
            &artifact::read(&first.path)?,
            &artifact::read(&second.path)?,
        );
        if comparison.equal {
            tracing::info!(digest = %comparison.first_digest, "downloads match");
            Ok(comparison)
        } else {
            Err(SleuthError::stage(
                "download_idempotency",
                format!(
                    "{} and {} differ (sha256 {} vs {})",
                    first.name, second.name, comparison.first_digest, comparison.second_digest
                ),
            ))
        }
    }

    fn welcome_email<M: MailboxSearchClient + ?Sized>(
        &self,
        mailbox: &mut M,
        first_name: &str,
    ) -> SleuthResult<CandidateMessage> {
        let check = &self.config.welcome;
        let subjects = check.allow_list(&[("first_name", first_name)])?;
        let lookback =
            chrono::Duration::from_std(check.lookback()).unwrap_or_else(|_| chrono::Duration::zero());
        let since = self.clock.now() - lookback;
        self.expect_message("welcome_email", mailbox, &subjects, since, &check.budget.to_budget()?)
    }

    fn completion_email<M: MailboxSearchClient + ?Sized>(
        &self,
        mailbox: &mut M,
        factor: &str,
        submitted_at: DateTime<Utc>,
    ) -> SleuthResult<CandidateMessage> {
        let check = &self.config.completion_email;
        let subjects = check.allow_list(&[("factor", factor)])?;
        self.expect_message(
            "completion_email",
            mailbox,
            &subjects,
            submitted_at,
            &check.budget.to_budget()?,
        )
    }

    fn expect_message<M: MailboxSearchClient + ?Sized>(
        &self,
        stage: &str,
        mailbox: &mut M,
        subjects: &SubjectAllowList,
        since: DateTime<Utc>,
        budget: &AttemptBudget,
    ) -> SleuthResult<CandidateMessage> {
        let sender = &self.config.mail.sender;
        let poller = self.poller().with_label(stage);
        match await_message(&poller, mailbox, sender, subjects, since, budget, &self.cancel)? {
            Some(message) => {
                tracing::info!(stage, subject = %message.subject, received_at = %message.received_at, "email found");
                Ok(message)
            }
            None => Err(SleuthError::stage(
                stage,
                format!("no matching email from {sender} since {since}"),
            )),
        }
    }

    fn logout<U: UiDriver + ?Sized>(&self, ui: &mut U) -> SleuthResult<()> {
        let locators = &self.config.locators;
        let timeout = self.timeout();
        let menu = ui.require_visible(&locators.logout_menu, timeout)?;
        ui.click(&menu)?;
        let button = ui.require_visible(&locators.logout, timeout)?;
        ui.click(&button)?;

        if ui
            .wait_for(&locators.logged_out, WaitState::Present, timeout)?
            .is_none()
        {
            return Err(SleuthError::stage("logout", "logout confirmation not shown"));
        }
        let cookie = &self.config.app.session_cookie;
        if ui.read_cookie(cookie)?.is_some() {
            return Err(SleuthError::stage(
                "logout",
                format!("session cookie '{cookie}' still present"),
            ));
        }
        tracing::info!("logged out, session cleared");
        Ok(())
    }
}
