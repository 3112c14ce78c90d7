//! Run configuration.
//!
//! A YAML file describes the application under test, the mailbox, every
//! budget and every locator. Secrets never live in the file: the account
//! address and app password come from `SLEUTH_EMAIL_ADDRESS` and
//! `SLEUTH_APP_PASSWORD`.
//!
//! ```yaml
//! app:
//!   login_url: https://app.example.com/login
//!   upload_file: samples/vulnerable.py
//!   factors: ["Power Analysis"]
//! mail:
//!   sender: no-reply@example.com
//! otp:
//!   subjects:
//!     - contains: verification code
//! stages:
//!   reconcile: fail_hard
//! ```

use crate::backoff::BudgetConfig;
use crate::driver::Locator;
use crate::mailbox::{SubjectAllowList, SubjectPattern};
use crate::otp::{OtpSettings, DEFAULT_CYCLES};
use crate::reconcile::ArtifactTallyRule;
use crate::result::{SleuthError, SleuthResult};
use crate::workflow::StagePolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the mailbox address
pub const EMAIL_ENV: &str = "SLEUTH_EMAIL_ADDRESS";

/// Environment variable holding the mailbox app password
pub const PASSWORD_ENV: &str = "SLEUTH_APP_PASSWORD";

/// Parse YAML where enums are written as single-key maps
/// (`css: "#otp"`, `- contains: code`) rather than `!tag` values.
///
/// # Errors
///
/// Returns [`SleuthError::Yaml`] on malformed input
pub fn from_yaml_str<T: DeserializeOwned>(yaml: &str) -> SleuthResult<T> {
    let de = serde_yaml_ng::Deserializer::from_str(yaml);
    Ok(serde_yaml_ng::with::singleton_map_recursive::deserialize(de)?)
}

/// Serialize to YAML in the same single-key-map enum form
/// [`from_yaml_str`] reads.
///
/// # Errors
///
/// Returns [`SleuthError::Yaml`] when the value cannot be serialized
pub fn to_yaml_string<T: Serialize>(value: &T) -> SleuthResult<String> {
    let mut buf = Vec::new();
    {
        let mut ser = serde_yaml_ng::Serializer::new(&mut buf);
        serde_yaml_ng::with::singleton_map_recursive::serialize(value, &mut ser)?;
    }
    String::from_utf8(buf).map_err(|e| SleuthError::config(format!("yaml output: {e}")))
}

/// Full run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Application under test
    pub app: AppConfig,
    /// Mailbox access
    pub mail: MailConfig,
    /// One-time-code exchange
    pub otp: OtpConfig,
    /// Welcome email after sign-up
    pub welcome: MailCheckConfig,
    /// Email sent when an analysis finishes
    pub completion_email: MailCheckConfig,
    /// Waiting for analysis to finish
    pub completion: CompletionConfig,
    /// Result reconciliation
    pub reconcile: ReconcileConfig,
    /// Named UI locators
    pub locators: Locators,
    /// Screenshot capture
    pub screenshots: ScreenshotConfig,
    /// Policy overrides by stage name
    pub stages: BTreeMap<String, StagePolicy>,
}

/// Application under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sign-in page
    pub login_url: String,
    /// File submitted for analysis
    pub upload_file: Option<PathBuf>,
    /// Where the browser saves downloads
    pub download_dir: PathBuf,
    /// Extension of the downloaded result
    pub download_extension: String,
    /// How long a download may take, in seconds
    pub download_timeout_secs: u64,
    /// Analysis factors to run, in order
    pub factors: Vec<String>,
    /// First name entered when the account has to be created
    pub first_name: String,
    /// Cookie that carries the session
    pub session_cookie: String,
    /// How long a UI element may take to show up, in seconds
    pub element_timeout_secs: u64,
    /// Browser launch options
    pub browser: BrowserConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            login_url: String::new(),
            upload_file: None,
            download_dir: PathBuf::from("downloads"),
            download_extension: "html".to_string(),
            download_timeout_secs: 30,
            factors: vec!["Power Analysis".to_string()],
            first_name: "Tester".to_string(),
            session_cookie: "session".to_string(),
            element_timeout_secs: 10,
            browser: BrowserConfig::default(),
        }
    }
}

impl AppConfig {
    /// Element wait
    #[must_use]
    pub const fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    /// Download wait
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Browser launch options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run without a window
    pub headless: bool,
    /// Chrome/Chromium binary, auto-detected when unset
    pub executable: Option<PathBuf>,
    /// Per-command timeout in seconds
    pub command_timeout_secs: u64,
    /// Viewport width
    pub width: u32,
    /// Viewport height
    pub height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            command_timeout_secs: 30,
            width: 1440,
            height: 900,
        }
    }
}

/// Mailbox access. The password is never read from or written to the file.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// IMAP host
    pub host: String,
    /// IMAP port (implicit TLS)
    pub port: u16,
    /// Mailbox to select
    pub mailbox: String,
    /// Account address, usually from the environment
    pub address: String,
    /// App password, only from the environment
    #[serde(skip)]
    pub password: String,
    /// Address the application sends from
    pub sender: String,
    /// Socket timeout in seconds
    pub io_timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: "imap.gmail.com".to_string(),
            port: 993,
            mailbox: "INBOX".to_string(),
            address: String::new(),
            password: String::new(),
            sender: String::new(),
            io_timeout_secs: 20,
        }
    }
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("mailbox", &self.mailbox)
            .field("address", &self.address)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("sender", &self.sender)
            .field("io_timeout_secs", &self.io_timeout_secs)
            .finish()
    }
}

#[cfg(feature = "imap")]
impl MailConfig {
    /// IMAP session settings
    #[must_use]
    pub fn imap_settings(&self) -> crate::mailbox::imap::ImapSettings {
        crate::mailbox::imap::ImapSettings {
            host: self.host.clone(),
            port: self.port,
            username: self.address.clone(),
            password: self.password.clone(),
            mailbox: self.mailbox.clone(),
            io_timeout_secs: self.io_timeout_secs,
        }
    }
}

/// One-time-code exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Digits per code
    pub code_length: usize,
    /// Subjects that may carry a code; empty accepts any
    pub subjects: Vec<SubjectPattern>,
    /// Request/resend cycles
    pub cycles: u32,
    /// Mailbox poll schedule per window
    pub window: BudgetConfig,
    /// Hard limit per window in seconds
    pub window_timeout_secs: Option<u64>,
    /// Wait for the UI to confirm a submitted code, in seconds
    pub confirm_timeout_secs: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            subjects: Vec::new(),
            cycles: DEFAULT_CYCLES,
            window: BudgetConfig::fixed(6, 10_000),
            window_timeout_secs: None,
            confirm_timeout_secs: 15,
        }
    }
}

/// A bounded "did this email arrive" check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailCheckConfig {
    /// Skip the check
    pub enabled: bool,
    /// Subject templates; `{first_name}` and `{factor}` are filled in
    pub subjects: Vec<SubjectPattern>,
    /// Poll schedule
    pub budget: BudgetConfig,
    /// How far back a message may have arrived, in seconds
    pub lookback_secs: u64,
}

impl Default for MailCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subjects: Vec::new(),
            budget: BudgetConfig::fixed(3, 10_000),
            lookback_secs: 300,
        }
    }
}

impl MailCheckConfig {
    /// Welcome email defaults
    #[must_use]
    pub fn welcome() -> Self {
        Self {
            subjects: vec![
                SubjectPattern::Contains("Welcome, {first_name}".to_string()),
                SubjectPattern::Contains("Welcome to CodeSherlock".to_string()),
                SubjectPattern::Contains("Verify Your CodeSherlock Account".to_string()),
            ],
            ..Self::default()
        }
    }

    /// Analysis-completion email defaults
    #[must_use]
    pub fn completion() -> Self {
        Self {
            subjects: vec![SubjectPattern::Contains(
                "Tell us what you think of {factor} analysis".to_string(),
            )],
            ..Self::default()
        }
    }

    /// Allow-list with placeholders filled in
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Config`] on an invalid regex
    pub fn allow_list(&self, vars: &[(&str, &str)]) -> SleuthResult<SubjectAllowList> {
        let rendered: Vec<SubjectPattern> =
            self.subjects.iter().map(|p| p.render(vars)).collect();
        SubjectAllowList::new(&rendered)
    }

    /// Lookback window
    #[must_use]
    pub const fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }
}

/// Waiting for server-side analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Upper bound for one analysis, in seconds
    pub max_wait_secs: u64,
    /// Poll interval in milliseconds
    pub interval_ms: u64,
    /// How long a page-load indicator gets to appear, in seconds
    pub settle_appear_secs: u64,
    /// How long a page-load indicator may stay, in seconds
    pub settle_max_wait_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 600,
            interval_ms: 1_000,
            settle_appear_secs: 5,
            settle_max_wait_secs: 30,
        }
    }
}

impl CompletionConfig {
    /// Analysis upper bound
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    /// Poll interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Result reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// One cell per result row; its text is the tally key
    pub ui_cells: Locator,
    /// How the downloaded artifact is tallied
    pub artifact: ArtifactTallyRule,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            ui_cells: Locator::xpath("//table[@class='custom-table']/tbody/tr/td[2]"),
            artifact: ArtifactTallyRule::Table {
                selector: "table.custom-table".to_string(),
                column: 1,
            },
        }
    }
}

/// Screenshot capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    /// Root directory
    pub dir: PathBuf,
    /// Also capture passed stages
    pub on_success: bool,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("screenshots"),
            on_success: true,
        }
    }
}

/// Every element the workflow touches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Locators {
    /// Page-load indicator
    pub page_loading: Locator,
    /// Email field on the sign-in form
    pub email_input: Locator,
    /// Button that sends the code
    pub request_code: Locator,
    /// Code field
    pub code_input: Locator,
    /// Button that submits the code
    pub verify_code: Locator,
    /// Resend link
    pub resend_code: Locator,
    /// Shown when a code is rejected
    pub code_rejected: Locator,
    /// First-name field, present only for new accounts
    pub first_name_input: Locator,
    /// Submits the sign-up form
    pub signup_submit: Locator,
    /// Present once signed in
    pub signed_in: Locator,
    /// Factor dropdown toggle
    pub factors_toggle: Locator,
    /// File input
    pub file_input: Locator,
    /// Submit button for the analysis
    pub submit: Locator,
    /// Busy indicator while analysing
    pub busy_indicator: Locator,
    /// Status line next to the busy indicator
    pub status_message: Locator,
    /// Banners that mean the analysis was refused
    pub error_banners: Vec<Locator>,
    /// Result download button
    pub download: Locator,
    /// History section toggle
    pub history_toggle: Locator,
    /// Newest history entry
    pub history_latest: Locator,
    /// Opens the account menu
    pub logout_menu: Locator,
    /// Log-out entry
    pub logout: Locator,
    /// Confirmation after logging out
    pub logged_out: Locator,
}

impl Default for Locators {
    fn default() -> Self {
        Self {
            page_loading: Locator::xpath(
                "//p[contains(text(), 'Please wait while we load the content for you.')]",
            ),
            email_input: Locator::css("input[type='email']"),
            request_code: Locator::xpath("//button[contains(., 'Continue')]"),
            code_input: Locator::css("input[autocomplete='one-time-code']"),
            verify_code: Locator::xpath("//button[contains(., 'Verify')]"),
            resend_code: Locator::xpath("//*[contains(text(), 'Resend')]"),
            code_rejected: Locator::xpath("//*[contains(text(), 'Invalid OTP')]"),
            first_name_input: Locator::css("input[name='firstName']"),
            signup_submit: Locator::xpath("//button[contains(., 'Sign Up')]"),
            signed_in: Locator::xpath("//div[text()='Factors']"),
            factors_toggle: Locator::xpath(
                "//div[contains(@class, 'cursor-pointer') and .//div[text()='Factors']]",
            ),
            file_input: Locator::xpath("//input[@type='file']"),
            submit: Locator::xpath("//img[contains(@alt,'Submit')]"),
            busy_indicator: Locator::xpath(
                "//span[@class='loading spinner spinner-container text-white loading-md']",
            ),
            status_message: Locator::xpath("//div[contains(@class, 'p-4 rounded-[10px] border')]//p"),
            error_banners: vec![
                Locator::xpath("//div[contains(text(), 'This file format is not supported')]"),
                Locator::xpath("//div[contains(text(), 'The code snippet is too small')]"),
            ],
            download: Locator::xpath("//div[span[text()='Download HTML']]/button"),
            history_toggle: Locator::xpath(
                "//div[contains(@class, 'cursor-pointer') and .//div[text()='History']]",
            ),
            history_latest: Locator::xpath(
                "(//div[contains(@class, 'flex flex-col item-start gap-4')]/a)[1]",
            ),
            logout_menu: Locator::xpath(
                "//div[contains(@class, 'text-xl font-bold text-center cursor-pointer')]",
            ),
            logout: Locator::xpath(
                "//span[contains(@class, 'text-text_black') and contains(text(), 'Log Out')]",
            ),
            logged_out: Locator::xpath("//*[contains(text(), 'Logged out successfully!')]"),
        }
    }
}

impl RunConfig {
    /// Defaults with the welcome and completion subject templates
    #[must_use]
    pub fn new() -> Self {
        Self {
            welcome: MailCheckConfig::welcome(),
            completion_email: MailCheckConfig::completion(),
            ..Self::default()
        }
    }

    /// Parse YAML. Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Yaml`] on malformed input
    pub fn from_yaml(yaml: &str) -> SleuthResult<Self> {
        let mut config: Self = from_yaml_str(yaml)?;
        if config.welcome.subjects.is_empty() {
            config.welcome.subjects = MailCheckConfig::welcome().subjects;
        }
        if config.completion_email.subjects.is_empty() {
            config.completion_email.subjects = MailCheckConfig::completion().subjects;
        }
        Ok(config)
    }

    /// Render as YAML. The password is never serialized.
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Yaml`] when serialization fails
    pub fn to_yaml(&self) -> SleuthResult<String> {
        to_yaml_string(self)
    }

    /// Read a YAML file and apply the environment
    ///
    /// # Errors
    ///
    /// Returns IO or YAML errors
    pub fn load(path: &Path) -> SleuthResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SleuthError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Fill credentials from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Fill credentials from a lookup function. The address from the
    /// environment wins over the file.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(EMAIL_ENV).filter(|v| !v.trim().is_empty()) {
            self.mail.address = address.trim().to_string();
        }
        if let Some(password) = lookup(PASSWORD_ENV).filter(|v| !v.is_empty()) {
            self.mail.password = password;
        }
    }

    /// Check everything a full run needs; all problems are reported at once.
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Config`] listing the problems
    pub fn validate(&self) -> SleuthResult<()> {
        let mut problems = self.mail_problems();

        if self.app.login_url.trim().is_empty() {
            problems.push("app.login_url is required".to_string());
        }
        match &self.app.upload_file {
            None => problems.push("app.upload_file is required".to_string()),
            Some(path) if !path.is_file() => {
                problems.push(format!("app.upload_file {} does not exist", path.display()));
            }
            Some(_) => {}
        }
        if self.app.factors.is_empty() {
            problems.push("app.factors must name at least one factor".to_string());
        }
        if let Err(e) = self.otp_settings() {
            problems.push(format!("otp: {e}"));
        }
        for (name, check) in [
            ("welcome", &self.welcome),
            ("completion_email", &self.completion_email),
        ] {
            if let Err(e) = check.budget.to_budget() {
                problems.push(format!("{name}.budget: {e}"));
            }
            if let Err(e) = check.allow_list(&[]) {
                problems.push(format!("{name}.subjects: {e}"));
            }
        }
        if self.completion.interval_ms == 0 {
            problems.push("completion.interval_ms must be positive".to_string());
        }

        Self::report(problems)
    }

    /// Check only what mailbox access needs
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Config`] listing the problems
    pub fn validate_mail(&self) -> SleuthResult<()> {
        Self::report(self.mail_problems())
    }

    fn mail_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.mail.address.is_empty() {
            problems.push(format!("mailbox address missing (set {EMAIL_ENV})"));
        }
        if self.mail.password.is_empty() {
            problems.push(format!("mailbox password missing (set {PASSWORD_ENV})"));
        }
        if self.mail.sender.trim().is_empty() {
            problems.push("mail.sender is required".to_string());
        }
        if self.mail.host.trim().is_empty() {
            problems.push("mail.host is required".to_string());
        }
        problems
    }

    fn report(problems: Vec<String>) -> SleuthResult<()> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(SleuthError::config(problems.join("; ")))
        }
    }

    /// Engine settings for the code exchange
    ///
    /// # Errors
    ///
    /// Returns error on an invalid code length, budget or subject pattern
    pub fn otp_settings(&self) -> SleuthResult<OtpSettings> {
        let subjects = SubjectAllowList::new(&self.otp.subjects)?;
        Ok(OtpSettings::new(self.mail.sender.clone(), subjects)?
            .with_code_length(self.otp.code_length)?
            .with_cycles(self.otp.cycles)
            .with_window_budget(self.otp.window.to_budget()?)
            .with_window_timeout(self.otp.window_timeout_secs.map(Duration::from_secs)))
    }

    /// Effective policy for a stage
    #[must_use]
    pub fn stage_policy(&self, stage: &str, default: StagePolicy) -> StagePolicy {
        self.stages.get(stage).copied().unwrap_or(default)
    }
}
