//! UiDriver - narrow browser-session trait
//!
//! The workflow only needs a handful of capabilities from a browser session:
//! navigate, locate, click, type, read, wait, screenshot, cookies. Anything
//! that can provide those implements [`UiDriver`]: the CDP adapter in
//! `chromium` (feature `browser`) or [`MockUi`] for tests.

use crate::result::{SleuthError, SleuthResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to find an element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    /// CSS selector
    Css(String),
    /// XPath expression
    #[serde(rename = "xpath")]
    XPath(String),
    /// Element whose visible text contains the string
    Text(String),
}

impl Locator {
    /// CSS selector locator
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// XPath locator
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Text-content locator
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Equivalent XPath expression
    #[must_use]
    pub fn to_xpath(&self) -> Option<String> {
        match self {
            Self::Css(_) => None,
            Self::XPath(x) => Some(x.clone()),
            Self::Text(t) => Some(format!(
                "//*[contains(normalize-space(.), {})][not(*[contains(normalize-space(.), {})])]",
                xpath_literal(t),
                xpath_literal(t)
            )),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
            Self::Text(s) => write!(f, "text={s}"),
        }
    }
}

/// Quote a string as an XPath literal
pub(crate) fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Handle to a located element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Driver-assigned identifier
    pub id: String,
    /// Locator that produced this handle
    pub locator: Locator,
}

impl Element {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, locator: Locator) -> Self {
        Self {
            id: id.into(),
            locator,
        }
    }
}

/// State to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    /// Attached to the DOM
    Present,
    /// Attached and rendered
    Visible,
}

/// Browser session capabilities used by the workflow.
///
/// `find` returns `Ok(None)` when nothing matches; errors mean the session
/// itself failed.
pub trait UiDriver {
    /// Navigate to URL
    fn navigate(&mut self, url: &str) -> SleuthResult<()>;

    /// First element matching the locator
    fn find(&mut self, locator: &Locator) -> SleuthResult<Option<Element>>;

    /// All elements matching the locator, document order
    fn find_all(&mut self, locator: &Locator) -> SleuthResult<Vec<Element>>;

    /// Click an element
    fn click(&mut self, element: &Element) -> SleuthResult<()>;

    /// Type text into an element
    fn type_text(&mut self, element: &Element, text: &str) -> SleuthResult<()>;

    /// Attach files to a file input
    fn set_files(&mut self, element: &Element, paths: &[PathBuf]) -> SleuthResult<()>;

    /// Visible text of an element
    fn read_text(&mut self, element: &Element) -> SleuthResult<String>;

    /// Attribute value
    fn attribute(&mut self, element: &Element, name: &str) -> SleuthResult<Option<String>>;

    /// Wait until the locator reaches `state`, up to `timeout`.
    /// `Ok(None)` means the timeout passed first.
    fn wait_for(
        &mut self,
        locator: &Locator,
        state: WaitState,
        timeout: Duration,
    ) -> SleuthResult<Option<Element>>;

    /// Cookie value by name
    fn read_cookie(&mut self, name: &str) -> SleuthResult<Option<String>>;

    /// PNG screenshot of the current page
    fn screenshot(&mut self) -> SleuthResult<Vec<u8>>;

    /// End the session
    fn quit(&mut self) -> SleuthResult<()>;

    /// Find or fail with `ElementNotFound`
    fn require(&mut self, locator: &Locator) -> SleuthResult<Element> {
        self.find(locator)?
            .ok_or_else(|| SleuthError::not_found(locator))
    }

    /// Wait until visible or fail with `ElementNotFound`
    fn require_visible(&mut self, locator: &Locator, timeout: Duration) -> SleuthResult<Element> {
        self.wait_for(locator, WaitState::Visible, timeout)?
            .ok_or_else(|| SleuthError::not_found(locator))
    }

    /// Locate and click
    fn click_on(&mut self, locator: &Locator) -> SleuthResult<()> {
        let element = self.require(locator)?;
        self.click(&element)
    }

    /// Locate and type
    fn type_into(&mut self, locator: &Locator, text: &str) -> SleuthResult<()> {
        let element = self.require(locator)?;
        self.type_text(&element, text)
    }

    /// Text of the first match, `None` when absent
    fn text_of(&mut self, locator: &Locator) -> SleuthResult<Option<String>> {
        match self.find(locator)? {
            Some(element) => self.read_text(&element).map(Some),
            None => Ok(None),
        }
    }

    /// Texts of all matches
    fn texts_of(&mut self, locator: &Locator) -> SleuthResult<Vec<String>> {
        let elements = self.find_all(locator)?;
        elements.iter().map(|e| self.read_text(e)).collect()
    }
}

// ============================================================================
// MockUi
// ============================================================================

/// Scripted state of one locator in [`MockUi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockState {
    /// Present and visible, with text
    Present(String),
    /// Present but not rendered
    Hidden(String),
    /// Not in the DOM
    Absent,
    /// Lookup fails with a driver error
    Failing(String),
}

/// Side effect of clicking an element in [`MockUi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickEffect {
    /// Locator becomes present with text
    Show(Locator, String),
    /// Locator becomes absent
    Hide(Locator),
    /// Cookie set (`Some`) or removed (`None`)
    Cookie(String, Option<String>),
    /// Navigation to URL
    Navigate(String),
    /// Browser download into a directory; an existing name gets a
    /// ` (n)` suffix
    Download {
        /// Target directory
        dir: PathBuf,
        /// Suggested file name
        name: String,
        /// File contents
        contents: String,
    },
}

/// In-memory UI for unit and integration tests.
///
/// Each locator holds a queue of states. Every `find` consumes the front state
/// until one remains, which then sticks.
#[derive(Debug)]
pub struct MockUi {
    states: HashMap<Locator, VecDeque<MockState>>,
    lists: HashMap<Locator, Vec<String>>,
    attributes: HashMap<(Locator, String), String>,
    effects: HashMap<Locator, Vec<ClickEffect>>,
    texts: HashMap<String, String>,
    handles: HashMap<String, Locator>,
    cookies: HashMap<String, String>,
    typed: Vec<(Locator, String)>,
    files: Vec<(Locator, Vec<PathBuf>)>,
    screenshot_data: Option<Vec<u8>>,
    next_id: u64,
    /// Current URL
    pub current_url: String,
    /// Call history for verification
    pub call_history: Vec<String>,
    /// Whether `quit` was called
    pub quit_called: bool,
}

/// PNG signature, the smallest payload a screenshot consumer accepts
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

impl Default for MockUi {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
            lists: HashMap::new(),
            attributes: HashMap::new(),
            effects: HashMap::new(),
            texts: HashMap::new(),
            handles: HashMap::new(),
            cookies: HashMap::new(),
            typed: Vec::new(),
            files: Vec::new(),
            screenshot_data: Some(PNG_SIGNATURE.to_vec()),
            next_id: 0,
            current_url: String::new(),
            call_history: Vec::new(),
            quit_called: false,
        }
    }
}

impl MockUi {
    /// Create new mock UI
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a locator present with text
    pub fn set_present(&mut self, locator: Locator, text: impl Into<String>) -> &mut Self {
        self.set_state(locator, MockState::Present(text.into()))
    }

    /// Make a locator absent
    pub fn set_absent(&mut self, locator: Locator) -> &mut Self {
        self.set_state(locator, MockState::Absent)
    }

    /// Replace the state queue with a single state
    pub fn set_state(&mut self, locator: Locator, state: MockState) -> &mut Self {
        self.states.insert(locator, VecDeque::from([state]));
        self
    }

    /// Queue a sequence of states, one per `find`
    pub fn script(&mut self, locator: Locator, states: Vec<MockState>) -> &mut Self {
        self.states.insert(locator, states.into());
        self
    }

    /// Texts returned by `find_all`
    pub fn set_list(&mut self, locator: Locator, texts: Vec<String>) -> &mut Self {
        self.lists.insert(locator, texts);
        self
    }

    /// Attribute value on a locator
    pub fn set_attribute(
        &mut self,
        locator: Locator,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.attributes.insert((locator, name.into()), value.into());
        self
    }

    /// Effects applied when an element from `trigger` is clicked
    pub fn on_click(&mut self, trigger: Locator, effects: Vec<ClickEffect>) -> &mut Self {
        self.effects.insert(trigger, effects);
        self
    }

    /// Set a cookie
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Screenshot payload; `None` makes `screenshot` fail
    pub fn set_screenshot(&mut self, data: Option<Vec<u8>>) -> &mut Self {
        self.screenshot_data = data;
        self
    }

    /// Text typed into a locator, in order
    #[must_use]
    pub fn typed_into(&self, locator: &Locator) -> Vec<String> {
        self.typed
            .iter()
            .filter(|(l, _)| l == locator)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Files attached to a locator, last call
    #[must_use]
    pub fn files_for(&self, locator: &Locator) -> Option<&[PathBuf]> {
        self.files
            .iter()
            .rev()
            .find(|(l, _)| l == locator)
            .map(|(_, f)| f.as_slice())
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.call_history
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.call_history.iter().any(|c| c.starts_with(method))
    }

    /// Number of calls starting with `prefix`
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.call_history
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn next_state(&mut self, locator: &Locator) -> MockState {
        match self.states.get_mut(locator) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockState::Absent),
            Some(queue) => queue.front().cloned().unwrap_or(MockState::Absent),
            None => MockState::Absent,
        }
    }

    fn issue(&mut self, locator: &Locator, text: String) -> Element {
        self.next_id += 1;
        let id = format!("mock-{}", self.next_id);
        self.texts.insert(id.clone(), text);
        self.handles.insert(id.clone(), locator.clone());
        Element::new(id, locator.clone())
    }

    fn lookup(&mut self, locator: &Locator, want_visible: bool) -> SleuthResult<Option<Element>> {
        match self.next_state(locator) {
            MockState::Present(text) => Ok(Some(self.issue(locator, text))),
            MockState::Hidden(text) if !want_visible => Ok(Some(self.issue(locator, text))),
            MockState::Hidden(_) | MockState::Absent => Ok(None),
            MockState::Failing(message) => Err(SleuthError::driver(message)),
        }
    }

    fn apply(&mut self, effect: ClickEffect) {
        match effect {
            ClickEffect::Show(locator, text) => {
                self.set_present(locator, text);
            }
            ClickEffect::Hide(locator) => {
                self.set_absent(locator);
            }
            ClickEffect::Cookie(name, Some(value)) => {
                self.cookies.insert(name, value);
            }
            ClickEffect::Cookie(name, None) => {
                self.cookies.remove(&name);
            }
            ClickEffect::Navigate(url) => self.current_url = url,
            ClickEffect::Download {
                dir,
                name,
                contents,
            } => {
                let path = download_target(&dir, &name);
                if let Err(err) = std::fs::write(&path, contents) {
                    tracing::warn!(path = %path.display(), error = %err, "mock download failed");
                }
            }
        }
    }
}

fn download_target(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if !path.exists() {
        return path;
    }
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    (1..)
        .map(|n| {
            if ext.is_empty() {
                dir.join(format!("{stem} ({n})"))
            } else {
                dir.join(format!("{stem} ({n}).{ext}"))
            }
        })
        .find(|p| !p.exists())
        .unwrap_or(path)
}

impl UiDriver for MockUi {
    fn navigate(&mut self, url: &str) -> SleuthResult<()> {
        self.call_history.push(format!("navigate:{url}"));
        self.current_url = url.to_string();
        Ok(())
    }

    fn find(&mut self, locator: &Locator) -> SleuthResult<Option<Element>> {
        self.call_history.push(format!("find:{locator}"));
        self.lookup(locator, false)
    }

    fn find_all(&mut self, locator: &Locator) -> SleuthResult<Vec<Element>> {
        self.call_history.push(format!("find_all:{locator}"));
        let texts = self.lists.get(locator).cloned().unwrap_or_default();
        Ok(texts
            .into_iter()
            .map(|text| self.issue(locator, text))
            .collect())
    }

    fn click(&mut self, element: &Element) -> SleuthResult<()> {
        self.call_history.push(format!("click:{}", element.locator));
        let effects = self.effects.get(&element.locator).cloned().unwrap_or_default();
        for effect in effects {
            self.apply(effect);
        }
        Ok(())
    }

    fn type_text(&mut self, element: &Element, text: &str) -> SleuthResult<()> {
        self.call_history.push(format!("type:{}", element.locator));
        self.typed.push((element.locator.clone(), text.to_string()));
        Ok(())
    }

    fn set_files(&mut self, element: &Element, paths: &[PathBuf]) -> SleuthResult<()> {
        self.call_history.push(format!("set_files:{}", element.locator));
        self.files.push((element.locator.clone(), paths.to_vec()));
        Ok(())
    }

    fn read_text(&mut self, element: &Element) -> SleuthResult<String> {
        self.texts
            .get(&element.id)
            .cloned()
            .ok_or_else(|| SleuthError::driver(format!("stale element {}", element.id)))
    }

    fn attribute(&mut self, element: &Element, name: &str) -> SleuthResult<Option<String>> {
        let locator = self
            .handles
            .get(&element.id)
            .cloned()
            .unwrap_or_else(|| element.locator.clone());
        Ok(self.attributes.get(&(locator, name.to_string())).cloned())
    }

    fn wait_for(
        &mut self,
        locator: &Locator,
        state: WaitState,
        timeout: Duration,
    ) -> SleuthResult<Option<Element>> {
        self.call_history
            .push(format!("wait_for:{locator}:{}ms", timeout.as_millis()));
        self.lookup(locator, state == WaitState::Visible)
    }

    fn read_cookie(&mut self, name: &str) -> SleuthResult<Option<String>> {
        self.call_history.push(format!("read_cookie:{name}"));
        Ok(self.cookies.get(name).cloned())
    }

    fn screenshot(&mut self) -> SleuthResult<Vec<u8>> {
        self.call_history.push("screenshot".to_string());
        self.screenshot_data
            .clone()
            .ok_or_else(|| SleuthError::driver("No mock screenshot set"))
    }

    fn quit(&mut self) -> SleuthResult<()> {
        self.call_history.push("quit".to_string());
        self.quit_called = true;
        Ok(())
    }
}

/// Owns a UI session and quits it when dropped.
#[derive(Debug)]
pub struct UiSession<D: UiDriver> {
    driver: D,
    closed: bool,
}

impl<D: UiDriver> UiSession<D> {
    /// Take ownership of a driver
    pub const fn new(driver: D) -> Self {
        Self {
            driver,
            closed: false,
        }
    }

    /// Quit now; later calls and the drop are no-ops
    ///
    /// # Errors
    ///
    /// Returns the driver's quit error
    pub fn close(&mut self) -> SleuthResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.driver.quit()
    }
}

impl<D: UiDriver> std::ops::Deref for UiSession<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.driver
    }
}

impl<D: UiDriver> std::ops::DerefMut for UiSession<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: UiDriver> Drop for UiSession<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to quit UI session");
        }
    }
}

/// Live element handles of a real driver, keyed by the ids handed out in
/// [`Element`]. Looking a locator up again drops the handles it produced
/// before, so polling loops do not accumulate dead handles.
#[derive(Debug)]
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) struct HandleRegistry<H> {
    handles: HashMap<String, H>,
    by_locator: HashMap<Locator, Vec<String>>,
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
impl<H> HandleRegistry<H> {
    pub(crate) fn new() -> Self {
        Self {
            handles: HashMap::new(),
            by_locator: HashMap::new(),
        }
    }

    /// Forget what `locator` found before and register `found`
    pub(crate) fn replace(&mut self, locator: &Locator, found: Vec<H>) -> Vec<Element> {
        if let Some(stale) = self.by_locator.remove(locator) {
            for id in stale {
                self.handles.remove(&id);
            }
        }
        let mut ids = Vec::with_capacity(found.len());
        let elements = found
            .into_iter()
            .map(|handle| {
                let id = uuid::Uuid::new_v4().to_string();
                self.handles.insert(id.clone(), handle);
                ids.push(id.clone());
                Element::new(id, locator.clone())
            })
            .collect();
        self.by_locator.insert(locator.clone(), ids);
        elements
    }

    pub(crate) fn get(&self, element: &Element) -> Option<&H> {
        self.handles.get(&element.id)
    }

    pub(crate) fn clear(&mut self) {
        self.handles.clear();
        self.by_locator.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }
}

/// Absolute path for file inputs
///
/// # Errors
///
/// Returns error when the file does not exist
pub fn upload_path(path: &Path) -> SleuthResult<PathBuf> {
    Ok(std::fs::canonicalize(path)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod locator_tests {
        use super::*;

        #[test]
        fn test_locator_display() {
            assert_eq!(Locator::css("#otp").to_string(), "css=#otp");
            assert_eq!(Locator::xpath("//td[2]").to_string(), "xpath=//td[2]");
        }

        #[test]
        fn test_locator_from_yaml() {
            let loc: Locator = crate::config::from_yaml_str("css: \"button.submit\"").unwrap();
            assert_eq!(loc, Locator::css("button.submit"));
            let loc: Locator = crate::config::from_yaml_str("xpath: \"//div\"").unwrap();
            assert_eq!(loc, Locator::xpath("//div"));
        }

        #[test]
        fn test_text_locator_xpath() {
            let xpath = Locator::text("Sign In").to_xpath().unwrap();
            assert!(xpath.contains("'Sign In'"));
        }

        #[test]
        fn test_xpath_literal_with_both_quotes() {
            let lit = xpath_literal(r#"Let's "go""#);
            assert!(lit.starts_with("concat("));
        }
    }

    mod mock_ui_tests {
        use super::*;

        #[test]
        fn test_mock_ui_creation() {
            let ui = MockUi::new();
            assert!(ui.history().is_empty());
            assert!(!ui.quit_called);
        }

        #[test]
        fn test_absent_by_default() {
            let mut ui = MockUi::new();
            assert!(ui.find(&Locator::css("#x")).unwrap().is_none());
            assert!(matches!(
                ui.require(&Locator::css("#x")),
                Err(SleuthError::ElementNotFound { .. })
            ));
        }

        #[test]
        fn test_script_consumed_then_sticks() {
            let mut ui = MockUi::new();
            let spinner = Locator::css(".spinner");
            ui.script(
                spinner.clone(),
                vec![
                    MockState::Present("a".into()),
                    MockState::Present("b".into()),
                    MockState::Absent,
                ],
            );
            assert_eq!(ui.text_of(&spinner).unwrap(), Some("a".to_string()));
            assert_eq!(ui.text_of(&spinner).unwrap(), Some("b".to_string()));
            assert_eq!(ui.text_of(&spinner).unwrap(), None);
            assert_eq!(ui.text_of(&spinner).unwrap(), None);
        }

        #[test]
        fn test_failing_state_errors() {
            let mut ui = MockUi::new();
            let loc = Locator::css("#flaky");
            ui.set_state(loc.clone(), MockState::Failing("detached".into()));
            assert!(ui.find(&loc).is_err());
        }

        #[test]
        fn test_hidden_not_visible() {
            let mut ui = MockUi::new();
            let loc = Locator::css("#banner");
            ui.set_state(loc.clone(), MockState::Hidden("x".into()));
            assert!(ui
                .wait_for(&loc, WaitState::Visible, Duration::from_secs(1))
                .unwrap()
                .is_none());
            assert!(ui
                .wait_for(&loc, WaitState::Present, Duration::from_secs(1))
                .unwrap()
                .is_some());
        }

        #[test]
        fn test_click_effects() {
            let mut ui = MockUi::new();
            let logout = Locator::css("#logout");
            let toast = Locator::css(".toast");
            ui.set_present(logout.clone(), "Logout")
                .set_cookie("session", "abc")
                .on_click(
                    logout.clone(),
                    vec![
                        ClickEffect::Show(toast.clone(), "Logged out successfully!".into()),
                        ClickEffect::Cookie("session".into(), None),
                    ],
                );
            ui.click_on(&logout).unwrap();
            assert_eq!(
                ui.text_of(&toast).unwrap().as_deref(),
                Some("Logged out successfully!")
            );
            assert_eq!(ui.read_cookie("session").unwrap(), None);
        }

        #[test]
        fn test_download_effect_renames_like_a_browser() {
            let tmp = tempfile::TempDir::new().unwrap();
            let mut ui = MockUi::new();
            let button = Locator::css("#download");
            ui.set_present(button.clone(), "Download HTML").on_click(
                button.clone(),
                vec![ClickEffect::Download {
                    dir: tmp.path().to_path_buf(),
                    name: "report.html".into(),
                    contents: "<p>Issue High</p>".into(),
                }],
            );
            ui.click_on(&button).unwrap();
            ui.click_on(&button).unwrap();
            assert!(tmp.path().join("report.html").is_file());
            assert_eq!(
                std::fs::read_to_string(tmp.path().join("report (1).html")).unwrap(),
                "<p>Issue High</p>"
            );
        }

        #[test]
        fn test_typed_and_files_recorded() {
            let mut ui = MockUi::new();
            let input = Locator::css("input[type=file]");
            let email = Locator::css("#email");
            ui.set_present(input.clone(), "").set_present(email.clone(), "");
            ui.type_into(&email, "a@b.c").unwrap();
            let el = ui.require(&input).unwrap();
            ui.set_files(&el, &[PathBuf::from("/tmp/x.py")]).unwrap();
            assert_eq!(ui.typed_into(&email), vec!["a@b.c".to_string()]);
            assert_eq!(ui.files_for(&input).unwrap().len(), 1);
            assert!(ui.was_called("set_files"));
        }

        #[test]
        fn test_find_all_texts() {
            let mut ui = MockUi::new();
            let cells = Locator::xpath("//tr/td[2]");
            ui.set_list(cells.clone(), vec!["High".into(), "Low".into()]);
            assert_eq!(ui.texts_of(&cells).unwrap(), vec!["High", "Low"]);
        }

        #[test]
        fn test_screenshot_unset_fails() {
            let mut ui = MockUi::new();
            assert_eq!(ui.screenshot().unwrap(), PNG_SIGNATURE.to_vec());
            ui.set_screenshot(None);
            assert!(ui.screenshot().is_err());
        }
    }

    mod handle_registry_tests {
        use super::*;

        #[test]
        fn test_repeated_lookup_drops_stale_handles() {
            let spinner = Locator::css(".spinner");
            let mut registry = HandleRegistry::new();
            let mut first = Vec::new();
            for round in 0..300 {
                let found = registry.replace(&spinner, vec![round]);
                if round == 0 {
                    first = found;
                }
            }
            assert_eq!(registry.len(), 1);
            assert!(registry.get(&first[0]).is_none());
        }

        #[test]
        fn test_other_locators_kept() {
            let mut registry = HandleRegistry::new();
            let button = registry.replace(&Locator::css("button"), vec!["submit"]);
            registry.replace(&Locator::css(".spinner"), vec!["a", "b"]);
            registry.replace(&Locator::css(".spinner"), Vec::new());
            assert_eq!(registry.get(&button[0]), Some(&"submit"));
            assert_eq!(registry.len(), 1);
            registry.clear();
            assert_eq!(registry.len(), 0);
        }
    }

    mod session_tests {
        use super::*;

        #[test]
        fn test_close_quits_once() {
            let mut session = UiSession::new(MockUi::new());
            session.close().unwrap();
            session.close().unwrap();
            assert!(session.quit_called);
            assert_eq!(session.call_count("quit"), 1);
        }

        #[test]
        fn test_deref_mut_reaches_driver() {
            let mut session = UiSession::new(MockUi::new());
            session.navigate("https://app.example").unwrap();
            assert_eq!(session.current_url, "https://app.example");
        }
    }
}
