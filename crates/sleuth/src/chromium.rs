//! Real browser control over CDP.
//!
//! [`ChromiumUi`] implements the synchronous [`UiDriver`] contract on top of
//! chromiumoxide by owning a tokio runtime and blocking on each command.
//! Element handles live in a registry keyed by the opaque id handed out in
//! [`Element`]; a new lookup of a locator releases its older handles.

use crate::config::BrowserConfig;
use crate::driver::{Element, HandleRegistry, Locator, UiDriver, WaitState};
use crate::result::{SleuthError, SleuthResult};
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::element::Element as CdpElement;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Interval between visibility probes in `wait_for`
const WAIT_INTERVAL: Duration = Duration::from_millis(250);

const IS_VISIBLE_JS: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    const s = window.getComputedStyle(this); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; \
}";

fn driver_err(context: &str) -> impl Fn(CdpError) -> SleuthError + '_ {
    move |e| SleuthError::driver(format!("{context}: {e}"))
}

/// Chromium page driven through the DevTools protocol
#[derive(Debug)]
pub struct ChromiumUi {
    runtime: Runtime,
    browser: CdpBrowser,
    handler: tokio::task::JoinHandle<()>,
    page: CdpPage,
    elements: HandleRegistry<CdpElement>,
}

impl ChromiumUi {
    /// Launch a browser and open a blank page. Downloads land in
    /// `download_dir`, which is created when missing.
    ///
    /// # Errors
    ///
    /// Returns [`SleuthError::Connectivity`] when the browser cannot start
    pub fn launch(config: &BrowserConfig, download_dir: &Path) -> SleuthResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let mut builder = CdpConfig::builder()
            .window_size(config.width, config.height)
            .request_timeout(Duration::from_secs(config.command_timeout_secs))
            .no_sandbox();
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(SleuthError::connectivity)?;

        std::fs::create_dir_all(download_dir)?;
        let download_dir = std::fs::canonicalize(download_dir)?;

        let (browser, handler, page) = runtime.block_on(async {
            let (browser, mut handler) = CdpBrowser::launch(cdp_config)
                .await
                .map_err(|e| SleuthError::connectivity(format!("browser launch failed: {e}")))?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(driver_err("new page"))?;

            let behavior = SetDownloadBehaviorParams::builder()
                .behavior(SetDownloadBehaviorBehavior::Allow)
                .download_path(download_dir.to_string_lossy())
                .build()
                .map_err(SleuthError::driver)?;
            page.execute(behavior)
                .await
                .map_err(driver_err("download behavior"))?;

            Ok::<_, SleuthError>((browser, handler, page))
        })?;

        tracing::info!(
            headless = config.headless,
            downloads = %download_dir.display(),
            "browser launched"
        );
        Ok(Self {
            runtime,
            browser,
            handler,
            page,
            elements: HandleRegistry::new(),
        })
    }

    fn handle(&self, element: &Element) -> SleuthResult<&CdpElement> {
        self.elements
            .get(element)
            .ok_or_else(|| SleuthError::driver(format!("stale element {}", element.id)))
    }

    fn register(&mut self, locator: &Locator, found: Vec<CdpElement>) -> Vec<Element> {
        self.elements.replace(locator, found)
    }

    async fn query(page: &CdpPage, locator: &Locator) -> SleuthResult<Vec<CdpElement>> {
        let found = match locator {
            Locator::Css(selector) => page.find_elements(selector.as_str()).await,
            other => {
                let xpath = other
                    .to_xpath()
                    .ok_or_else(|| SleuthError::driver(format!("no xpath for {other}")))?;
                page.find_xpaths(xpath).await
            }
        };
        match found {
            Ok(elements) => Ok(elements),
            Err(CdpError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(SleuthError::driver(format!("lookup {locator}: {e}"))),
        }
    }

    async fn is_visible(element: &CdpElement) -> bool {
        match element.call_js_fn(IS_VISIBLE_JS, false).await {
            Ok(ret) => ret
                .result
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl UiDriver for ChromiumUi {
    fn navigate(&mut self, url: &str) -> SleuthResult<()> {
        tracing::debug!(url, "navigate");
        self.elements.clear();
        let page = &self.page;
        self.runtime.block_on(async {
            page.goto(url)
                .await
                .map_err(|e| SleuthError::driver(format!("navigate to {url}: {e}")))?;
            Ok::<_, SleuthError>(())
        })
    }

    fn find(&mut self, locator: &Locator) -> SleuthResult<Option<Element>> {
        let found = self.runtime.block_on(Self::query(&self.page, locator))?;
        Ok(self
            .register(locator, found.into_iter().take(1).collect())
            .pop())
    }

    fn find_all(&mut self, locator: &Locator) -> SleuthResult<Vec<Element>> {
        let found = self.runtime.block_on(Self::query(&self.page, locator))?;
        Ok(self.register(locator, found))
    }

    fn click(&mut self, element: &Element) -> SleuthResult<()> {
        let handle = self.handle(element)?;
        self.runtime.block_on(async {
            handle
                .scroll_into_view()
                .await
                .map_err(driver_err("scroll"))?;
            handle.click().await.map_err(driver_err("click"))?;
            Ok::<_, SleuthError>(())
        })
    }

    fn type_text(&mut self, element: &Element, text: &str) -> SleuthResult<()> {
        let handle = self.handle(element)?;
        self.runtime.block_on(async {
            handle.click().await.map_err(driver_err("focus"))?;
            handle.type_str(text).await.map_err(driver_err("type"))?;
            Ok::<_, SleuthError>(())
        })
    }

    fn set_files(&mut self, element: &Element, paths: &[PathBuf]) -> SleuthResult<()> {
        let handle = self.handle(element)?;
        let params = SetFileInputFilesParams::builder()
            .files(
                paths
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect::<Vec<_>>(),
            )
            .backend_node_id(handle.backend_node_id)
            .build()
            .map_err(SleuthError::driver)?;
        let page = &self.page;
        self.runtime.block_on(async {
            page.execute(params).await.map_err(driver_err("set files"))?;
            Ok::<_, SleuthError>(())
        })
    }

    fn read_text(&mut self, element: &Element) -> SleuthResult<String> {
        let handle = self.handle(element)?;
        let text = self
            .runtime
            .block_on(handle.inner_text())
            .map_err(driver_err("read text"))?;
        Ok(text.unwrap_or_default())
    }

    fn attribute(&mut self, element: &Element, name: &str) -> SleuthResult<Option<String>> {
        let handle = self.handle(element)?;
        self.runtime
            .block_on(handle.attribute(name))
            .map_err(driver_err("attribute"))
    }

    fn wait_for(
        &mut self,
        locator: &Locator,
        state: WaitState,
        timeout: Duration,
    ) -> SleuthResult<Option<Element>> {
        let page = &self.page;
        let found = self.runtime.block_on(async {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let candidates = Self::query(page, locator).await?;
                for candidate in candidates {
                    if state == WaitState::Present || Self::is_visible(&candidate).await {
                        return Ok::<_, SleuthError>(Some(candidate));
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(WAIT_INTERVAL).await;
            }
        })?;
        Ok(found.and_then(|handle| self.register(locator, vec![handle]).pop()))
    }

    fn read_cookie(&mut self, name: &str) -> SleuthResult<Option<String>> {
        let cookies = self
            .runtime
            .block_on(self.page.get_cookies())
            .map_err(driver_err("cookies"))?;
        Ok(cookies.into_iter().find(|c| c.name == name).map(|c| c.value))
    }

    fn screenshot(&mut self) -> SleuthResult<Vec<u8>> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let shot = self
            .runtime
            .block_on(self.page.execute(params))
            .map_err(driver_err("screenshot"))?;

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&shot.data)
            .map_err(|e| SleuthError::driver(format!("screenshot decode: {e}")))
    }

    fn quit(&mut self) -> SleuthResult<()> {
        self.elements.clear();
        let browser = &mut self.browser;
        let result = self.runtime.block_on(browser.close());
        self.handler.abort();
        result.map_err(driver_err("close browser"))?;
        tracing::info!("browser closed");
        Ok(())
    }
}
