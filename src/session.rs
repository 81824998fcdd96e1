use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::chrome::ChromeDriver;
use crate::config::SessionBuilder;
use crate::driver::{Driver, Scope};
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::wait::{poll, Attempt, Deadline, PollOutcome};

/// URL a browser parks a window on before its real navigation commits.
const BLANK_URL: &str = "about:blank";

/// Budget for each resolve attempt inside the click retry loop.
const CLICK_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A resilient automation session over one browser instance.
///
/// Every lookup and interaction polls the driver until it succeeds or the
/// caller's deadline passes; "still loading" resolves to an explicit negative
/// result plus a diagnostic log entry, never an error. One operation at a
/// time per session; run one session per browser instance for parallelism.
pub struct Session<D: Driver> {
    driver: D,
    original_window: D::Window,
    default_timeout: Duration,
    poll_interval: Duration,
    closed: bool,
}

impl Session<ChromeDriver> {
    /// Create a builder for a Chrome-backed session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }
}

impl<D: Driver> Session<D> {
    /// Wrap a launched driver, capturing the original window handle that
    /// window operations diff against and restore focus to.
    pub async fn start(
        driver: D,
        default_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let original_window = driver.current_window().await?;
        info!(window = ?original_window, "session started");
        Ok(Self {
            driver,
            original_window,
            default_timeout,
            poll_interval,
            closed: false,
        })
    }

    /// The driver this session wraps.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Handle of the window that was focused when the session started.
    pub fn original_window(&self) -> &D::Window {
        &self.original_window
    }

    /// Budget for callers that do not pick their own.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Drive the focused window to `url`. Driver faults are logged and
    /// reported as `false`, never raised.
    pub async fn navigate(&self, url: &str) -> Result<bool> {
        self.ensure_open()?;
        match self.driver.navigate(url).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(url = %url, error = %e, "navigation failed");
                Ok(false)
            }
        }
    }

    /// Reload the focused window.
    pub async fn refresh(&self) -> Result<()> {
        self.ensure_open()?;
        self.driver.refresh().await
    }

    /// URL of the focused window; empty when it cannot be read.
    pub async fn current_url(&self) -> Result<String> {
        self.ensure_open()?;
        match self.driver.current_url().await {
            Ok(url) => Ok(url),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "could not read current url");
                Ok(String::new())
            }
        }
    }

    /// Poll until the focused window's URL differs from `from_url`. Returns
    /// whether it changed within the budget.
    pub async fn wait_for_url_change(&self, from_url: &str, timeout: Duration) -> Result<bool> {
        self.ensure_open()?;
        let driver = &self.driver;
        let outcome = poll(timeout, self.poll_interval, || async move {
            match driver.current_url().await {
                Ok(url) if url != from_url => Attempt::Ready(()),
                Ok(_) => Attempt::Pending,
                Err(e) if e.is_fatal() => Attempt::Fatal(e),
                Err(e) => {
                    debug!(error = %e, "transient fault while reading url");
                    Attempt::Retry(e)
                }
            }
        })
        .await;
        match outcome {
            PollOutcome::Ready(()) => Ok(true),
            PollOutcome::TimedOut { elapsed, .. } => {
                warn!(
                    url = %from_url,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "url did not change"
                );
                Ok(false)
            }
            PollOutcome::Aborted(e) => Err(e),
        }
    }

    // ── Element lookup ──────────────────────────────────────────────

    /// Poll for one element matching `selector`. Returns `Ok(None)` once the
    /// budget expires; "not found yet" is never an error. Unless `quiet`, a
    /// timeout logs the selector and elapsed time.
    pub async fn find_one(
        &self,
        selector: &Selector,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Option<D::Element>> {
        self.find_one_scoped(Scope::Page, selector, timeout, quiet)
            .await
    }

    /// `find_one` scoped to the descendants of `parent`.
    pub async fn find_one_in(
        &self,
        parent: &D::Element,
        selector: &Selector,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Option<D::Element>> {
        self.find_one_scoped(Scope::Within(parent), selector, timeout, quiet)
            .await
    }

    /// Whether `selector` resolves within the budget.
    pub async fn wait_for_element(
        &self,
        selector: &Selector,
        timeout: Duration,
        quiet: bool,
    ) -> Result<bool> {
        Ok(self.find_one(selector, timeout, quiet).await?.is_some())
    }

    /// Poll for the stabilized set of elements matching `selector`: requery
    /// until the match count repeats (repeatedly zero included), then return
    /// that set. A set still growing at the deadline yields an empty vec,
    /// never a partial mid-render list.
    pub async fn find_all(
        &self,
        selector: &Selector,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Vec<D::Element>> {
        self.find_all_scoped(Scope::Page, selector, timeout, quiet)
            .await
    }

    /// `find_all` scoped to the descendants of `parent`.
    pub async fn find_all_in(
        &self,
        parent: &D::Element,
        selector: &Selector,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Vec<D::Element>> {
        self.find_all_scoped(Scope::Within(parent), selector, timeout, quiet)
            .await
    }

    async fn find_one_scoped(
        &self,
        scope: Scope<'_, D::Element>,
        selector: &Selector,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Option<D::Element>> {
        self.ensure_open()?;
        let driver = &self.driver;
        let outcome = poll(timeout, self.poll_interval, || async move {
            match driver.find_element(scope, selector).await {
                Ok(Some(element)) => Attempt::Ready(element),
                Ok(None) => Attempt::Pending,
                Err(e) if e.is_fatal() => Attempt::Fatal(e),
                Err(e) => {
                    debug!(selector = %selector, error = %e, "transient fault while locating");
                    Attempt::Retry(e)
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(element) => Ok(Some(element)),
            PollOutcome::TimedOut {
                elapsed,
                last_error,
            } => {
                if !quiet {
                    warn!(
                        selector = %selector,
                        elapsed_ms = elapsed.as_millis() as u64,
                        last_error = %describe(&last_error),
                        "timed out waiting for element"
                    );
                }
                Ok(None)
            }
            PollOutcome::Aborted(e) => Err(e),
        }
    }

    async fn find_all_scoped(
        &self,
        scope: Scope<'_, D::Element>,
        selector: &Selector,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Vec<D::Element>> {
        self.ensure_open()?;
        let deadline = Deadline::start(timeout);
        let mut previous: Option<usize> = None;
        let mut last_error: Option<Error> = None;

        loop {
            match self.driver.find_elements(scope, selector).await {
                Ok(matches) => {
                    let count = matches.len();
                    // Stabilized: the count repeated, zero included.
                    if previous == Some(count) {
                        return Ok(matches);
                    }
                    previous = Some(count);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(selector = %selector, error = %e, "transient fault while locating elements");
                    last_error = Some(e);
                }
            }

            if deadline.expired() {
                if !quiet {
                    warn!(
                        selector = %selector,
                        elapsed_ms = deadline.elapsed().as_millis() as u64,
                        last_error = %describe(&last_error),
                        "element set never stabilized"
                    );
                }
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // ── Interactions ────────────────────────────────────────────────

    /// Click the element matched by `selector`, re-resolving and retrying the
    /// whole resolve+click pair through transient DOM churn until the budget
    /// expires. The target commonly moves or goes stale between resolution
    /// and the click itself, which is why every attempt resolves afresh.
    /// Returns whether a click landed.
    pub async fn click(&self, selector: &Selector, timeout: Duration) -> Result<bool> {
        self.ensure_open()?;
        let deadline = Deadline::start(timeout);
        let mut last_error: Option<Error> = None;

        loop {
            let probe = CLICK_PROBE_TIMEOUT.min(deadline.remaining());
            if let Some(element) = self.find_one_scoped(Scope::Page, selector, probe, true).await? {
                match self.driver.click(&element).await {
                    Ok(()) => {
                        debug!(selector = %selector, "click landed");
                        return Ok(true);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        debug!(selector = %selector, error = %e, "click attempt failed");
                        last_error = Some(e);
                    }
                }
            }

            if deadline.expired() {
                warn!(
                    selector = %selector,
                    elapsed_ms = deadline.elapsed().as_millis() as u64,
                    last_error = %describe(&last_error),
                    "unable to click element"
                );
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Resolve the element once, clear its current value, then send `text`.
    /// Returns whether the clear+send pair succeeded. Unlike `click`, failures
    /// after resolution are not retried; the locator already waited for
    /// presence.
    pub async fn set_text(
        &self,
        selector: &Selector,
        text: &str,
        timeout: Duration,
    ) -> Result<bool> {
        self.ensure_open()?;
        let Some(element) = self.find_one(selector, timeout, false).await? else {
            return Ok(false);
        };

        let typed = async {
            self.driver.clear(&element).await?;
            self.driver.send_keys(&element, text).await
        };
        match typed.await {
            Ok(()) => Ok(true),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(selector = %selector, error = %e, "unable to set text");
                Ok(false)
            }
        }
    }

    /// Run `script` against an already-resolved element, retrying until it
    /// executes or the budget expires. The script text is the body of a
    /// function whose parameter `el` is the element. Returns the script's
    /// value (`Null` for void scripts), or `None` when it never executed.
    pub async fn execute_script(
        &self,
        element: &D::Element,
        script: &str,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        self.ensure_open()?;
        let driver = &self.driver;
        let outcome = poll(timeout, self.poll_interval, || async move {
            match driver.run_script(script, Some(element)).await {
                Ok(value) => Attempt::Ready(value),
                Err(e) if e.is_fatal() => Attempt::Fatal(e),
                Err(e) => {
                    debug!(error = %e, "transient fault while running script");
                    Attempt::Retry(e)
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(value) => Ok(Some(value)),
            PollOutcome::TimedOut {
                elapsed,
                last_error,
            } => {
                warn!(
                    script = %script,
                    elapsed_ms = elapsed.as_millis() as u64,
                    last_error = %describe(&last_error),
                    "unable to execute script on element"
                );
                Ok(None)
            }
            PollOutcome::Aborted(e) => Err(e),
        }
    }

    // ── Scrollable lists ────────────────────────────────────────────

    /// Discover every element of a lazily-rendered scrollable list: fetch the
    /// stabilized set, scroll its last element into view to trigger more
    /// rendering, refetch, and stop at the first refetch with no growth.
    /// An empty first fetch logs an error and returns empty without
    /// scrolling. Assumes the container only ever grows when scrolled
    /// forward.
    pub async fn find_all_scrolling(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<Vec<D::Element>> {
        self.ensure_open()?;
        let mut items = self.find_all(selector, timeout, false).await?;
        if items.is_empty() {
            error!(selector = %selector, "scrollable list matched no elements");
            return Ok(items);
        }

        loop {
            if let Some(last) = items.last() {
                // A scroll that never lands is absorbed: the refetch then sees
                // no growth and the walk ends.
                self.execute_script(last, "el.scrollIntoView();", timeout)
                    .await?;
            }

            let refetched = self.find_all(selector, timeout, false).await?;
            let grew = refetched.len() > items.len();
            items = refetched;
            if !grew {
                return Ok(items);
            }
        }
    }

    // ── Windows ─────────────────────────────────────────────────────

    /// Wait until `expected` new windows are open beyond the original, then
    /// return their handles. Empty on timeout.
    pub async fn find_popups(
        &self,
        timeout: Duration,
        expected: usize,
    ) -> Result<Vec<D::Window>> {
        self.ensure_open()?;
        let driver = &self.driver;
        let original = &self.original_window;
        let outcome = poll(timeout, self.poll_interval, || async move {
            match driver.list_windows().await {
                Ok(windows) if windows.len() == expected + 1 => Attempt::Ready(
                    windows
                        .into_iter()
                        .filter(|w| w != original)
                        .collect::<Vec<_>>(),
                ),
                Ok(_) => Attempt::Pending,
                Err(e) if e.is_fatal() => Attempt::Fatal(e),
                Err(e) => {
                    debug!(error = %e, "transient fault while listing windows");
                    Attempt::Retry(e)
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(popups) => Ok(popups),
            PollOutcome::TimedOut {
                elapsed,
                last_error,
            } => {
                warn!(
                    expected,
                    elapsed_ms = elapsed.as_millis() as u64,
                    last_error = %describe(&last_error),
                    "popups never appeared"
                );
                Ok(Vec::new())
            }
            PollOutcome::Aborted(e) => Err(e),
        }
    }

    /// Wait for a popup to open (exactly two windows), focus it, and poll for
    /// its URL to leave the blank placeholder. Afterwards, optionally close
    /// every non-original window and optionally restore focus to the
    /// original. Returns the discovered URL, or empty when none resolved in
    /// time; a window stuck on the placeholder never navigated and also
    /// yields empty.
    pub async fn wait_for_new_window_url(
        &self,
        timeout: Duration,
        close_after: bool,
        restore_focus: bool,
    ) -> Result<String> {
        self.ensure_open()?;
        let deadline = Deadline::start(timeout);
        let url = self.await_popup_url(&deadline).await?;

        if close_after {
            match self.driver.list_windows().await {
                Ok(windows) => {
                    for window in windows.iter().filter(|w| **w != self.original_window) {
                        match self.driver.close_window(window).await {
                            Ok(()) => {}
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => warn!(window = ?window, error = %e, "unable to close popup"),
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "unable to enumerate windows for cleanup"),
            }
        }

        if restore_focus {
            // The focus postcondition is part of the contract; a failed
            // restore surfaces instead of leaving focus on a dying popup.
            self.driver.switch_window(&self.original_window).await?;
        }

        Ok(url)
    }

    /// The two polling phases of `wait_for_new_window_url`, sharing one
    /// deadline: first two windows, then a real URL in the new one.
    async fn await_popup_url(&self, deadline: &Deadline) -> Result<String> {
        let driver = &self.driver;
        let original = &self.original_window;
        let outcome = poll(deadline.remaining(), self.poll_interval, || async move {
            match driver.list_windows().await {
                Ok(windows) if windows.len() == 2 => {
                    match windows.into_iter().find(|w| w != original) {
                        Some(popup) => Attempt::Ready(popup),
                        None => Attempt::Pending,
                    }
                }
                Ok(_) => Attempt::Pending,
                Err(e) if e.is_fatal() => Attempt::Fatal(e),
                Err(e) => {
                    debug!(error = %e, "transient fault while listing windows");
                    Attempt::Retry(e)
                }
            }
        })
        .await;

        let popup = match outcome {
            PollOutcome::Ready(popup) => popup,
            PollOutcome::TimedOut {
                elapsed,
                last_error,
            } => {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    last_error = %describe(&last_error),
                    "no new window appeared"
                );
                return Ok(String::new());
            }
            PollOutcome::Aborted(e) => return Err(e),
        };

        match self.driver.switch_window(&popup).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(window = ?popup, error = %e, "unable to focus new window");
                return Ok(String::new());
            }
        }

        let mut last_seen = String::new();
        loop {
            match self.driver.current_url().await {
                Ok(url) if !url.is_empty() && url != BLANK_URL => {
                    debug!(url = %url, "new window url resolved");
                    return Ok(url);
                }
                Ok(url) => last_seen = url,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(error = %e, "transient fault while reading popup url"),
            }

            if deadline.expired() {
                if last_seen == BLANK_URL {
                    warn!("new window never left the blank placeholder url");
                } else {
                    warn!(
                        elapsed_ms = deadline.elapsed().as_millis() as u64,
                        "new window url never resolved"
                    );
                }
                return Ok(String::new());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Full-page screenshot of the focused window (PNG).
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.driver.screenshot(true).await
    }

    /// Full-page screenshot written to `path`.
    pub async fn screenshot_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.screenshot().await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Tear down the browser. Safe to call more than once; only the first
    /// call reaches the driver, and it counts as done even if teardown
    /// errors. Operations after close fail fast with `Error::SessionClosed`.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            debug!("session already closed");
            return Ok(());
        }
        self.closed = true;
        self.driver.close().await?;
        info!("session closed");
        Ok(())
    }

    /// Whether `close` has already run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn describe(err: &Option<Error>) -> String {
    err.as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| String::from("none"))
}
