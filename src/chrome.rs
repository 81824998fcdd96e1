use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{BringToFrontParams, CaptureScreenshotFormat};
use chromiumoxide::element::Element as CrElement;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::driver::{Driver, Scope};
use crate::error::{Error, Result};
use crate::selector::Selector;

/// Chrome flags applied to every launch. Popup blocking must stay off or the
/// window-lifecycle operations would never see the windows they wait for.
const DEFAULT_ARGS: &[&str] = &[
    "disable-popup-blocking",
    "disable-extensions",
    "mute-audio",
    "no-default-browser-check",
    "disable-prompt-on-repost",
];

/// Attribute written onto matched nodes at discovery time. The value is
/// `generation-index`; it doubles as the node's address for scripts. A
/// re-rendered node loses the attribute and its handle reads as stale.
const REF_ATTR: &str = "data-patient-ref";

/// A located DOM node: the CDP element handle plus the discovery tag that
/// addresses the node from JavaScript.
pub struct ChromeElement {
    inner: CrElement,
    tag: String,
}

impl ChromeElement {
    /// Returns a reference to the underlying chromiumoxide Element.
    pub fn inner(&self) -> &CrElement {
        &self.inner
    }
}

#[derive(serde::Deserialize)]
struct ScriptEnvelope {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: String,
}

/// Production `Driver` over chromiumoxide. Window handles are CDP target ids;
/// the focused window is the page all DOM operations run against.
pub struct ChromeDriver {
    browser: Browser,
    page: Mutex<Page>,
    next_generation: AtomicU64,
    handler_task: tokio::task::JoinHandle<()>,
}

impl ChromeDriver {
    /// Launch a browser process and open the initial window.
    pub async fn launch(config: &SessionConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder();

        if config.headless {
            builder = builder.new_headless_mode().no_sandbox();
        } else {
            builder = builder.with_head().no_sandbox();
        }

        for arg in DEFAULT_ARGS {
            builder = builder.arg(*arg);
        }
        for arg in &config.extra_args {
            builder = builder.arg(arg.as_str());
        }

        // chromiumoxide adds the `--` prefix itself, so keys must not carry it
        if let Some(ref agent) = config.user_agent {
            builder = builder.arg(("user-agent", agent.as_str()));
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder = builder.viewport(Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: false,
            has_touch: false,
        });

        let browser_config = builder.build().map_err(|e| Error::Launch(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;

        info!(headless = config.headless, "browser launched");

        Ok(Self {
            browser,
            page: Mutex::new(page),
            next_generation: AtomicU64::new(0),
            handler_task,
        })
    }

    /// Run the discovery pass: tag every node the selector matches in the
    /// focused window, then resolve the tagged nodes to element handles.
    async fn discover(
        &self,
        scope: Scope<'_, ChromeElement>,
        selector: &Selector,
    ) -> Result<Vec<ChromeElement>> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let scope_tag = match scope {
            Scope::Page => None,
            Scope::Within(parent) => Some(parent.tag.as_str()),
        };
        let js = discovery_js(selector, scope_tag, generation)?;

        let page = self.page.lock().await;
        let evaluated = page
            .evaluate(js)
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;
        let count: i64 = evaluated
            .into_value()
            .map_err(|e| Error::Driver(e.to_string()))?;
        // -1 means the scope element itself went stale; either way, no matches.
        if count <= 0 {
            return Ok(Vec::new());
        }

        let matched = match page
            .find_elements(format!(r#"[{REF_ATTR}^="{generation}-"]"#))
            .await
        {
            Ok(els) => els,
            // The DOM moved between tagging and resolution; report absence and
            // let the caller's poll try again.
            Err(_) => Vec::new(),
        };

        // Pair each handle with the tag actually on its node; a node whose tag
        // vanished between tagging and resolution is stale and dropped.
        let mut found = Vec::with_capacity(matched.len());
        for inner in matched {
            match inner.attribute(REF_ATTR).await {
                Ok(Some(tag)) => found.push(ChromeElement { inner, tag }),
                Ok(None) | Err(_) => {}
            }
        }
        Ok(found)
    }

    async fn page_for(&self, window: &str) -> Result<Page> {
        let pages = self.browser.pages().await?;
        pages
            .into_iter()
            .find(|p| p.target_id().inner().as_str() == window)
            .ok_or_else(|| Error::Driver(format!("no window with target id {window}")))
    }
}

#[async_trait]
impl Driver for ChromeDriver {
    type Element = ChromeElement;
    type Window = String;

    async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.goto(url)
            .await
            .map_err(|e| Error::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        let page = self.page.lock().await;
        page.reload()
            .await
            .map_err(|e| Error::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.page.lock().await;
        let url = page.url().await.map_err(|e| Error::Driver(e.to_string()))?;
        Ok(url.unwrap_or_default())
    }

    async fn find_element(
        &self,
        scope: Scope<'_, ChromeElement>,
        selector: &Selector,
    ) -> Result<Option<ChromeElement>> {
        let mut found = self.discover(scope, selector).await?;
        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.remove(0)))
        }
    }

    async fn find_elements(
        &self,
        scope: Scope<'_, ChromeElement>,
        selector: &Selector,
    ) -> Result<Vec<ChromeElement>> {
        self.discover(scope, selector).await
    }

    async fn click(&self, element: &ChromeElement) -> Result<()> {
        element.inner.click().await?;
        Ok(())
    }

    async fn clear(&self, element: &ChromeElement) -> Result<()> {
        self.run_script(
            r#"el.value = ""; el.dispatchEvent(new Event("input", { bubbles: true })); el.dispatchEvent(new Event("change", { bubbles: true }));"#,
            Some(element),
        )
        .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ChromeElement, text: &str) -> Result<()> {
        element.inner.focus().await?;
        element.inner.type_str(text).await?;
        Ok(())
    }

    async fn run_script(&self, script: &str, element: Option<&ChromeElement>) -> Result<Value> {
        let wrapped = envelope_js(script, element.map(|el| el.tag.as_str()));
        let page = self.page.lock().await;
        let evaluated = page
            .evaluate(wrapped)
            .await
            .map_err(|e| Error::Script(e.to_string()))?;
        let envelope: ScriptEnvelope = evaluated
            .into_value()
            .map_err(|e| Error::Script(e.to_string()))?;
        if envelope.ok {
            Ok(envelope.value)
        } else {
            Err(Error::Script(envelope.error))
        }
    }

    async fn list_windows(&self) -> Result<Vec<String>> {
        let pages = self.browser.pages().await?;
        Ok(pages
            .iter()
            .map(|p| p.target_id().inner().clone())
            .collect())
    }

    async fn current_window(&self) -> Result<String> {
        let page = self.page.lock().await;
        Ok(page.target_id().inner().clone())
    }

    async fn switch_window(&self, window: &String) -> Result<()> {
        let target = self.page_for(window).await?;
        target.execute(BringToFrontParams::default()).await?;
        *self.page.lock().await = target;
        debug!(window = %window, "focus switched");
        Ok(())
    }

    async fn close_window(&self, window: &String) -> Result<()> {
        let target = self.page_for(window).await?;
        target.close().await?;
        debug!(window = %window, "window closed");
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        let page = self.page.lock().await;
        page.screenshot(params)
            .await
            .map_err(|e| Error::Screenshot(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;
        self.handler_task.abort();
        info!("browser closed");
        Ok(())
    }
}

/// Build the discovery script: collect the nodes the selector matches inside
/// the scope, tag each with `REF_ATTR` value `generation-index` in document
/// order, and return the match count, or -1 when the scope element itself has
/// gone stale.
fn discovery_js(selector: &Selector, scope_tag: Option<&str>, generation: u64) -> Result<String> {
    let scope_expr = match scope_tag {
        Some(tag) => format!(r#"document.querySelector('[{REF_ATTR}="{tag}"]')"#),
        None => String::from("document"),
    };

    let collect = match selector {
        Selector::Css(css) => {
            let css_js = json_str(css)?;
            format!("Array.from(scope.querySelectorAll({css_js}))")
        }
        Selector::Id(id) => {
            let quoted = json_str(id)?;
            let css_js = json_str(&format!("[id={quoted}]"))?;
            format!("Array.from(scope.querySelectorAll({css_js}))")
        }
        Selector::XPath(xpath) => {
            let xpath_js = json_str(xpath)?;
            format!(
                "(() => {{ const out = []; const hits = document.evaluate({xpath_js}, scope, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); for (let i = 0; i < hits.snapshotLength; i++) out.push(hits.snapshotItem(i)); return out; }})()"
            )
        }
    };

    Ok(format!(
        r#"(() => {{
    const scope = {scope_expr};
    if (!scope) return -1;
    const nodes = {collect};
    nodes.forEach((node, i) => node.setAttribute("{REF_ATTR}", "{generation}-" + i));
    return nodes.length;
}})()"#
    ))
}

/// Wrap a script body so faults come back as data instead of lost exceptions.
/// With a tag, the target element is looked up first and bound to `el`; a
/// missing node reports as a stale-element failure.
fn envelope_js(script: &str, tag: Option<&str>) -> String {
    match tag {
        Some(tag) => format!(
            r#"(() => {{
    const el = document.querySelector('[{REF_ATTR}="{tag}"]');
    if (!el) return {{ ok: false, error: "stale element: {tag}" }};
    try {{ return {{ ok: true, value: (function(el) {{ {script} }})(el) }}; }}
    catch (err) {{ return {{ ok: false, error: String(err) }}; }}
}})()"#
        ),
        None => format!(
            r#"(() => {{
    try {{ return {{ ok: true, value: (function() {{ {script} }})() }}; }}
    catch (err) {{ return {{ ok: false, error: String(err) }}; }}
}})()"#
        ),
    }
}

fn json_str(value: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Script(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_js_css_embeds_escaped_selector() {
        let js = discovery_js(&Selector::css(r#"a[title="x"]"#), None, 3).unwrap();
        assert!(js.contains("scope.querySelectorAll"));
        assert!(js.contains(r#""a[title=\"x\"]""#));
        assert!(js.contains(r#"setAttribute("data-patient-ref", "3-" + i)"#));
        assert!(js.contains("const scope = document;"));
    }

    #[test]
    fn discovery_js_id_becomes_attribute_selector() {
        let js = discovery_js(&Selector::id("login"), None, 0).unwrap();
        assert!(js.contains(r#"[id=\"login\"]"#));
    }

    #[test]
    fn discovery_js_xpath_uses_document_evaluate() {
        let js = discovery_js(&Selector::xpath("//div[@id='x']"), None, 1).unwrap();
        assert!(js.contains("document.evaluate"));
        assert!(js.contains("ORDERED_NODE_SNAPSHOT_TYPE"));
        assert!(js.contains(r#""//div[@id='x']""#));
    }

    #[test]
    fn discovery_js_scoped_resolves_parent_by_tag() {
        let js = discovery_js(&Selector::css("li"), Some("4-2"), 5).unwrap();
        assert!(js.contains(r#"document.querySelector('[data-patient-ref="4-2"]')"#));
        assert!(js.contains("if (!scope) return -1;"));
    }

    #[test]
    fn envelope_js_binds_el_when_tagged() {
        let js = envelope_js("el.scrollIntoView();", Some("2-0"));
        assert!(js.contains(r#"'[data-patient-ref="2-0"]'"#));
        assert!(js.contains("stale element: 2-0"));
        assert!(js.contains("(function(el) { el.scrollIntoView(); })(el)"));
    }

    #[test]
    fn envelope_js_page_level_has_no_lookup() {
        let js = envelope_js("return document.title;", None);
        assert!(!js.contains("data-patient-ref"));
        assert!(js.contains("(function() { return document.title; })()"));
    }
}
