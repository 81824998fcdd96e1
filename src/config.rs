use std::time::Duration;

use crate::chrome::ChromeDriver;
use crate::error::Result;
use crate::session::Session;

pub struct SessionConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub chrome_path: Option<String>,
    /// User-agent string passed through to the browser. Callers wanting a
    /// randomized agent pick one themselves and set it here.
    pub user_agent: Option<String>,
    /// Extra Chrome flags, without the leading `--`.
    pub extra_args: Vec<String>,
    /// Budget for operations where the caller does not pass one (default: 30s).
    pub default_timeout: Duration,
    /// Sleep between polling attempts (default: 500ms).
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            chrome_path: None,
            user_agent: None,
            extra_args: Vec::new(),
            default_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport_width = width;
        self.config.viewport_height = height;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<String>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    /// Pass a user-agent string through to the browser.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(agent.into());
        self
    }

    /// Add one extra Chrome flag (without the leading `--`).
    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    /// Set the default budget for operations where the caller does not pass one.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set the sleep between polling attempts.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn build_config(self) -> SessionConfig {
        self.config
    }

    /// Launch a Chrome-backed session with this configuration.
    pub async fn build(self) -> Result<Session<ChromeDriver>> {
        let config = self.build_config();
        let default_timeout = config.default_timeout;
        let poll_interval = config.poll_interval;
        let driver = ChromeDriver::launch(&config).await?;
        Session::start(driver, default_timeout, poll_interval).await
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
