//! The browser automation capability the bot drives.
//!
//! [`Browser`] is deliberately blocking: attempts run strictly one after
//! another against one session. [`WebDriverBrowser`] implements it on top of
//! `fantoccini` by owning a current-thread `tokio` runtime.

use std::time::Duration;

use fantoccini::{elements::Element, Client, ClientBuilder};
use serde_json::json;
use tokio::runtime::Runtime;

use crate::error::{Result, SolveError};

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Css(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn class(class: impl AsRef<str>) -> Self {
        Locator::Css(format!(".{}", class.as_ref()))
    }

    fn as_webdriver(&self) -> fantoccini::Locator<'_> {
        match self {
            Locator::Id(id) => fantoccini::Locator::Id(id),
            Locator::Css(selector) => fantoccini::Locator::Css(selector),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{id}"),
            Locator::Css(selector) => f.write_str(selector),
        }
    }
}

pub trait Browser {
    fn goto(&mut self, url: &str) -> Result<()>;

    /// Blocks until `locator` matches, failing after `timeout`.
    fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<()>;

    fn click(&mut self, locator: &Locator) -> Result<()>;

    fn clear(&mut self, locator: &Locator) -> Result<()>;

    fn send_keys(&mut self, locator: &Locator, text: &str) -> Result<()>;

    /// PNG bytes of just the element's rendered box.
    fn screenshot_element(&mut self, locator: &Locator) -> Result<Vec<u8>>;

    /// PNG bytes of the whole viewport.
    fn screenshot(&mut self) -> Result<Vec<u8>>;

    fn page_source(&mut self) -> Result<String>;

    fn refresh(&mut self) -> Result<()>;

    /// Ends the session. Further calls fail.
    fn close(&mut self) -> Result<()>;
}

/// A WebDriver session (chromedriver, geckodriver, ...).
pub struct WebDriverBrowser {
    runtime: Runtime,
    client: Option<Client>,
}

impl WebDriverBrowser {
    /// Connects to a running WebDriver service, e.g. `http://localhost:9515`.
    pub fn connect(webdriver_url: &str, headless: bool) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let mut args = vec!["--window-size=1280,1024"];
        if headless {
            args.push("--headless");
            args.push("--disable-gpu");
        }
        let mut caps = serde_json::Map::new();
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));

        let client = runtime.block_on(
            ClientBuilder::native()
                .capabilities(caps)
                .connect(webdriver_url),
        )?;
        tracing::info!(%webdriver_url, headless, "browser session started");

        Ok(Self {
            runtime,
            client: Some(client),
        })
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| SolveError::Automation("browser session is closed".into()))
    }

    fn find(&self, locator: &Locator) -> Result<Element> {
        let client = self.client()?;
        self.runtime
            .block_on(client.find(locator.as_webdriver()))
            .map_err(|err| SolveError::Automation(format!("element {locator} not found: {err}")))
    }
}

impl Browser for WebDriverBrowser {
    fn goto(&mut self, url: &str) -> Result<()> {
        let client = self.client()?;
        Ok(self.runtime.block_on(client.goto(url))?)
    }

    fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<()> {
        let client = self.client()?;
        self.runtime
            .block_on(
                client
                    .wait()
                    .at_most(timeout)
                    .for_element(locator.as_webdriver()),
            )
            .map_err(|err| {
                SolveError::Automation(format!("waiting {timeout:?} for {locator}: {err}"))
            })?;
        Ok(())
    }

    fn click(&mut self, locator: &Locator) -> Result<()> {
        let element = self.find(locator)?;
        Ok(self.runtime.block_on(element.click())?)
    }

    fn clear(&mut self, locator: &Locator) -> Result<()> {
        let element = self.find(locator)?;
        Ok(self.runtime.block_on(element.clear())?)
    }

    fn send_keys(&mut self, locator: &Locator, text: &str) -> Result<()> {
        let element = self.find(locator)?;
        Ok(self.runtime.block_on(element.send_keys(text))?)
    }

    fn screenshot_element(&mut self, locator: &Locator) -> Result<Vec<u8>> {
        let element = self.find(locator)?;
        Ok(self.runtime.block_on(element.screenshot())?)
    }

    fn screenshot(&mut self) -> Result<Vec<u8>> {
        let client = self.client()?;
        Ok(self.runtime.block_on(client.screenshot())?)
    }

    fn page_source(&mut self) -> Result<String> {
        let client = self.client()?;
        Ok(self.runtime.block_on(client.source())?)
    }

    fn refresh(&mut self) -> Result<()> {
        let client = self.client()?;
        Ok(self.runtime.block_on(client.refresh())?)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            self.runtime.block_on(client.close())?;
            tracing::info!("browser session closed");
        }
        Ok(())
    }
}

impl Drop for WebDriverBrowser {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close browser session");
        }
    }
}
