use std::time::Duration;

use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions};
use tracing::{debug, info};

/// Supplies fully-rendered page bodies for sources that assemble their
/// listings client-side, where a plain GET never sees the data.
pub trait PageRenderer: Send + Sync {
    fn rendered_body(&self, url: &str) -> Result<String>;
}

/// Headless-Chrome renderer. One browser per run, one tab per page.
pub struct ChromeRenderer {
    browser: Browser,
    element_wait: Duration,
}

impl ChromeRenderer {
    pub fn new() -> Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser,
            element_wait: Duration::from_secs(120),
        })
    }
}

impl PageRenderer for ChromeRenderer {
    fn rendered_body(&self, url: &str) -> Result<String> {
        let tab = self.browser.new_tab()?;

        tab.navigate_to(url)?;
        tab.wait_until_navigated()?;
        tab.wait_for_element_with_custom_timeout("script#__NEXT_DATA__", self.element_wait)?;

        // An email-alerts dialog interposes from the second results page
        // onward; dismiss it if present.
        let _ = tab.evaluate(
            r#"
            const button = document.querySelector("button[aria-label='Close dialog']");
            if (button) button.click();
            "#,
            false,
        );

        let html = tab.evaluate("document.documentElement.outerHTML", false)?;
        let body = html
            .value
            .and_then(|value| value.as_str().map(str::to_string))
            .context("Could not read page HTML")?;

        debug!(url, bytes = body.len(), "rendered page");
        Ok(body)
    }
}
