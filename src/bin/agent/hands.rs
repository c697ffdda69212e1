use anyhow::{Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct LaunchSettings {
    pub debug_url: String,
    pub headless: bool,
    pub profile_dir: Option<PathBuf>,
    pub studio_url: String,
}

/// Persistent browser session. Created once, reused for all tasks.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attach to a Chrome already signed in to Studio, else launch one on a
    /// persistent profile so the sign-in survives restarts.
    pub fn launch(settings: &LaunchSettings) -> Result<Self> {
        info!(url = %settings.debug_url, "attempting to attach to existing Chrome");
        let (browser, tab) = match Browser::connect(settings.debug_url.clone()) {
            Ok(browser) => {
                info!("attached to existing Chrome");
                let tab = studio_tab(&browser)?;
                (browser, tab)
            }
            Err(e) => {
                warn!(error = %e, "could not attach, launching Chrome");
                let browser = launch_with_profile(settings)?;
                let tab = browser.new_tab()?;
                (browser, tab)
            }
        };

        if !tab.get_url().contains("studio.youtube.com") {
            info!(url = %settings.studio_url, "opening YouTube Studio");
            tab.navigate_to(&settings.studio_url)?;
            tab.wait_until_navigated()?;
        }

        info!("Chrome ready");
        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

/// Existing Studio tab if there is one, else the first tab, else a new one.
fn studio_tab(browser: &Browser) -> Result<Arc<Tab>> {
    let existing = {
        let tabs = browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list lock poisoned"))?;
        tabs.iter()
            .find(|t| t.get_url().contains("studio.youtube.com"))
            .or_else(|| tabs.first())
            .cloned()
    };

    match existing {
        Some(tab) => {
            info!(url = %tab.get_url(), "using existing tab");
            Ok(tab)
        }
        None => {
            info!("no tabs found, creating new one");
            browser.new_tab()
        }
    }
}

fn launch_with_profile(settings: &LaunchSettings) -> Result<Browser> {
    let profile = settings.profile_dir.clone().unwrap_or_else(default_profile_dir);
    if !profile.exists() {
        info!(path = %profile.display(), "creating agent profile, sign in to Studio once");
        std::fs::create_dir_all(&profile)?;
    } else {
        info!(path = %profile.display(), "using persistent agent profile");
    }

    let options = LaunchOptions {
        headless: settings.headless,
        path: find_chrome(),
        user_data_dir: Some(profile),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--password-store=basic"),
        ],
        // A capture can poll for ten minutes or more.
        idle_browser_timeout: Duration::from_secs(30 * 60),
        ..Default::default()
    };

    Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {e}"))
}

fn default_profile_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("ask-studio-agent"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chrome-profile")
}

/// Well-known install locations. `None` leaves detection to headless_chrome.
fn find_chrome() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_PATH") {
        return Some(PathBuf::from(path));
    }

    let mut candidates = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join(r"Google\Chrome\Application\chrome.exe"));
    }

    candidates.into_iter().find(|p| p.exists())
}
