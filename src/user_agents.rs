//! Client identity strings grouped by platform and browser family

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserAgentError {
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Unknown browser: {0}")]
    UnknownBrowser(String),

    #[error("No user agent for {platform}/{browser}")]
    NoMatch { platform: String, browser: String },
}

impl From<UserAgentError> for crate::error::HarvestError {
    fn from(e: UserAgentError) -> Self {
        crate::error::HarvestError::Lookup(e.to_string())
    }
}

const BUILTIN_AGENTS: &[(&str, &str, &str)] = &[
    ("windows", "chrome", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
    ("windows", "chrome", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36"),
    ("windows", "firefox", "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0"),
    ("windows", "firefox", "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0"),
    ("windows", "edge", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0"),
    ("macos", "chrome", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
    ("macos", "safari", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15"),
    ("macos", "firefox", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0"),
    ("macos", "edge", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0"),
    ("linux", "chrome", "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
    ("linux", "firefox", "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0"),
    ("linux", "firefox", "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0"),
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "zh-CN,zh;q=0.9,en;q=0.8",
    "zh-CN,zh;q=0.9",
    "zh-CN,zh-TW;q=0.9,zh;q=0.8,en-US;q=0.7,en;q=0.6",
    "en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7",
];

const ACCEPT_ENCODINGS: &[&str] = &["gzip, deflate, br", "gzip, deflate", "br, gzip, deflate"];

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";

/// Pool of user agents keyed by platform, then browser
pub struct UserAgentPool {
    agents: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    rotation: AtomicUsize,
}

impl UserAgentPool {
    pub fn new() -> Self {
        let mut pool = Self {
            agents: BTreeMap::new(),
            rotation: AtomicUsize::new(0),
        };
        for (platform, browser, ua) in BUILTIN_AGENTS {
            pool.add_user_agent(platform, browser, ua);
        }
        pool
    }

    fn all(&self) -> Vec<&str> {
        self.agents
            .values()
            .flat_map(|browsers| browsers.values())
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Uniform pick over the whole pool
    pub fn random(&self) -> String {
        let all = self.all();
        all.choose(&mut rand::thread_rng())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    pub fn by_platform(&self, platform: &str) -> Result<String, UserAgentError> {
        let browsers = self
            .agents
            .get(&platform.to_lowercase())
            .ok_or_else(|| UserAgentError::UnknownPlatform(platform.to_string()))?;
        let candidates: Vec<&String> = browsers.values().flatten().collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|s| s.to_string())
            .ok_or_else(|| UserAgentError::UnknownPlatform(platform.to_string()))
    }

    pub fn by_browser(&self, browser: &str) -> Result<String, UserAgentError> {
        let browser = browser.to_lowercase();
        let candidates: Vec<&String> = self
            .agents
            .values()
            .filter_map(|b| b.get(&browser))
            .flatten()
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|s| s.to_string())
            .ok_or(UserAgentError::UnknownBrowser(browser))
    }

    /// Agent for an exact platform/browser pair
    pub fn get(&self, platform: &str, browser: &str) -> Result<String, UserAgentError> {
        let browsers = self
            .agents
            .get(&platform.to_lowercase())
            .ok_or_else(|| UserAgentError::UnknownPlatform(platform.to_string()))?;
        if !self.browsers().iter().any(|b| b.eq_ignore_ascii_case(browser)) {
            return Err(UserAgentError::UnknownBrowser(browser.to_string()));
        }
        browsers
            .get(&browser.to_lowercase())
            .and_then(|list| list.choose(&mut rand::thread_rng()))
            .cloned()
            .ok_or_else(|| UserAgentError::NoMatch {
                platform: platform.to_string(),
                browser: browser.to_string(),
            })
    }

    /// Sequential walk over the pool, wrapping around
    pub fn rotate(&self) -> String {
        let all = self.all();
        if all.is_empty() {
            return String::new();
        }
        let idx = self.rotation.fetch_add(1, Ordering::Relaxed) % all.len();
        all[idx].to_string()
    }

    /// A full browser-like header set around a random agent
    pub fn full_headers(&self, extra: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut rng = rand::thread_rng();
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), self.random());
        headers.insert("Accept".to_string(), ACCEPT_HTML.to_string());
        headers.insert(
            "Accept-Language".to_string(),
            ACCEPT_LANGUAGES[rng.gen_range(0..ACCEPT_LANGUAGES.len())].to_string(),
        );
        headers.insert(
            "Accept-Encoding".to_string(),
            ACCEPT_ENCODINGS[rng.gen_range(0..ACCEPT_ENCODINGS.len())].to_string(),
        );
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());
        headers.insert("Sec-Fetch-Dest".to_string(), "document".to_string());
        headers.insert("Sec-Fetch-Mode".to_string(), "navigate".to_string());
        headers.insert("Sec-Fetch-Site".to_string(), "none".to_string());
        headers.insert("Sec-Fetch-User".to_string(), "?1".to_string());
        headers.insert("Cache-Control".to_string(), "max-age=0".to_string());
        if let Some(extra) = extra {
            for (k, v) in extra {
                headers.insert(k.clone(), v.clone());
            }
        }
        headers
    }

    pub fn add_user_agent(&mut self, platform: &str, browser: &str, ua: &str) {
        let list = self
            .agents
            .entry(platform.to_lowercase())
            .or_default()
            .entry(browser.to_lowercase())
            .or_default();
        if !list.iter().any(|existing| existing == ua) {
            list.push(ua.to_string());
        }
    }

    pub fn pool_size(&self) -> usize {
        self.all().len()
    }

    pub fn platforms(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn browsers(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .agents
            .values()
            .flat_map(|b| b.keys().cloned())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new()
    }
}
