//! Rotating pool of persistent HTTP sessions
//!
//! Each handle owns a `reqwest::Client` with its own cookie jar and a browser
//! identity drawn from the [`UserAgentPool`]. The pool hands out the current
//! handle, moving on once the rotation interval has elapsed.

use crate::error::HarvestError;
use crate::user_agents::UserAgentPool;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// One persistent session: identity headers, cookie jar, creation time
pub struct SessionHandle {
    pub headers: HashMap<String, String>,
    pub jar: Arc<Jar>,
    pub client: Client,
    pub created_at: Instant,
}

impl SessionHandle {
    fn build(
        agents: &UserAgentPool,
        cookies: &[(String, Url)],
    ) -> Result<Self, HarvestError> {
        let headers = agents.full_headers(None);
        let mut header_map = HeaderMap::new();
        for (name, value) in &headers {
            // Content negotiation is left to the client so it can decompress
            if name.eq_ignore_ascii_case("Accept-Encoding") {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                log::warn!("Skipping invalid session header {}", name);
                continue;
            };
            header_map.insert(name, value);
        }

        let jar = Arc::new(Jar::default());
        for (cookie, url) in cookies {
            jar.add_cookie_str(cookie, url);
        }

        let client = Client::builder()
            .default_headers(header_map)
            .cookie_provider(jar.clone())
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;

        Ok(Self {
            headers,
            jar,
            client,
            created_at: Instant::now(),
        })
    }

    pub fn user_agent(&self) -> &str {
        self.headers.get("User-Agent").map(String::as_str).unwrap_or("")
    }
}

struct PoolState {
    handles: Vec<Arc<SessionHandle>>,
    current: usize,
    last_rotation: Instant,
}

pub struct SessionPool {
    agents: Arc<UserAgentPool>,
    rotate_interval: Duration,
    state: Mutex<PoolState>,
    cookies: Mutex<Vec<(String, Url)>>,
}

impl SessionPool {
    pub fn new(
        agents: Arc<UserAgentPool>,
        count: usize,
        rotate_interval: Duration,
    ) -> Result<Self, HarvestError> {
        if count < 1 {
            return Err(HarvestError::Configuration(
                "session.count must be >= 1".to_string(),
            ));
        }
        if rotate_interval.is_zero() {
            return Err(HarvestError::Configuration(
                "session.rotateIntervalSeconds must be > 0".to_string(),
            ));
        }
        let handles = (0..count)
            .map(|_| SessionHandle::build(&agents, &[]).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Session pool ready with {} sessions", count);
        Ok(Self {
            agents,
            rotate_interval,
            state: Mutex::new(PoolState {
                handles,
                current: 0,
                last_rotation: Instant::now(),
            }),
            cookies: Mutex::new(Vec::new()),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current session, rotating first if the interval has elapsed
    pub fn current(&self) -> Arc<SessionHandle> {
        let mut state = self.state();
        if state.last_rotation.elapsed() >= self.rotate_interval {
            state.current = (state.current + 1) % state.handles.len();
            state.last_rotation = Instant::now();
            log::debug!("Rotated to session {}", state.current);
        }
        state.handles[state.current].clone()
    }

    /// Advance to the next session unconditionally
    pub fn force_rotate(&self) -> Arc<SessionHandle> {
        let mut state = self.state();
        state.current = (state.current + 1) % state.handles.len();
        state.last_rotation = Instant::now();
        log::info!("Forced rotation to session {}", state.current);
        state.handles[state.current].clone()
    }

    pub fn current_index(&self) -> usize {
        self.state().current
    }

    pub fn len(&self) -> usize {
        self.state().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set a cookie on every session, including ones rebuilt later
    pub fn add_cookie(&self, cookie: &str, url: &str) -> Result<(), HarvestError> {
        let url = Url::parse(url)
            .map_err(|e| HarvestError::Configuration(format!("invalid cookie url {}: {}", url, e)))?;
        for handle in &self.state().handles {
            handle.jar.add_cookie_str(cookie, &url);
        }
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((cookie.to_string(), url));
        Ok(())
    }

    /// Replace one handle with a fresh identity and jar
    pub fn refresh(&self, index: usize) -> Result<(), HarvestError> {
        let cookies = self
            .cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let fresh = Arc::new(SessionHandle::build(&self.agents, &cookies)?);
        let mut state = self.state();
        let len = state.handles.len();
        let slot = state.handles.get_mut(index).ok_or_else(|| {
            HarvestError::Lookup(format!("session index {} out of range (pool size {})", index, len))
        })?;
        *slot = fresh;
        Ok(())
    }
}
