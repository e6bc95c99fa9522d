//! Scripted in-memory fetcher.
//!
//! Responses are registered per URL; unregistered URLs and everything
//! fetched while offline fail with [`NetError::Offline`]. Every fetch is
//! recorded, including failed ones.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Script {
    Respond {
        status: StatusCode,
        body: Bytes,
        delay: Option<Duration>,
    },
    Fail,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, Script>,
    offline: bool,
    log: Vec<Request>,
}

/// A [`Fetcher`] that replays scripted outcomes.
#[derive(Default)]
pub struct ScriptedFetcher {
    state: Mutex<State>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: StatusCode, body: impl Into<Bytes>) -> &Self {
        self.state().scripts.insert(
            url.to_string(),
            Script::Respond {
                status,
                body: body.into(),
                delay: None,
            },
        );
        self
    }

    /// Answer `url` after sleeping for `delay`.
    pub fn respond_after(
        &self,
        url: &str,
        delay: Duration,
        status: StatusCode,
        body: impl Into<Bytes>,
    ) -> &Self {
        self.state().scripts.insert(
            url.to_string(),
            Script::Respond {
                status,
                body: body.into(),
                delay: Some(delay),
            },
        );
        self
    }

    /// Fail every fetch of `url`.
    pub fn fail(&self, url: &str) -> &Self {
        self.state().scripts.insert(url.to_string(), Script::Fail);
        self
    }

    /// Fail every fetch while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Number of fetches issued for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.state()
            .log
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    /// Number of fetches issued overall.
    pub fn total_calls(&self) -> usize {
        self.state().log.len()
    }

    /// Every request seen, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.state().log.clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let script = {
            let mut state = self.state();
            state.log.push(request.clone());
            if state.offline {
                None
            } else {
                state.scripts.get(request.url.as_str()).cloned()
            }
        };

        match script {
            Some(Script::Respond { status, body, delay }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let mut response = Response::new(status, body);
                response.url = Some(request.url.clone());
                Ok(response)
            }
            Some(Script::Fail) | None => Err(NetError::Offline(request.url.to_string())),
        }
    }
}
