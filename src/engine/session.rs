//! Session pool with health-based identity rotation.
//!
//! A session bundles everything one "browser identity" carries between
//! requests: a dedicated HTTP client with its own cookie jar, a user agent
//! string, and an optional proxy. The pool hands sessions out round-robin
//! under a semaphore, tracks a health score per session, and retires
//! identities that have been burned by repeated blocks.
//!
//! Health arithmetic:
//! - Success: +1, capped at the starting value
//! - Soft block: -2
//! - Network or hard error: -1
//! - At or below zero the session is retired on release and replaced with
//!   a freshly built identity, so the pool size never shrinks

use crate::config::IdentityConfig;
use crate::engine::Outcome;
use crate::{Result, SoukError};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, DNT};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Health score assigned to a freshly built session, also the cap
/// that success rewards cannot push a session past.
const INITIAL_HEALTH: i32 = 5;

/// Health deduction for a soft block. Twice the error penalty because a
/// block is direct evidence the identity itself has been flagged.
const SOFT_BLOCK_PENALTY: i32 = 2;

/// Health deduction for a network failure or hard error.
const ERROR_PENALTY: i32 = 1;

/// Connect timeout applied to every session client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fallback Accept-Language when the configured value is not a valid
/// header value.
const FALLBACK_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// One browser identity: a dedicated HTTP client (with its own cookie
/// jar), a user agent, and an optional proxy.
///
/// Sessions are owned by the [`SessionPool`] and only leave it wrapped in
/// a [`SessionLease`].
pub struct Session {
    id: u64,
    client: reqwest::Client,
    user_agent: String,
    proxy: Option<String>,
    health: i32,
    last_used: Option<Instant>,
}

impl Session {
    /// Returns the pool-unique identifier of this session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the HTTP client bound to this session's identity.
    ///
    /// All requests made through this client share the session's cookie
    /// jar, user agent, and proxy.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Returns the user agent string this session presents.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns the proxy URL this session routes through, if any.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Returns the current health score.
    pub fn health(&self) -> i32 {
        self.health
    }

    /// Returns when this session was last returned to the pool.
    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("health", &self.health)
            .field("proxy", &self.proxy)
            .finish()
    }
}

/// An acquired session together with the semaphore permit that reserves
/// its pool slot.
///
/// The permit is held for the lease's lifetime and released back to the
/// pool inside [`SessionPool::release`], after the session has been
/// requeued or replaced. Every lease must be handed back through
/// `release`; the worker loop does so on every code path.
pub struct SessionLease {
    session: Session,
    permit: OwnedSemaphorePermit,
}

impl SessionLease {
    /// Returns the leased session.
    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// Interior state shared behind the pool mutex.
struct PoolInner {
    /// Idle sessions, in rotation order. `pop_front` on acquire and
    /// `push_back` on release cycle identities evenly.
    idle: VecDeque<Session>,
    /// Next identifier to assign to a replacement session.
    next_id: u64,
    /// Round-robin cursor into the configured proxy list.
    proxy_cursor: usize,
    /// Total sessions retired over the pool's lifetime.
    retired: u64,
}

/// Fixed-size pool of rotating sessions.
///
/// `acquire` blocks (asynchronously) while all sessions are checked out,
/// providing natural backpressure when there are more workers than
/// identities. Unhealthy sessions never survive `release`, so `acquire`
/// can only ever return a live identity.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> souk_scrape::Result<()> {
/// use souk_scrape::config::IdentityConfig;
/// use souk_scrape::engine::{Outcome, SessionPool};
///
/// let pool = SessionPool::new(4, IdentityConfig::default())?;
/// let lease = pool.acquire().await?;
/// // ... perform one request through lease.session().client() ...
/// pool.release(lease, Outcome::Success);
/// # Ok(())
/// # }
/// ```
pub struct SessionPool {
    identity: IdentityConfig,
    semaphore: Arc<Semaphore>,
    inner: Mutex<PoolInner>,
    size: usize,
}

impl SessionPool {
    /// Creates a pool of `size` sessions, each with a distinct identity.
    ///
    /// Proxies, when configured, are dealt round-robin so a pool larger
    /// than the proxy list reuses proxies evenly.
    pub fn new(size: usize, identity: IdentityConfig) -> Result<Self> {
        let mut idle = VecDeque::with_capacity(size);
        let mut proxy_cursor = 0;
        for id in 1..=size as u64 {
            idle.push_back(build_session(id, &identity, &mut proxy_cursor)?);
        }
        tracing::debug!(size, "session pool ready");
        Ok(Self {
            identity,
            semaphore: Arc::new(Semaphore::new(size)),
            inner: Mutex::new(PoolInner {
                idle,
                next_id: size as u64 + 1,
                proxy_cursor,
                retired: 0,
            }),
            size,
        })
    }

    /// Checks a session out of the pool, waiting until one is idle.
    pub async fn acquire(&self) -> Result<SessionLease> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SoukError::Engine("session pool closed".into()))?;

        let session = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .idle
                .pop_front()
                .ok_or_else(|| SoukError::Engine("session pool empty with permit held".into()))?
        };
        tracing::trace!(session = session.id, health = session.health, "session acquired");
        Ok(SessionLease { session, permit })
    }

    /// Returns a session to the pool, applying the outcome of the request
    /// it just served.
    ///
    /// A session whose health drops to zero or below is retired and
    /// replaced with a freshly built identity before the slot is released,
    /// so the pool never shrinks and a retired session can never be
    /// acquired again.
    pub fn release(&self, lease: SessionLease, outcome: Outcome) {
        let SessionLease {
            mut session,
            permit,
        } = lease;

        session.health = match outcome {
            Outcome::Success => (session.health + 1).min(INITIAL_HEALTH),
            Outcome::SoftBlock => session.health - SOFT_BLOCK_PENALTY,
            Outcome::NetworkError | Outcome::HardError => session.health - ERROR_PENALTY,
        };
        session.last_used = Some(Instant::now());

        let mut inner = self.inner.lock().unwrap();
        if session.health <= 0 {
            let id = inner.next_id;
            inner.next_id += 1;
            match build_session(id, &self.identity, &mut inner.proxy_cursor) {
                Ok(fresh) => {
                    tracing::info!(
                        retired = session.id,
                        replacement = fresh.id,
                        "session retired after repeated blocks"
                    );
                    inner.retired += 1;
                    inner.idle.push_back(fresh);
                }
                Err(err) => {
                    // The pool must keep its size; if a replacement cannot
                    // be built, reset the burned session instead.
                    tracing::error!(
                        session = session.id,
                        error = %err,
                        "failed to build replacement session, resetting existing identity"
                    );
                    session.health = INITIAL_HEALTH;
                    inner.idle.push_back(session);
                }
            }
        } else {
            tracing::trace!(session = session.id, health = session.health, "session released");
            inner.idle.push_back(session);
        }
        drop(inner);
        drop(permit);
    }

    /// Returns the configured pool size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns how many sessions have been retired so far.
    pub fn retired_count(&self) -> u64 {
        self.inner.lock().unwrap().retired
    }
}

/// Builds one session with a randomly chosen user agent and the next
/// proxy in rotation.
fn build_session(
    id: u64,
    identity: &IdentityConfig,
    proxy_cursor: &mut usize,
) -> Result<Session> {
    let user_agent = pick_user_agent(&identity.user_agents);

    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    let accept_language = match HeaderValue::from_str(&identity.accept_language) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(
                value = %identity.accept_language,
                "invalid accept-language, using fallback"
            );
            HeaderValue::from_static(FALLBACK_ACCEPT_LANGUAGE)
        }
    };
    headers.insert(ACCEPT_LANGUAGE, accept_language);
    headers.insert(DNT, HeaderValue::from_static("1"));

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent.clone())
        .default_headers(headers)
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(10));

    let proxy = if identity.proxies.is_empty() {
        None
    } else {
        let url = identity.proxies[*proxy_cursor % identity.proxies.len()].clone();
        *proxy_cursor += 1;
        builder = builder.proxy(reqwest::Proxy::all(&url)?);
        Some(url)
    };

    let client = builder.build()?;
    Ok(Session {
        id,
        client,
        user_agent,
        proxy,
        health: INITIAL_HEALTH,
        last_used: None,
    })
}

/// Picks a user agent at random from the configured list.
///
/// Configuration validation guarantees the list is non-empty.
fn pick_user_agent(user_agents: &[String]) -> String {
    match user_agents.len() {
        0 => concat!("souk-scrape/", env!("CARGO_PKG_VERSION")).to_string(),
        1 => user_agents[0].clone(),
        n => user_agents[rand::random_range(0..n)].clone(),
    }
}
