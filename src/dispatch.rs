//! Bounded retry loop around the transport, driving key rotation.
//!
//! One `send` call owns the whole lifecycle of a logical request: pick a
//! key, perform the call, classify the outcome, and either return, rotate
//! to the next key, back off and retry, or give up. Retry state lives in
//! the loop, never on the call stack.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    keypool::KeyPool,
    Chatbot, Message, Reply,
};

/// Phrases in error bodies that indicate a per-key usage limit rather
/// than a malformed request. Checked only when the status alone is not
/// conclusive.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "resource_exhausted",
    "resource has been exhausted",
    "rate limit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    QuotaExceeded,
    Transient,
    Fatal,
}

/// Classify one HTTP outcome. Status first; the body is only consulted
/// for the ambiguous non-429 client errors some backends use for quota
/// refusals.
#[inline]
#[must_use]
pub fn classify(status: u16, body: &str) -> Classification {
    match status {
        200..=299 => Classification::Success,
        429 => Classification::QuotaExceeded,
        408 | 500..=599 => Classification::Transient,
        _ if mentions_quota(body) => Classification::QuotaExceeded,
        _ => Classification::Fatal,
    }
}

fn mentions_quota(body: &str) -> bool {
    let lower = body.to_lowercase();
    QUOTA_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Wait policy between retries of the same logical request.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub enum RetryDelay {
    Fixed(Duration),
    /// Doubles per attempt, starting from `base`, never exceeding `cap`.
    Escalating { base: Duration, cap: Duration },
}

impl RetryDelay {
    #[inline]
    #[must_use]
    pub fn for_attempt(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Escalating { base, cap } => {
                let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(cap)
            }
        }
    }
}

/// Predicate consulted before declaring an outcome fatal, for callers
/// that know their backend better than the generic table does.
pub type TransientPredicate = dyn Fn(u16, &str) -> bool + Send + Sync;

pub struct DispatchOptions {
    pub max_attempts: u32,
    pub retry_delay: RetryDelay,
    pub treat_as_transient: Option<Box<TransientPredicate>>,
}

impl Default for DispatchOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 6,
            retry_delay: RetryDelay::Fixed(Duration::from_millis(750)),
            treat_as_transient: None,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(
        "Every API key in the pool has hit its quota. Add fresh keys or \
         wait for the provider to reset."
    )]
    PoolExhausted,
    #[error(
        "No reply after {attempts} attempts; the service appears to be \
         unavailable. Try again in a moment."
    )]
    AttemptsExhausted { attempts: u32 },
    #[error("The API rejected the request as invalid (HTTP {status}): {detail}")]
    FatalRequest { status: u16, detail: String },
}

pub struct Dispatcher {
    pool: Arc<KeyPool>,
    chatbot: Box<dyn Chatbot>,
    options: DispatchOptions,
}

impl Dispatcher {
    #[inline]
    #[must_use]
    pub fn new(
        pool: Arc<KeyPool>,
        chatbot: Box<dyn Chatbot>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            pool,
            chatbot,
            options,
        }
    }

    #[inline]
    #[must_use]
    pub fn chatbot(&self) -> &dyn Chatbot {
        &*self.chatbot
    }

    #[inline]
    #[must_use]
    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    /// Dispatch one logical request. Quota refusals rotate to the next
    /// key without waiting, transient faults back off and retry on the
    /// same rotation, fatal outcomes stop immediately. Dropping the
    /// returned future abandons the in-flight attempt; keys already
    /// disabled stay disabled.
    pub async fn send(
        &self,
        messages: &[Message],
    ) -> Result<Reply, DispatchError> {
        let mut attempts = 0_u32;

        while attempts < self.options.max_attempts {
            let key = self
                .pool
                .next()
                .map_err(|_| DispatchError::PoolExhausted)?;

            let raw = match self.chatbot.exchange(messages, key.as_str()).await
            {
                Ok(raw) => raw,
                Err(fault) => {
                    attempts += 1;
                    warn!(
                        attempt = attempts,
                        error = %fault,
                        "transport fault, retrying"
                    );
                    self.back_off(attempts).await;
                    continue;
                }
            };

            match classify(raw.status, &raw.body) {
                Classification::Success => {
                    match self.chatbot.extract(&raw.body) {
                        Ok(reply) => return Ok(reply),
                        Err(err) => {
                            // A 2xx we cannot read is treated like any
                            // other garbled exchange.
                            attempts += 1;
                            warn!(
                                attempt = attempts,
                                error = %err,
                                "unreadable reply body, retrying"
                            );
                            self.back_off(attempts).await;
                        }
                    }
                }
                Classification::QuotaExceeded => {
                    self.pool.mark_disabled(&key);
                    attempts += 1;
                    // No wait here: the next key is rate-limited
                    // independently of this one.
                }
                Classification::Transient => {
                    attempts += 1;
                    debug!(
                        attempt = attempts,
                        status = raw.status,
                        "transient upstream error, retrying"
                    );
                    self.back_off(attempts).await;
                }
                Classification::Fatal => {
                    if let Some(ref predicate) =
                        self.options.treat_as_transient
                    {
                        if predicate(raw.status, &raw.body) {
                            attempts += 1;
                            self.back_off(attempts).await;
                            continue;
                        }
                    }
                    return Err(DispatchError::FatalRequest {
                        status: raw.status,
                        detail: excerpt(&raw.body),
                    });
                }
            }
        }

        Err(DispatchError::AttemptsExhausted {
            attempts: self.options.max_attempts,
        })
    }

    async fn back_off(&self, attempts: u32) {
        // No point sleeping when the budget is already spent.
        if attempts < self.options.max_attempts {
            sleep(self.options.retry_delay.for_attempt(attempts)).await;
        }
    }
}

/// Trim an error body down to something fit for a terminal message.
fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        trimmed.to_owned()
    } else {
        let cut = trimmed
            .char_indices()
            .take_while(|&(idx, _)| idx < MAX)
            .last()
            .map_or(0, |(idx, ch)| idx + ch.len_utf8());
        format!("{}…", &trimmed[..cut])
    }
}

#[cfg(test)]
mod tests {
    #![expect(
        clippy::unwrap_used,
        reason = "Tests should panic on failure."
    )]

    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{ExtractError, RawReply, Role, TransportFault};

    /// Transport stub that plays back a programmed sequence of outcomes
    /// and records which key each attempt used.
    struct ScriptedChatbot {
        script: Mutex<Vec<Step>>,
        keys_used: Arc<Mutex<Vec<String>>>,
    }

    enum Step {
        Reply(u16, &'static str),
        Fault(TransportFault),
    }

    impl ScriptedChatbot {
        fn new(mut script: Vec<Step>, keys_used: Arc<Mutex<Vec<String>>>) -> Self {
            // Popped from the back.
            script.reverse();
            Self {
                script: Mutex::new(script),
                keys_used,
            }
        }
    }

    #[async_trait]
    impl Chatbot for ScriptedChatbot {
        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn exchange(
            &self,
            _messages: &[Message],
            key: &str,
        ) -> Result<RawReply, TransportFault> {
            self.keys_used.lock().unwrap().push(key.to_owned());
            match self.script.lock().unwrap().pop() {
                Some(Step::Reply(status, body)) => {
                    Ok(RawReply::new(status, body.to_owned()))
                }
                Some(Step::Fault(fault)) => Err(fault),
                None => Ok(RawReply::new(200, OK_BODY.to_owned())),
            }
        }

        fn extract(&self, body: &str) -> Result<Reply, ExtractError> {
            if body == OK_BODY {
                Ok(Reply {
                    text: "scripted reply".to_owned(),
                    citations: Vec::new(),
                })
            } else {
                Err(ExtractError::NoCandidates)
            }
        }
    }

    const OK_BODY: &str = "ok";
    const QUOTA_BODY: &str =
        r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded"}}"#;

    fn pool_of(n: usize) -> Arc<KeyPool> {
        let raw = (0..n)
            .map(|i| format!("AIza{i:035}"))
            .collect::<Vec<_>>()
            .join("\n");
        Arc::new(KeyPool::load(&raw))
    }

    fn options() -> DispatchOptions {
        DispatchOptions {
            max_attempts: 6,
            retry_delay: RetryDelay::Fixed(Duration::ZERO),
            treat_as_transient: None,
        }
    }

    fn dispatcher(
        pool: &Arc<KeyPool>,
        script: Vec<Step>,
        options: DispatchOptions,
    ) -> (Dispatcher, Arc<KeyPool>, Arc<Mutex<Vec<String>>>) {
        let pool = Arc::clone(pool);
        let keys_used = Arc::new(Mutex::new(Vec::new()));
        (
            Dispatcher::new(
                Arc::clone(&pool),
                Box::new(ScriptedChatbot::new(script, Arc::clone(&keys_used))),
                options,
            ),
            pool,
            keys_used,
        )
    }

    fn user_message() -> Vec<Message> {
        vec![Message::new(Role::User, "hello".to_owned())]
    }

    #[tokio::test]
    async fn first_try_success_leaves_pool_untouched() {
        let (dispatcher, pool, keys_used) = dispatcher(
            &pool_of(3),
            vec![Step::Reply(200, OK_BODY)],
            options(),
        );

        let reply = dispatcher.send(&user_message()).await.unwrap();

        assert_eq!(reply.text, "scripted reply");
        assert_eq!(pool.disabled_count(), 0);
        assert_eq!(keys_used.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn quota_rotates_keys_then_succeeds_on_third() {
        let (dispatcher, pool, keys_used) = dispatcher(
            &pool_of(3),
            vec![
                Step::Reply(429, QUOTA_BODY),
                Step::Reply(429, QUOTA_BODY),
                Step::Reply(200, OK_BODY),
            ],
            options(),
        );

        let reply = dispatcher.send(&user_message()).await.unwrap();

        assert_eq!(reply.text, "scripted reply");
        assert_eq!(pool.disabled_count(), 2);

        // Three attempts, each on a different key of the rotation.
        let used = keys_used.lock().unwrap();
        assert_eq!(used.len(), 3);
        assert_eq!(used[0], format!("AIza{:035}", 0));
        assert_eq!(used[1], format!("AIza{:035}", 1));
        assert_eq!(used[2], format!("AIza{:035}", 2));
    }

    #[tokio::test]
    async fn persistent_transient_errors_exhaust_the_budget() {
        let script =
            (0..6).map(|_| Step::Reply(503, "unavailable")).collect();
        let (dispatcher, pool, keys_used) =
            dispatcher(&pool_of(2), script, options());

        let err = dispatcher.send(&user_message()).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::AttemptsExhausted { attempts: 6 }
        ));
        assert_eq!(pool.disabled_count(), 0);
        assert_eq!(keys_used.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn fatal_error_stops_after_one_attempt() {
        let (dispatcher, pool, keys_used) = dispatcher(
            &pool_of(3),
            vec![Step::Reply(400, "invalid argument")],
            options(),
        );

        let err = dispatcher.send(&user_message()).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::FatalRequest { status: 400, .. }
        ));
        assert_eq!(pool.disabled_count(), 0);
        assert_eq!(keys_used.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn draining_the_pool_reports_exhaustion() {
        // Two keys, quota refusals for both, budget would allow more.
        let script =
            (0..3).map(|_| Step::Reply(429, QUOTA_BODY)).collect();
        let (dispatcher, pool, keys_used) =
            dispatcher(&pool_of(2), script, options());

        let err = dispatcher.send(&user_message()).await.unwrap_err();

        assert!(matches!(err, DispatchError::PoolExhausted));
        assert_eq!(pool.disabled_count(), 2);
        assert_eq!(keys_used.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transport_faults_retry_without_disabling() {
        let (dispatcher, pool, _keys_used) = dispatcher(
            &pool_of(2),
            vec![
                Step::Fault(TransportFault::Timeout),
                Step::Fault(TransportFault::Network("reset".to_owned())),
                Step::Reply(200, OK_BODY),
            ],
            options(),
        );

        let reply = dispatcher.send(&user_message()).await.unwrap();

        assert_eq!(reply.text, "scripted reply");
        assert_eq!(pool.disabled_count(), 0);
    }

    #[tokio::test]
    async fn unreadable_success_body_is_retried() {
        let (dispatcher, pool, _keys_used) = dispatcher(
            &pool_of(2),
            vec![Step::Reply(200, "garbage"), Step::Reply(200, OK_BODY)],
            options(),
        );

        let reply = dispatcher.send(&user_message()).await.unwrap();

        assert_eq!(reply.text, "scripted reply");
        assert_eq!(pool.disabled_count(), 0);
    }

    #[tokio::test]
    async fn treat_as_transient_overrides_fatal() {
        let mut opts = options();
        opts.treat_as_transient =
            Some(Box::new(|status, _body| status == 404));
        let (dispatcher, _pool, _keys_used) = dispatcher(
            &pool_of(2),
            vec![Step::Reply(404, "not found"), Step::Reply(200, OK_BODY)],
            opts,
        );

        assert!(dispatcher.send(&user_message()).await.is_ok());
    }

    #[test]
    fn classify_2xx_is_success() {
        assert_eq!(classify(200, ""), Classification::Success);
        assert_eq!(classify(204, ""), Classification::Success);
    }

    #[test]
    fn classify_429_is_quota() {
        assert_eq!(
            classify(429, "rate limited"),
            Classification::QuotaExceeded
        );
    }

    #[test]
    fn classify_5xx_and_408_are_transient() {
        assert_eq!(classify(500, ""), Classification::Transient);
        assert_eq!(classify(502, ""), Classification::Transient);
        assert_eq!(classify(503, ""), Classification::Transient);
        assert_eq!(classify(408, ""), Classification::Transient);
    }

    #[test]
    fn classify_other_4xx_is_fatal() {
        assert_eq!(classify(400, "bad request"), Classification::Fatal);
        assert_eq!(classify(404, "not found"), Classification::Fatal);
    }

    #[test]
    fn classify_4xx_with_quota_body_is_quota() {
        assert_eq!(
            classify(403, r#"{"message":"Quota exceeded for project"}"#),
            Classification::QuotaExceeded
        );
        assert_eq!(
            classify(403, "RESOURCE_EXHAUSTED"),
            Classification::QuotaExceeded
        );
    }

    #[test]
    fn escalating_delay_doubles_and_caps() {
        let delay = RetryDelay::Escalating {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(500),
        };

        assert_eq!(delay.for_attempt(1), Duration::from_millis(100));
        assert_eq!(delay.for_attempt(2), Duration::from_millis(200));
        assert_eq!(delay.for_attempt(3), Duration::from_millis(400));
        assert_eq!(delay.for_attempt(4), Duration::from_millis(500));
        assert_eq!(delay.for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn excerpt_truncates_long_bodies() {
        let long = "x".repeat(400);
        let short = excerpt(&long);

        assert!(short.chars().count() <= 201);
        assert!(short.ends_with('…'));
        assert_eq!(excerpt("short"), "short");
    }
}
