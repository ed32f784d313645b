//! Retry / backoff (§4.7).
//!
//! The retry loop itself is decoupled from fallback-node invocation: it
//! only knows how to retry a single async closure and report exhaustion.
//! The executor owns looking up and invoking the fallback node (it alone
//! has the plan and registry), using [`primary_error_binding`] and
//! [`primary_input_binding`] to inject `$primaryError`/`$primaryInput`.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use wf_ast::node::{BackoffKind, ErrorConfig};

use crate::error::ExecutionEngineError;

/// Every attempt failed: how many were made, and the final error.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: ExecutionEngineError,
}

/// `delay(attempt) = base * {1, attempt, 2^(attempt-1)}` per backoff kind.
/// `attempt` is 1-based (the first retry is attempt 1).
pub fn backoff_delay(config: &ErrorConfig, attempt: u32) -> Duration {
    let base = config.backoff_base_ms;
    let ms = match config.backoff_kind {
        BackoffKind::Fixed => base,
        BackoffKind::Linear => base.saturating_mul(attempt as u64),
        BackoffKind::Exponential => {
            let exp = attempt.saturating_sub(1).min(62);
            base.saturating_mul(1u64 << exp)
        }
    };
    Duration::from_millis(ms)
}

/// Run `invoke` until it succeeds or `config.max_retries` retries have been
/// exhausted (so up to `max_retries + 1` total invocations). `invoke` is
/// passed the 0-based attempt number it is being called for.
pub async fn run_with_retry<F, Fut>(config: &ErrorConfig, mut invoke: F) -> Result<Value, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, ExecutionEngineError>>,
{
    let mut attempt = 0u32;
    loop {
        match invoke(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_break() => {
                return Err(RetryExhausted { attempts: attempt + 1, last_error: e });
            }
            Err(e) => {
                attempt += 1;
                if attempt <= config.max_retries {
                    tokio::time::sleep(backoff_delay(config, attempt)).await;
                    continue;
                }
                return Err(RetryExhausted { attempts: attempt, last_error: e });
            }
        }
    }
}

pub fn primary_error_binding(message: &str) -> Value {
    Value::String(message.to_string())
}

pub fn primary_input_binding(input: &Value) -> Value {
    input.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn cfg(max_retries: u32, backoff_kind: BackoffKind) -> ErrorConfig {
        ErrorConfig {
            max_retries,
            backoff_base_ms: 1,
            backoff_kind,
            fallback_node_id: None,
        }
    }

    #[test]
    fn exponential_backoff_doubles_each_attempt() {
        let c = cfg(5, BackoffKind::Exponential);
        assert_eq!(backoff_delay(&c, 1), Duration::from_millis(1));
        assert_eq!(backoff_delay(&c, 2), Duration::from_millis(2));
        assert_eq!(backoff_delay(&c, 3), Duration::from_millis(4));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let c = cfg(5, BackoffKind::Linear);
        assert_eq!(backoff_delay(&c, 3), Duration::from_millis(3));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let c = cfg(5, BackoffKind::Fixed);
        assert_eq!(backoff_delay(&c, 1), backoff_delay(&c, 4));
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let c = cfg(2, BackoffKind::Fixed);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = run_with_retry(&c, move |_attempt| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!("ok"))
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries_plus_one_attempts() {
        let c = cfg(2, BackoffKind::Fixed);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = run_with_retry(&c, move |_attempt| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionEngineError::NodeExecution {
                    node: "n".into(),
                    message: "boom".into(),
                })
            }
        })
        .await;
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
