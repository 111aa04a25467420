//! Retry and timeout policy normalization
//!
//! Policies arrive from GatewayHost route fields, ingress annotations or
//! retry/timeout route filters. All of them end up as a [`RetryPolicy`] or
//! [`TimeoutPolicy`] whose timeouts are explicit about "unset" and "never".

use crate::domain::{
    annotations, RetryFilterConfig, RetryPolicySpec, TimeoutFilterConfig, TimeoutPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::time::Duration;

/// Retry condition used when a structured policy names none
pub const DEFAULT_RETRY_ON: &str = "5xx";

/// A normalized timeout value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Leave the proxy default in place
    #[default]
    UseDefault,
    /// No timeout at all
    Infinity,
    After(Duration),
}

impl Timeout {
    pub fn is_default(&self) -> bool {
        matches!(self, Timeout::UseDefault)
    }
}

/// Parse a timeout string.
///
/// An empty string (or a zero duration) keeps the proxy default, the
/// literal `infinity` disables the timeout and so does any string that is
/// not a valid duration.
pub fn parse_timeout(value: &str) -> Timeout {
    let value = value.trim();
    if value.is_empty() {
        return Timeout::UseDefault;
    }
    if value == "infinity" {
        return Timeout::Infinity;
    }

    match parse_duration(value) {
        Some(duration) if duration.is_zero() => Timeout::UseDefault,
        Some(duration) => Timeout::After(duration),
        None => Timeout::Infinity,
    }
}

fn parse_optional_timeout(value: Option<&str>) -> Timeout {
    value.map(parse_timeout).unwrap_or_default()
}

/// Parse a Go-style duration: `300ms`, `1.5h`, `1m30s`. A bare `0` is
/// accepted; negative durations are not.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let mut rest = value.strip_prefix('+').unwrap_or(value);
    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len =
            rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        nanos += number * scale;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_on: String,
    pub num_retries: u32,
    pub per_try_timeout: Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeoutPolicy {
    pub response: Timeout,
    pub idle: Timeout,
}

/// Retry policy of a GatewayHost route
pub fn retry_policy(spec: Option<&RetryPolicySpec>) -> Option<RetryPolicy> {
    let spec = spec?;
    Some(RetryPolicy {
        retry_on: DEFAULT_RETRY_ON.to_string(),
        num_retries: spec.count.max(1),
        per_try_timeout: parse_optional_timeout(spec.per_try_timeout.as_deref()),
    })
}

/// Timeout policy of a GatewayHost route
pub fn timeout_policy(spec: Option<&TimeoutPolicySpec>) -> Option<TimeoutPolicy> {
    let spec = spec?;
    Some(TimeoutPolicy {
        response: parse_optional_timeout(spec.response.as_deref()),
        idle: parse_optional_timeout(spec.idle.as_deref()),
    })
}

/// Retry policy carried by ingress annotations; the retry-on annotation
/// must be present and is used verbatim.
pub fn ingress_retry_policy(meta: &ObjectMeta) -> Option<RetryPolicy> {
    let retry_on = annotations::annotation(meta, annotations::RETRY_ON)?.trim();
    if retry_on.is_empty() {
        return None;
    }

    Some(RetryPolicy {
        retry_on: retry_on.to_string(),
        num_retries: annotations::parse_u32(meta, annotations::NUM_RETRIES).max(1),
        per_try_timeout: parse_optional_timeout(annotations::annotation(
            meta,
            annotations::PER_TRY_TIMEOUT,
        )),
    })
}

/// Timeout policy carried by the request-timeout ingress annotation
pub fn ingress_timeout_policy(meta: &ObjectMeta) -> Option<TimeoutPolicy> {
    let response = annotations::annotation(meta, annotations::REQUEST_TIMEOUT)?;
    if response.trim().is_empty() {
        return None;
    }
    Some(TimeoutPolicy { response: parse_timeout(response), idle: Timeout::UseDefault })
}

/// Retry policy described by a retry route filter
pub fn retry_filter_policy(config: &RetryFilterConfig) -> RetryPolicy {
    let retry_on = config
        .retry_on
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_RETRY_ON);

    RetryPolicy {
        retry_on: retry_on.to_string(),
        num_retries: config.num_retries.max(1),
        per_try_timeout: parse_optional_timeout(config.per_try_timeout.as_deref()),
    }
}

/// Timeout policy described by a timeout route filter
pub fn timeout_filter_policy(config: &TimeoutFilterConfig) -> TimeoutPolicy {
    TimeoutPolicy {
        response: parse_optional_timeout(config.response.as_deref()),
        idle: parse_optional_timeout(config.idle.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn annotated(pairs: &[(&str, &str)]) -> ObjectMeta {
        let annotations: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ObjectMeta { annotations: Some(annotations), ..Default::default() }
    }

    #[test]
    fn timeout_sentinels() {
        assert_eq!(parse_timeout(""), Timeout::UseDefault);
        assert_eq!(parse_timeout("infinity"), Timeout::Infinity);
        assert_eq!(parse_timeout("bogus"), Timeout::Infinity);
        assert_eq!(parse_timeout("0s"), Timeout::UseDefault);
        assert_eq!(parse_timeout("1m30s"), Timeout::After(Duration::from_secs(90)));
    }

    #[test]
    fn go_style_durations() {
        assert_eq!(parse_duration("300ms"), Some(Duration::from_millis(300)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("2us"), Some(Duration::from_micros(2)));
        assert_eq!(parse_duration("10µs"), Some(Duration::from_micros(10)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("-1s"), None);
        assert_eq!(parse_duration("1d"), None);
        assert_eq!(parse_duration("s"), None);
    }

    #[test]
    fn structured_retry_defaults() {
        let policy =
            retry_policy(Some(&RetryPolicySpec { count: 0, per_try_timeout: None })).unwrap();
        assert_eq!(
            policy,
            RetryPolicy {
                retry_on: "5xx".to_string(),
                num_retries: 1,
                per_try_timeout: Timeout::UseDefault,
            }
        );
        assert!(retry_policy(None).is_none());
    }

    #[test]
    fn ingress_retry_requires_retry_on() {
        assert!(ingress_retry_policy(&annotated(&[(annotations::NUM_RETRIES, "3")])).is_none());

        let policy = ingress_retry_policy(&annotated(&[
            (annotations::RETRY_ON, "gateway-error"),
            (annotations::NUM_RETRIES, "3"),
            (annotations::PER_TRY_TIMEOUT, "150ms"),
        ]))
        .unwrap();
        assert_eq!(policy.retry_on, "gateway-error");
        assert_eq!(policy.num_retries, 3);
        assert_eq!(policy.per_try_timeout, Timeout::After(Duration::from_millis(150)));
    }

    #[test]
    fn ingress_timeout_from_request_timeout() {
        assert!(ingress_timeout_policy(&ObjectMeta::default()).is_none());
        let policy =
            ingress_timeout_policy(&annotated(&[(annotations::REQUEST_TIMEOUT, "infinity")]))
                .unwrap();
        assert_eq!(policy.response, Timeout::Infinity);
        assert_eq!(policy.idle, Timeout::UseDefault);
    }

    #[test]
    fn retry_filter_defaults_retry_on() {
        let policy = retry_filter_policy(&RetryFilterConfig {
            retry_on: Some(" ".to_string()),
            num_retries: 0,
            per_try_timeout: Some("2s".to_string()),
        });
        assert_eq!(policy.retry_on, "5xx");
        assert_eq!(policy.num_retries, 1);
        assert_eq!(policy.per_try_timeout, Timeout::After(Duration::from_secs(2)));
    }
}
