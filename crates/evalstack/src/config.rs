use evalstack_capture::{CaptureOptions, CaptureStrategy};
use std::time::Duration;
use tracing::warn;

use crate::compose::DEFAULT_STACK_LIMIT;

pub const TIMEOUT_ENV: &str = "EVALSTACK_TIMEOUT_MS";
pub const STACK_LIMIT_ENV: &str = "EVALSTACK_STACK_LIMIT";
pub const CAPTURE_ENV: &str = "EVALSTACK_CAPTURE";
pub const EMBED_CALL_SITES_ENV: &str = "EVALSTACK_EMBED_CALL_SITES";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// `None` waits for the remote response forever.
    pub timeout: Option<Duration>,
    /// Maximum number of frames in a composed stack.
    pub stack_limit: usize,
    pub capture: CaptureOptions,
    /// Encode the host call site into each evaluation's source URL. Without
    /// it, evaluation frames are matched against the request's own call chain
    /// in order, so a function created by an earlier evaluation is
    /// misattributed: its frame takes the next pending site and the frame of
    /// the evaluation that called it falls back to `<unknown>`.
    pub embed_call_sites: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            stack_limit: DEFAULT_STACK_LIMIT,
            capture: CaptureOptions::default(),
            embed_call_sites: true,
        }
    }
}

impl EvalConfig {
    /// Defaults overridden by `EVALSTACK_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    /// Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.timeout = None,
                Ok(ms) => config.timeout = Some(Duration::from_millis(ms)),
                Err(e) => warn!(env = TIMEOUT_ENV, value = %raw, %e, "ignoring invalid timeout"),
            }
        }

        if let Some(raw) = lookup(STACK_LIMIT_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(limit) => config.stack_limit = limit,
                Err(e) => {
                    warn!(env = STACK_LIMIT_ENV, value = %raw, %e, "ignoring invalid stack limit")
                }
            }
        }

        if let Some(raw) = lookup(CAPTURE_ENV) {
            match CaptureStrategy::parse(&raw) {
                Some(strategy) => config.capture.strategy = strategy,
                None => warn!(env = CAPTURE_ENV, value = %raw, "ignoring unknown capture strategy"),
            }
        }

        if let Some(raw) = lookup(EMBED_CALL_SITES_ENV) {
            match parse_flag(&raw) {
                Some(flag) => config.embed_call_sites = flag,
                None => warn!(env = EMBED_CALL_SITES_ENV, value = %raw, "ignoring invalid flag"),
            }
        }

        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
