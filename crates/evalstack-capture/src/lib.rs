//! Records where on the host an evaluation was requested.
//!
//! The cheap path is `#[track_caller]`: every public evaluation entry point is
//! annotated, so [`std::panic::Location::caller`] resolves to the user's line.
//! Rust locations carry no function name, which the [`function_name!`] macro
//! fills in at the call site. The [`CaptureStrategy::Backtrace`] path walks the
//! native stack instead and symbolizes the first frame outside evalstack.

use evalstack_types::{ANONYMOUS_FUNCTION, CallSite};
use std::error::Error;
use std::fmt;
use std::num::NonZeroUsize;

pub use evalstack_types;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// `#[track_caller]` location plus an optional macro-supplied function name.
    Location,
    /// Walk and symbolize the native stack.
    Backtrace,
    /// Every capture yields [`CallSite::unknown`].
    Disabled,
}

impl CaptureStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "location" => Some(Self::Location),
            "backtrace" => Some(Self::Backtrace),
            "off" | "disabled" | "none" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub strategy: CaptureStrategy,
    /// Backtrace strategy: stop walking after this many frames.
    pub max_frames: NonZeroUsize,
    /// Backtrace strategy: raw frames to drop before looking for the caller.
    pub skip_frames: usize,
    /// Backtrace strategy: symbols starting with any of these belong to the
    /// capture machinery or the runtime, not to the caller.
    pub internal_prefixes: Vec<String>,
}

pub const DEFAULT_INTERNAL_PREFIXES: &[&str] = &[
    "backtrace::",
    "evalstack_capture::",
    "evalstack::",
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "__rust",
];

const DEFAULT_MAX_FRAMES: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(value) => value,
    None => unreachable!(),
};

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            strategy: CaptureStrategy::Location,
            max_frames: DEFAULT_MAX_FRAMES,
            skip_frames: 0,
            internal_prefixes: DEFAULT_INTERNAL_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Walked `walked` frames without finding a symbolized caller frame.
    NoCallerFrame { walked: usize },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCallerFrame { walked } => write!(
                f,
                "no symbolized caller frame outside the internal prefixes after {walked} frames"
            ),
        }
    }
}

impl Error for CaptureError {}

/// Captures one [`CallSite`] per evaluation request.
#[derive(Debug, Clone, Default)]
pub struct CallSiteRecorder {
    options: CaptureOptions,
}

impl CallSiteRecorder {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Records the caller of the outermost `#[track_caller]` function.
    ///
    /// Never fails: an unresolvable caller degrades to [`CallSite::unknown`].
    #[track_caller]
    pub fn record(&self) -> CallSite {
        self.record_named(None)
    }

    /// Like [`record`](Self::record), with a function name captured by the
    /// caller (see [`function_name!`]). Ignored by the backtrace strategy,
    /// which symbolizes its own.
    #[track_caller]
    pub fn record_named(&self, function_name: Option<&str>) -> CallSite {
        match self.options.strategy {
            CaptureStrategy::Location => {
                let location = std::panic::Location::caller();
                CallSite::new(
                    function_name.unwrap_or(ANONYMOUS_FUNCTION),
                    location.file(),
                    location.line(),
                    location.column(),
                )
            }
            CaptureStrategy::Backtrace => match capture_backtrace(&self.options) {
                Ok(site) => site,
                Err(err) => {
                    tracing::debug!(%err, "call site capture degraded to unknown location");
                    CallSite::unknown()
                }
            },
            CaptureStrategy::Disabled => CallSite::unknown(),
        }
    }
}

/// Walks the current stack and returns the first frame outside
/// `options.internal_prefixes`.
pub fn capture_backtrace(options: &CaptureOptions) -> Result<CallSite, CaptureError> {
    let mut skip_remaining = options.skip_frames;
    let mut walked = 0usize;
    let mut found: Option<CallSite> = None;

    backtrace::trace(|frame| {
        if skip_remaining > 0 {
            skip_remaining -= 1;
            return true;
        }
        if walked >= options.max_frames.get() {
            return false;
        }
        walked += 1;

        backtrace::resolve_frame(frame, |symbol| {
            if found.is_some() {
                return;
            }
            let Some(name) = symbol.name() else {
                return;
            };
            let name = format!("{name:#}");
            if is_internal_symbol(&name, &options.internal_prefixes) {
                return;
            }
            let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) else {
                return;
            };
            found = Some(CallSite::new(
                clean_function_name(&name),
                file.display().to_string(),
                line,
                symbol.colno().unwrap_or(0),
            ));
        });

        found.is_none()
    });

    found.ok_or(CaptureError::NoCallerFrame { walked })
}

fn is_internal_symbol(name: &str, prefixes: &[String]) -> bool {
    let name = name.trim_start_matches('<');
    prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

/// Drops the `::{{closure}}` segments async bodies and closures add to
/// symbol and type names.
pub fn clean_function_name(name: &str) -> &str {
    let mut name = name;
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    name
}

/// Path of the enclosing function, e.g. `my_app::login::submit`.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __evalstack_here() {}
        fn __evalstack_type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        $crate::clean_function_name(
            __evalstack_type_name_of(__evalstack_here)
                .strip_suffix("::__evalstack_here")
                .unwrap_or(""),
        )
    }};
}

/// [`CallSite`] of the macro invocation, including the enclosing function name.
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::CallSiteRecorder::default().record_named(Some($crate::function_name!()))
    };
    ($recorder:expr) => {
        $recorder.record_named(Some($crate::function_name!()))
    };
}
