use facet::Facet;
use std::fmt;

use crate::InvariantError;

/// Function name used when the caller has no name (closures, top-level code).
pub const ANONYMOUS_FUNCTION: &str = "<anonymous>";

/// File path used when no caller frame could be resolved.
pub const UNKNOWN_FILE: &str = "<unknown>";

/// Host-side source location of an evaluation request.
///
/// Captured synchronously when the request is built and never mutated
/// afterwards. Renders as `function (file:line:column)`.
#[derive(Facet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub function_name: String,
    pub file_path: String,
    pub line: u32,
    pub column: u32,
}

impl CallSite {
    pub fn new(
        function_name: impl Into<String>,
        file_path: impl Into<String>,
        line: u32,
        column: u32,
    ) -> Self {
        let function_name = function_name.into();
        let file_path = file_path.into();
        Self {
            function_name: if function_name.is_empty() {
                ANONYMOUS_FUNCTION.to_string()
            } else {
                function_name
            },
            file_path: if file_path.is_empty() {
                UNKNOWN_FILE.to_string()
            } else {
                file_path
            },
            line,
            column,
        }
    }

    /// Sentinel for callers whose frame could not be resolved.
    pub fn unknown() -> Self {
        Self::new(ANONYMOUS_FUNCTION, UNKNOWN_FILE, 0, 0)
    }

    pub fn is_unknown(&self) -> bool {
        self.file_path == UNKNOWN_FILE && self.line == 0 && self.column == 0
    }

    /// Same location, different function name.
    pub fn with_function_name(mut self, function_name: impl Into<String>) -> Self {
        let function_name = function_name.into();
        if !function_name.is_empty() {
            self.function_name = function_name;
        }
        self
    }

    /// Parses the `function (file:line:column)` form produced by `Display`.
    pub fn parse_site(site: &str) -> Result<Self, InvariantError> {
        let malformed = || InvariantError::MalformedSite {
            site: site.to_string(),
        };

        let inner = site.strip_suffix(')').ok_or_else(malformed)?;
        let (function_name, location) = inner.split_once(" (").ok_or_else(malformed)?;

        let mut parts = location.rsplitn(3, ':');
        let column = parts.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;
        let line = parts.next().and_then(|v| v.parse().ok()).ok_or_else(malformed)?;
        let file_path = parts.next().filter(|v| !v.is_empty()).ok_or_else(malformed)?;

        Ok(Self::new(function_name, file_path, line, column))
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}:{})",
            self.function_name, self.file_path, self.line, self.column
        )
    }
}
