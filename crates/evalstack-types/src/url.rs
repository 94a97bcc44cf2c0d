use facet::Facet;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::fmt;

use crate::CallSite;

pub const URL_SCHEME: &str = "evalstack:";

/// Source URL of the remote helper script that invokes evaluated functions.
/// Frames in this script are never shown to callers.
pub const INTERNAL_URL: &str = "evalstack:internal";

/// Characters left alone by `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// The host API an evaluation went through.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[facet(rename_all = "camelCase")]
pub enum Boundary {
    Evaluate,
    EvaluateHandle,
}

impl Boundary {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Evaluate => "evaluate",
            Self::EvaluateHandle => "evaluateHandle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "evaluate" => Some(Self::Evaluate),
            "evaluateHandle" => Some(Self::EvaluateHandle),
            _ => None,
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source URL attached to each evaluated function.
///
/// Every frame the remote engine reports for code inside an evaluation
/// carries this URL, so the composer can tell evaluation frames apart from
/// page scripts and recover which host call issued them. Formats:
///
/// - `evalstack:evaluate;main%20(src%2Fmain.rs%3A10%3A5)` with the call site
/// - `evalstack:evaluateHandle` without it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationUrl {
    pub boundary: Boundary,
    pub site: Option<CallSite>,
}

impl EvaluationUrl {
    pub fn new(boundary: Boundary, site: Option<CallSite>) -> Self {
        Self { boundary, site }
    }

    /// Returns `None` for anything that is not an evaluation URL, including
    /// [`INTERNAL_URL`]. A site that fails to decode is dropped rather than
    /// rejecting the whole URL.
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix(URL_SCHEME)?;
        let (boundary, encoded_site) = match rest.split_once(';') {
            Some((boundary, site)) => (boundary, Some(site)),
            None => (rest, None),
        };
        let boundary = Boundary::parse(boundary)?;
        let site = encoded_site.and_then(|encoded| {
            let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
            CallSite::parse_site(&decoded).ok()
        });
        Some(Self { boundary, site })
    }

    pub fn is_internal(url: &str) -> bool {
        url == INTERNAL_URL
    }

    /// The `//# sourceURL=` trailer appended to evaluated expressions.
    pub fn source_url_comment(&self) -> String {
        format!("//# sourceURL={self}")
    }
}

impl fmt::Display for EvaluationUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{URL_SCHEME}{}", self.boundary)?;
        if let Some(site) = &self.site {
            let site = site.to_string();
            write!(f, ";{}", utf8_percent_encode(&site, COMPONENT))?;
        }
        Ok(())
    }
}
