//! Building evaluation requests.

use evalstack_types::{Boundary, CallSite, EvaluateRequest, EvaluationUrl, RemoteValue};

/// Wraps a function expression so every frame it produces in the remote
/// context carries `url`.
///
/// The closing parenthesis goes on its own line so a trailing line comment in
/// `source` cannot swallow it. Lines inside `source` keep their numbering.
pub fn wrap_function(source: &str, url: &EvaluationUrl) -> String {
    format!("({}\n)\n{}\n", source.trim(), url.source_url_comment())
}

pub fn build_request(
    source: &str,
    arguments: Vec<RemoteValue>,
    boundary: Boundary,
    site: &CallSite,
    embed_call_site: bool,
) -> EvaluateRequest {
    let url = EvaluationUrl::new(boundary, embed_call_site.then(|| site.clone()));
    EvaluateRequest {
        expression: wrap_function(source, &url),
        arguments,
        return_by_value: boundary == Boundary::Evaluate,
        await_promise: true,
    }
}

/// Source URL named by the `//# sourceURL=` trailer of `expression`, if any.
pub fn source_url_of(expression: &str) -> Option<&str> {
    expression
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("//# sourceURL="))
}
