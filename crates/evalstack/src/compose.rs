//! Merges a remote stack trace with the host call sites that led to it.
//!
//! Frames executing inside an evaluated function carry that evaluation's
//! source URL (see [`EvaluationUrl`]). Those frames get rewritten to name the
//! host call site that issued the evaluation:
//!
//! ```text
//! a (evaluate at app::checkout (src/checkout.rs:98:14), <anonymous>:2:22)
//! ```
//!
//! Frames from page scripts or engine internals pass through as
//! `name (url:line:column)`. Frames from the internal helper script are
//! dropped, and end the evaluation they follow.

use evalstack_types::{
    ANONYMOUS_FUNCTION, Boundary, CallSite, EvaluationUrl, GENERIC_ERROR_NAME, RemoteException,
    RemoteFrame,
};
use std::fmt;
use tracing::trace;

/// Default frame cap, matching the remote engine's default stack trace limit.
pub const DEFAULT_STACK_LIMIT: usize = 10;

/// Prefix of every frame line in a rendered stack.
pub const FRAME_INDENT: &str = "    at ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Inside an evaluated function, annotated with its host call site.
    Boundary(Boundary),
    /// Anywhere else in the remote context; remote data only.
    PassThrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotatedFrame {
    kind: FrameKind,
    label: String,
}

impl AnnotatedFrame {
    fn boundary(frame: &RemoteFrame, boundary: Boundary, site: &CallSite) -> Self {
        let outer = if frame.is_anonymous() {
            boundary.as_str()
        } else {
            frame.function_name.as_str()
        };
        Self {
            kind: FrameKind::Boundary(boundary),
            label: format!(
                "{outer} ({boundary} at {site}, <anonymous>:{}:{})",
                frame.line, frame.column
            ),
        }
    }

    fn pass_through(frame: &RemoteFrame) -> Self {
        let name = if frame.is_anonymous() {
            ANONYMOUS_FUNCTION
        } else {
            frame.function_name.as_str()
        };
        let url = if frame.url.is_empty() {
            ANONYMOUS_FUNCTION
        } else {
            frame.url.as_str()
        };
        Self {
            kind: FrameKind::PassThrough,
            label: format!("{name} ({url}:{}:{})", frame.line, frame.column),
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, FrameKind::Boundary(_))
    }
}

impl fmt::Display for AnnotatedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Header line plus annotated frames, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComposedStack {
    header: String,
    frames: Vec<AnnotatedFrame>,
}

impl ComposedStack {
    /// Stack with no frames at all, used for opaque values and for errors
    /// that no host call site can be linked to.
    pub fn header_only(remote: &RemoteException) -> Self {
        let (name, message) = host_name_and_message(remote);
        Self {
            header: header_line(&name, &message),
            frames: Vec::new(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn frames(&self) -> &[AnnotatedFrame] {
        &self.frames
    }

    pub fn boundary_frame_count(&self) -> usize {
        self.frames.iter().filter(|frame| frame.is_boundary()).count()
    }

    /// `header` followed by one `    at label` line per frame.
    pub fn render(&self) -> String {
        let mut out = self.header.clone();
        for frame in &self.frames {
            out.push('\n');
            out.push_str(FRAME_INDENT);
            out.push_str(&frame.label);
        }
        out
    }
}

impl fmt::Display for ComposedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// `name: message`, or just `name` when there is no message.
pub fn header_line(name: &str, message: &str) -> String {
    if message.is_empty() {
        name.to_string()
    } else {
        format!("{name}: {message}")
    }
}

/// Name and message the host error should carry for `remote`.
pub(crate) fn host_name_and_message(remote: &RemoteException) -> (String, String) {
    if remote.is_opaque() {
        let message = match &remote.opaque_value {
            Some(value) => value.to_string(),
            None => remote.message.clone(),
        };
        return (GENERIC_ERROR_NAME.to_string(), message);
    }
    let name = if remote.name.is_empty() {
        GENERIC_ERROR_NAME.to_string()
    } else {
        remote.name.clone()
    };
    (name, remote.message.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackComposer {
    limit: usize,
}

impl Default for StackComposer {
    fn default() -> Self {
        Self::new(DEFAULT_STACK_LIMIT)
    }
}

impl StackComposer {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Composes `remote` with `pending`, the call sites of the evaluations
    /// active on this request's chain, innermost first.
    ///
    /// Every time the remote stack enters a different evaluation script the
    /// next pending call site is consumed. The site embedded in the script's
    /// URL wins over the consumed one; the consumed one covers URLs that
    /// carry no site. Leftover pending sites are ignored.
    pub fn compose(&self, remote: &RemoteException, pending: &[CallSite]) -> ComposedStack {
        if remote.is_opaque() {
            return ComposedStack::header_only(remote);
        }

        let (name, message) = host_name_and_message(remote);
        let mut pending = pending.iter();
        let mut current: Option<(&str, CallSite)> = None;
        let mut frames = Vec::new();

        for frame in &remote.raw_stack {
            if frames.len() >= self.limit {
                break;
            }
            // Every evaluation is entered through the helper script, so its
            // frames separate one evaluation from the next.
            if EvaluationUrl::is_internal(&frame.url) {
                current = None;
                continue;
            }

            let Some(url) = EvaluationUrl::parse(&frame.url) else {
                frames.push(AnnotatedFrame::pass_through(frame));
                continue;
            };

            let same_evaluation = match &current {
                Some((current_url, site)) if *current_url == frame.url.as_str() => {
                    Some(site.clone())
                }
                _ => None,
            };
            let site = match same_evaluation {
                Some(site) => site,
                None => {
                    let consumed = pending.next();
                    let site = url
                        .site
                        .or_else(|| consumed.cloned())
                        .unwrap_or_else(CallSite::unknown);
                    current = Some((frame.url.as_str(), site.clone()));
                    site
                }
            };
            frames.push(AnnotatedFrame::boundary(frame, url.boundary, &site));
        }

        // Never hand back an empty stack when the remote reported frames.
        if frames.is_empty() && self.limit > 0 {
            if let Some(first) = remote.raw_stack.first() {
                frames.push(AnnotatedFrame::pass_through(first));
            }
        }

        let unused = pending.count();
        if unused > 0 {
            trace!(unused, "call sites not reached by the remote stack");
        }

        ComposedStack {
            header: header_line(&name, &message),
            frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalstack_types::{INTERNAL_URL, RemoteObject, RemoteObjectId, RemoteValue};

    fn site(function_name: &str, line: u32) -> CallSite {
        CallSite::new(function_name, "src/app.rs", line, 14)
    }

    fn eval_url(boundary: Boundary, site: Option<CallSite>) -> String {
        EvaluationUrl::new(boundary, site).to_string()
    }

    fn labels(stack: &ComposedStack) -> Vec<&str> {
        stack.frames().iter().map(AnnotatedFrame::label).collect()
    }

    #[test]
    fn single_evaluation_throw() {
        let caller = site("app::run", 32);
        let url = eval_url(Boundary::Evaluate, Some(caller.clone()));
        let remote = RemoteException::error(
            "Error",
            "Test",
            vec![
                RemoteFrame::new("", &url, 1, 18),
                RemoteFrame::new("callFunction", INTERNAL_URL, 0, 40),
            ],
        );

        let stack = StackComposer::default().compose(&remote, &[caller]);

        assert_eq!(stack.header(), "Error: Test");
        assert_eq!(
            labels(&stack),
            ["evaluate (evaluate at app::run (src/app.rs:32:14), <anonymous>:1:18)"]
        );
        assert_eq!(stack.boundary_frame_count(), 1);
    }

    #[test]
    fn local_call_chain_shares_one_call_site() {
        let caller = site("app::run", 98);
        let url = eval_url(Boundary::Evaluate, Some(caller.clone()));
        let remote = RemoteException::error(
            "Error",
            "Test",
            vec![
                RemoteFrame::new("a", &url, 2, 22),
                RemoteFrame::new("b", &url, 5, 16),
                RemoteFrame::new("c", &url, 8, 16),
                RemoteFrame::new("d", &url, 11, 16),
                RemoteFrame::new("", &url, 13, 12),
            ],
        );

        let stack = StackComposer::default().compose(&remote, &[caller]);

        assert_eq!(
            labels(&stack),
            [
                "a (evaluate at app::run (src/app.rs:98:14), <anonymous>:2:22)",
                "b (evaluate at app::run (src/app.rs:98:14), <anonymous>:5:16)",
                "c (evaluate at app::run (src/app.rs:98:14), <anonymous>:8:16)",
                "d (evaluate at app::run (src/app.rs:98:14), <anonymous>:11:16)",
                "evaluate (evaluate at app::run (src/app.rs:98:14), <anonymous>:13:12)",
            ]
        );
    }

    #[test]
    fn nested_evaluations_list_innermost_first() {
        let outer = site("app::outer", 77);
        let inner = site("app::inner", 71);
        let remote = RemoteException::error(
            "Error",
            "Test",
            vec![
                RemoteFrame::new("", eval_url(Boundary::EvaluateHandle, Some(inner)), 2, 22),
                RemoteFrame::new("", eval_url(Boundary::Evaluate, Some(outer.clone())), 1, 12),
            ],
        );

        let stack = StackComposer::default().compose(&remote, &[outer]);

        assert_eq!(
            labels(&stack),
            [
                "evaluateHandle (evaluateHandle at app::inner (src/app.rs:71:14), <anonymous>:2:22)",
                "evaluate (evaluate at app::outer (src/app.rs:77:14), <anonymous>:1:12)",
            ]
        );
    }

    #[test]
    fn urls_without_sites_consume_pending_call_sites() {
        let inner = site("app::inner", 5);
        let outer = site("app::outer", 9);
        let remote = RemoteException::error(
            "RangeError",
            "too deep",
            vec![
                RemoteFrame::new("", "evalstack:evaluate", 0, 7),
                RemoteFrame::new("", "evalstack:evaluate", 3, 1),
                RemoteFrame::new("step", "evalstack:evaluateHandle", 4, 2),
            ],
        );

        let stack = StackComposer::default().compose(&remote, &[inner, outer]);

        assert_eq!(
            labels(&stack),
            [
                "evaluate (evaluate at app::inner (src/app.rs:5:14), <anonymous>:0:7)",
                "evaluate (evaluate at app::inner (src/app.rs:5:14), <anonymous>:3:1)",
                "step (evaluateHandle at app::outer (src/app.rs:9:14), <anonymous>:4:2)",
            ]
        );
    }

    #[test]
    fn functions_from_earlier_evaluations_are_misattributed_without_sites() {
        // `a` was created by an earlier evaluateHandle; only the calling
        // evaluation's site is pending.
        let caller = site("app::run", 40);
        let remote = RemoteException::error(
            "Error",
            "Test",
            vec![
                RemoteFrame::new("a", "evalstack:evaluateHandle", 2, 22),
                RemoteFrame::new("", "evalstack:evaluate", 1, 30),
                RemoteFrame::new("callFunction", INTERNAL_URL, 0, 40),
            ],
        );

        let stack = StackComposer::default().compose(&remote, &[caller]);

        assert_eq!(
            labels(&stack),
            [
                "a (evaluateHandle at app::run (src/app.rs:40:14), <anonymous>:2:22)",
                "evaluate (evaluate at <anonymous> (<unknown>:0:0), <anonymous>:1:30)",
            ]
        );
    }

    #[test]
    fn running_out_of_call_sites_uses_unknown() {
        let remote = RemoteException::error(
            "Error",
            "x",
            vec![RemoteFrame::new("", "evalstack:evaluate", 0, 1)],
        );
        let stack = StackComposer::default().compose(&remote, &[]);
        assert_eq!(
            labels(&stack),
            ["evaluate (evaluate at <anonymous> (<unknown>:0:0), <anonymous>:0:1)"]
        );
    }

    #[test]
    fn foreign_frames_pass_through_in_order() {
        let caller = site("app::run", 3);
        let url = eval_url(Boundary::Evaluate, Some(caller.clone()));
        let remote = RemoteException::error(
            "TypeError",
            "boom",
            vec![
                RemoteFrame::new("handler", "https://example.test/app.js", 10, 4),
                RemoteFrame::new("", "", 0, 0),
                RemoteFrame::new("", &url, 1, 2),
            ],
        );

        let stack = StackComposer::default().compose(&remote, &[caller]);

        assert_eq!(
            labels(&stack),
            [
                "handler (https://example.test/app.js:10:4)",
                "<anonymous> (<anonymous>:0:0)",
                "evaluate (evaluate at app::run (src/app.rs:3:14), <anonymous>:1:2)",
            ]
        );
        assert_eq!(stack.frames()[0].kind(), FrameKind::PassThrough);
        assert_eq!(stack.boundary_frame_count(), 1);
    }

    #[test]
    fn helper_frames_separate_evaluations_without_embedded_sites() {
        let outer = site("app::outer", 10);
        let inner = site("app::inner", 20);
        let url = eval_url(Boundary::Evaluate, None);
        let remote = RemoteException::error(
            "Error",
            "Test",
            vec![
                RemoteFrame::new("", &url, 1, 18),
                RemoteFrame::new("callFunction", INTERNAL_URL, 0, 40),
                RemoteFrame::new("", &url, 1, 12),
                RemoteFrame::new("callFunction", INTERNAL_URL, 0, 40),
            ],
        );

        let stack = StackComposer::default().compose(&remote, &[inner, outer]);

        assert_eq!(
            labels(&stack),
            [
                "evaluate (evaluate at app::inner (src/app.rs:20:14), <anonymous>:1:18)",
                "evaluate (evaluate at app::outer (src/app.rs:10:14), <anonymous>:1:12)",
            ]
        );
    }

    #[test]
    fn internal_only_stack_keeps_one_frame() {
        let remote = RemoteException::error(
            "Error",
            "x",
            vec![
                RemoteFrame::new("callFunction", INTERNAL_URL, 0, 40),
                RemoteFrame::new("dispatch", INTERNAL_URL, 3, 2),
            ],
        );
        let stack = StackComposer::default().compose(&remote, &[]);
        assert_eq!(labels(&stack), ["callFunction (evalstack:internal:0:40)"]);
    }

    #[test]
    fn empty_remote_stack_gives_header_only() {
        let remote = RemoteException::error("SyntaxError", "Unexpected token", vec![]);
        let stack = StackComposer::default().compose(&remote, &[site("app::run", 1)]);
        assert_eq!(stack.render(), "SyntaxError: Unexpected token");
    }

    #[test]
    fn opaque_values_compose_to_header_only() {
        let value = RemoteValue::Object(RemoteObject {
            object_id: RemoteObjectId::new("7").expect("valid id"),
            class_name: "Response".to_string(),
            description: Some("Response".to_string()),
        });
        let mut remote = RemoteException::opaque(value);
        remote.raw_stack = vec![RemoteFrame::new("", "evalstack:evaluate", 0, 1)];

        let stack = StackComposer::default().compose(&remote, &[site("app::run", 1)]);

        assert_eq!(stack.render(), "Error: Response");
        assert!(stack.frames().is_empty());
    }

    #[test]
    fn limit_caps_frames() {
        let url = eval_url(Boundary::Evaluate, Some(site("app::run", 1)));
        let raw_stack = (0..20).map(|line| RemoteFrame::new("f", &url, line, 0)).collect();
        let remote = RemoteException::error("Error", "deep", raw_stack);

        assert_eq!(StackComposer::default().compose(&remote, &[]).frames().len(), DEFAULT_STACK_LIMIT);
        assert_eq!(StackComposer::new(3).compose(&remote, &[]).frames().len(), 3);
        assert!(StackComposer::new(0).compose(&remote, &[]).frames().is_empty());
    }

    #[test]
    fn composition_is_deterministic() {
        let caller = site("app::run", 12);
        let url = eval_url(Boundary::EvaluateHandle, Some(caller.clone()));
        let remote = RemoteException::error(
            "Error",
            "again",
            vec![
                RemoteFrame::new("inner", &url, 4, 4),
                RemoteFrame::new("page", "https://example.test/a.js", 1, 1),
                RemoteFrame::new("", &url, 9, 9),
            ],
        );
        let composer = StackComposer::default();
        let pending = [caller];

        let first = composer.compose(&remote, &pending);
        let second = composer.compose(&remote, &pending);
        assert_eq!(first, second);
        assert_eq!(first.render(), second.render());
    }

    #[test]
    fn empty_names_and_messages() {
        let remote = RemoteException::error("", "", vec![]);
        assert_eq!(StackComposer::default().compose(&remote, &[]).render(), "Error");
        assert_eq!(header_line("AbortError", ""), "AbortError");
        assert_eq!(header_line("Error", "a\nb"), "Error: a\nb");
    }
}
