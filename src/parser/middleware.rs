//! Part interceptors run during classification.
//!
//! A [`MiddlewareStack`] is an ordered list of [`Middleware`]. For every part
//! reached by the classification walk the chain is invoked with a [`Next`]
//! continuation standing for "the rest of the chain, then the default rules".
//! Middleware added later wraps middleware added earlier, so it runs first.
//!
//! The value returned by the chain is the part's role. `None` suppresses the
//! part: it is marked ignored, and for a container its subtree is skipped.

use tracing::debug;

use super::classify::{self, PartContext};
use crate::model::part::{MimePart, PartRole};

/// An interceptor in the classification chain.
pub trait Middleware {
    /// Inspect or transform `part`, then either delegate with
    /// `next.run(part)` or decide the role directly.
    fn handle(&self, part: &mut MimePart, next: Next<'_>) -> Option<PartRole>;
}

/// Continuation passed to a [`Middleware`].
pub struct Next<'a> {
    chain: &'a [Box<dyn Middleware>],
    ctx: &'a PartContext<'a>,
}

impl<'a> Next<'a> {
    /// Run the remaining middleware, then the default classification.
    pub fn run(self, part: &mut MimePart) -> Option<PartRole> {
        match self.chain.split_last() {
            Some((outer, rest)) => outer.handle(
                part,
                Next {
                    chain: rest,
                    ctx: self.ctx,
                },
            ),
            None => Some(classify::default_role(part, self.ctx)),
        }
    }

    /// Where the part sits in the tree, and the raw message bytes.
    pub fn context(&self) -> &'a PartContext<'a> {
        self.ctx
    }
}

/// Middleware built from a closure. See [`from_fn`].
pub struct FnMiddleware<F>(F);

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut MimePart, Next<'_>) -> Option<PartRole>,
{
    fn handle(&self, part: &mut MimePart, next: Next<'_>) -> Option<PartRole> {
        (self.0)(part, next)
    }
}

/// Wrap a closure as [`Middleware`].
///
/// ```
/// use mimeshell::parser::middleware::from_fn;
///
/// let log_parts = from_fn(|part, next| {
///     println!("visiting {}", part.id);
///     next.run(part)
/// });
/// # let _ = log_parts;
/// ```
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut MimePart, Next<'_>) -> Option<PartRole>,
{
    FnMiddleware(f)
}

/// Suppresses parts whose mime type is in a fixed list.
#[derive(Debug, Clone)]
pub struct SkipContentTypes {
    mime_types: Vec<String>,
}

impl SkipContentTypes {
    pub fn new<I, S>(mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            mime_types: mime_types
                .into_iter()
                .map(|m| m.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Detached signatures: PGP/MIME and S/MIME.
    pub fn signatures() -> Self {
        Self::new([
            "application/pgp-signature",
            "application/pkcs7-signature",
            "application/x-pkcs7-signature",
        ])
    }
}

impl Middleware for SkipContentTypes {
    fn handle(&self, part: &mut MimePart, next: Next<'_>) -> Option<PartRole> {
        let mime = part.mime_type();
        if self.mime_types.iter().any(|m| *m == mime) {
            debug!(part = %part.id, mime = %mime, "Skipping part");
            return None;
        }
        next.run(part)
    }
}

/// Ordered middleware list.
#[derive(Default)]
pub struct MiddlewareStack {
    layers: Vec<Box<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `middleware`; it becomes the outermost layer.
    pub fn add(&mut self, middleware: impl Middleware + 'static) {
        self.layers.push(Box::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Invoke the whole chain for one part.
    pub fn run(&self, part: &mut MimePart, ctx: &PartContext<'_>) -> Option<PartRole> {
        Next {
            chain: &self.layers,
            ctx,
        }
        .run(part)
    }
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareStack")
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::model::part::{ContentType, PartId};

    fn leaf(mime: &str) -> MimePart {
        let mut part = MimePart::new(PartId::root().child(0), 0..0, 0..0, 0..0);
        let (t, s) = mime.split_once('/').unwrap();
        part.content_type = ContentType::new(t, s);
        part
    }

    fn ctx() -> PartContext<'static> {
        PartContext {
            source: b"",
            parent: Some("mixed"),
        }
    }

    #[test]
    fn test_empty_stack_uses_default_rules() {
        let stack = MiddlewareStack::new();
        let mut part = leaf("text/plain");
        assert_eq!(stack.run(&mut part, &ctx()), Some(PartRole::TextBody));
    }

    #[test]
    fn test_later_middleware_runs_first() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut stack = MiddlewareStack::new();
        for name in ["first", "second"] {
            let order = Rc::clone(&order);
            stack.add(from_fn(move |part, next| {
                order.borrow_mut().push(name);
                next.run(part)
            }));
        }
        let mut part = leaf("text/plain");
        stack.run(&mut part, &ctx());
        assert_eq!(*order.borrow(), ["second", "first"]);
    }

    #[test]
    fn test_short_circuit_skips_inner_layers() {
        let reached = Rc::new(RefCell::new(false));
        let mut stack = MiddlewareStack::new();
        let flag = Rc::clone(&reached);
        stack.add(from_fn(move |part, next| {
            *flag.borrow_mut() = true;
            next.run(part)
        }));
        stack.add(from_fn(|_part, _next| Some(PartRole::Attachment)));

        let mut part = leaf("text/plain");
        assert_eq!(stack.run(&mut part, &ctx()), Some(PartRole::Attachment));
        assert!(!*reached.borrow());
    }

    #[test]
    fn test_middleware_can_rewrite_content() {
        let mut stack = MiddlewareStack::new();
        stack.add(from_fn(|part, next| {
            part.set_content(b"replaced".to_vec());
            next.run(part)
        }));
        let mut part = leaf("text/plain");
        stack.run(&mut part, &ctx());
        assert_eq!(part.decoded_body(b""), b"replaced");
    }

    #[test]
    fn test_skip_content_types() {
        let mut stack = MiddlewareStack::new();
        stack.add(SkipContentTypes::signatures());
        let mut sig = leaf("application/pgp-signature");
        let mut pdf = leaf("application/pdf");
        assert_eq!(stack.run(&mut sig, &ctx()), None);
        assert_eq!(stack.run(&mut pdf, &ctx()), Some(PartRole::Attachment));
    }
}
