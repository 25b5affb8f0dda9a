//! Part classification: assigns every part of the tree a [`PartRole`].
//!
//! The walk is depth-first. Each part first goes through the middleware
//! chain, whose innermost continuation is [`default_role`]. Containers are
//! transparent except for `multipart/alternative`, where the last child
//! contributing a body role wins that role.

use tracing::{debug, trace};

use super::middleware::MiddlewareStack;
use crate::model::part::{MimePart, PartId, PartRole};

/// Position of a part in the tree, as seen by the classifier and middleware.
#[derive(Debug, Clone, Copy)]
pub struct PartContext<'a> {
    /// Raw message bytes.
    pub source: &'a [u8],
    /// Subtype of the enclosing multipart (`"mixed"`, `"alternative"`, ...),
    /// `None` for the top-level part.
    pub parent: Option<&'a str>,
}

impl PartContext<'_> {
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }
}

/// Walks a part tree and assigns roles.
pub struct Classifier<'a> {
    source: &'a [u8],
    middleware: &'a MiddlewareStack,
}

impl<'a> Classifier<'a> {
    pub fn new(source: &'a [u8], middleware: &'a MiddlewareStack) -> Self {
        Self { source, middleware }
    }

    /// Classify `root` and everything below it.
    pub fn classify(&self, root: &mut MimePart) {
        self.visit(root, None);
    }

    fn visit(&self, part: &mut MimePart, parent: Option<&str>) {
        let ctx = PartContext {
            source: self.source,
            parent,
        };

        match self.middleware.run(part, &ctx) {
            None => {
                debug!(part = %part.id, mime = %part.mime_type(), "Part suppressed by middleware");
                part.role = PartRole::Ignored;
            }
            Some(PartRole::Container) if part.is_multipart() => {
                part.role = PartRole::Container;
                let subtype = part.content_type.subtype.clone();
                for child in &mut part.children {
                    self.visit(child, Some(&subtype));
                }
                if subtype == "alternative" {
                    resolve_alternative(part);
                }
            }
            Some(role) => {
                trace!(part = %part.id, ?role, "Classified");
                part.role = role;
            }
        }
    }
}

/// Default rules for a single part.
pub fn default_role(part: &MimePart, ctx: &PartContext<'_>) -> PartRole {
    if part.is_multipart() {
        return PartRole::Container;
    }

    let ct = &part.content_type;
    let has_filename = part.filename().is_some();
    let is_attachment = part.disposition.as_ref().is_some_and(|d| d.is_attachment());
    let is_inline = part.disposition.as_ref().is_some_and(|d| d.is_inline());
    let is_text = ct.mime_type == "text";
    let body_role = if has_filename {
        None
    } else if ct.is("text/plain") {
        Some(PartRole::TextBody)
    } else if ct.is("text/html") {
        Some(PartRole::HtmlBody)
    } else {
        None
    };

    if ctx.is_top_level() {
        // A single-part message is its own body unless it is clearly a file.
        return match body_role {
            _ if is_attachment => PartRole::Attachment,
            Some(role) => role,
            None if has_filename && !ct.is("text/plain") => PartRole::Attachment,
            None => PartRole::TextBody,
        };
    }

    if is_attachment {
        return PartRole::Attachment;
    }
    if body_role.is_none()
        && (is_inline
            || (part.content_id.is_some() && (ct.mime_type == "image" || !is_text)))
    {
        return PartRole::Inline;
    }
    body_role.unwrap_or(PartRole::Attachment)
}

/// In an alternative, only the last child subtree holding a body role keeps
/// it; earlier holders of the same role are demoted to ignored.
fn resolve_alternative(container: &mut MimePart) {
    for role in [PartRole::TextBody, PartRole::HtmlBody] {
        let Some(last) = container
            .children
            .iter()
            .rposition(|child| child.walk().any(|p| p.role == role))
        else {
            continue;
        };
        for child in &mut container.children[..last] {
            demote(child, role);
        }
    }
}

fn demote(part: &mut MimePart, role: PartRole) {
    if part.role == role {
        trace!(part = %part.id, ?role, "Superseded by later alternative");
        part.role = PartRole::Ignored;
    }
    for child in &mut part.children {
        demote(child, role);
    }
}

/// Id of the nearest `multipart/related` ancestor of `id`.
pub fn nearest_related(root: &MimePart, id: &PartId) -> Option<PartId> {
    root.walk()
        .filter(|p| p.content_type.is("multipart/related") && id.is_descendant_of(&p.id))
        .max_by_key(|p| p.id.depth())
        .map(|p| p.id.clone())
}
