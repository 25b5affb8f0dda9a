//! Email address parsing (RFC 5322 §3.4), including group syntax.

use tracing::debug;

/// A parsed email address, or an address group.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = "user@example.com"`, `address = "user@example.com"`
/// - `"Team: a@x.com, b@y.com;"` → group `Team` with two `members`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name. Falls back to the address (or a trailing
    /// comment) when the mailbox has no phrase. For groups, the group name.
    pub display_name: String,
    /// The bare email address (`user@domain`). Empty for groups.
    pub address: String,
    /// `true` for RFC 2822 groups (`name: member, member;`).
    pub is_group: bool,
    /// Group members in order. Always empty for plain mailboxes.
    pub members: Vec<EmailAddress>,
}

impl EmailAddress {
    /// A plain mailbox.
    pub fn mailbox(display_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            address: address.into(),
            is_group: false,
            members: Vec::new(),
        }
    }

    /// A group with the given members.
    pub fn group(name: impl Into<String>, members: Vec<EmailAddress>) -> Self {
        Self {
            display_name: name.into(),
            address: String::new(),
            is_group: true,
            members,
        }
    }

    /// Parse a single mailbox.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"user@domain.com (Display Name)"`
    ///
    /// Returns `None` for segments that are not a recognizable mailbox.
    pub fn parse(raw: &str) -> Option<Self> {
        let (text, comment) = strip_comments(raw);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        // "Display Name <address>" or "<address>"
        if let Some(angle_start) = find_unquoted(trimmed, '<') {
            let rest = &trimmed[angle_start + 1..];
            let addr = match rest.find('>') {
                Some(end) => rest[..end].trim(),
                None => rest.trim(),
            };
            if addr.is_empty() {
                return None;
            }
            let phrase = unquote(trimmed[..angle_start].trim());
            let display_name = if !phrase.is_empty() {
                phrase
            } else {
                comment.unwrap_or_else(|| addr.to_string())
            };
            return Some(Self::mailbox(display_name, addr));
        }

        // Bare address: a single word, normally containing '@'
        if trimmed.contains(char::is_whitespace) || trimmed.contains('"') {
            return None;
        }
        let display_name = comment.unwrap_or_else(|| trimmed.to_string());
        Some(Self::mailbox(display_name, trimmed))
    }

    /// Parse an address list.
    ///
    /// Splits on top-level commas (not inside quotes, comments or angle
    /// brackets) and recognizes `group: member, member;`. Unparseable
    /// segments are dropped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut group: Option<(String, Vec<Self>)> = None;
        let mut in_quotes = false;
        let mut in_angle = false;
        let mut escaped = false;
        let mut comment_depth = 0usize;

        for ch in raw.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
                continue;
            }
            let top_level = !in_quotes && comment_depth == 0;
            match ch {
                '\\' if in_quotes || comment_depth > 0 => {
                    escaped = true;
                    current.push(ch);
                }
                '"' if comment_depth == 0 => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '(' if !in_quotes => {
                    comment_depth += 1;
                    current.push(ch);
                }
                ')' if !in_quotes && comment_depth > 0 => {
                    comment_depth -= 1;
                    current.push(ch);
                }
                '<' if top_level => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if top_level => {
                    in_angle = false;
                    current.push(ch);
                }
                ':' if top_level && !in_angle && group.is_none() => {
                    group = Some((unquote(current.trim()), Vec::new()));
                    current.clear();
                }
                ';' if top_level && !in_angle => {
                    match group.take() {
                        Some((name, mut members)) => {
                            push_mailbox(&mut members, &current);
                            results.push(Self::group(name, members));
                        }
                        None => push_mailbox(&mut results, &current),
                    }
                    current.clear();
                }
                ',' if top_level && !in_angle => {
                    match group.as_mut() {
                        Some((_, members)) => push_mailbox(members, &current),
                        None => push_mailbox(&mut results, &current),
                    }
                    current.clear();
                }
                _ => current.push(ch),
            }
        }

        // Last segment; an unterminated group is closed implicitly
        match group {
            Some((name, mut members)) => {
                push_mailbox(&mut members, &current);
                results.push(Self::group(name, members));
            }
            None => push_mailbox(&mut results, &current),
        }

        results
    }

    /// Format for display: `"Display Name <address>"`, `"address"`, or
    /// `"Group: a, b;"`.
    pub fn display(&self) -> String {
        if self.is_group {
            let members: Vec<String> = self.members.iter().map(Self::display).collect();
            return format!("{}: {};", self.display_name, members.join(", "));
        }
        if self.display_name.is_empty() || self.display_name == self.address {
            self.address.clone()
        } else if self.display_name.contains([',', ';', ':', '"', '<', '>', '@']) {
            let escaped = self.display_name.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\" <{}>", self.address)
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }

    /// Iterate over plain mailboxes, flattening groups.
    pub fn mailboxes(&self) -> Box<dyn Iterator<Item = &EmailAddress> + '_> {
        if self.is_group {
            Box::new(self.members.iter().flat_map(EmailAddress::mailboxes))
        } else {
            Box::new(std::iter::once(self))
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

fn push_mailbox(target: &mut Vec<EmailAddress>, segment: &str) {
    if segment.trim().is_empty() {
        return;
    }
    match EmailAddress::parse(segment) {
        Some(addr) => target.push(addr),
        None => debug!(segment = segment.trim(), "Dropping unparseable address"),
    }
}

/// Remove `(comments)` outside quoted strings.
///
/// Returns the remaining text and the last non-empty comment.
fn strip_comments(s: &str) -> (String, Option<String>) {
    let mut text = String::with_capacity(s.len());
    let mut comment = String::new();
    let mut last_comment = None;
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if depth > 0 {
                comment.push(ch);
            } else {
                text.push(ch);
            }
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes || depth > 0 => {
                escaped = true;
                if depth == 0 {
                    text.push(ch);
                }
            }
            '"' if depth == 0 => {
                in_quotes = !in_quotes;
                text.push(ch);
            }
            '(' if !in_quotes => {
                if depth > 0 {
                    comment.push(ch);
                }
                depth += 1;
            }
            ')' if !in_quotes && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let c = comment.trim();
                    if !c.is_empty() {
                        last_comment = Some(c.to_string());
                    }
                    comment.clear();
                } else {
                    comment.push(ch);
                }
            }
            _ if depth > 0 => comment.push(ch),
            _ => text.push(ch),
        }
    }

    (text, last_comment)
}

/// Byte position of the first `needle` outside a quoted string.
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Strip surrounding double-quotes, resolve backslash escapes and trim.
fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    if !trimmed.contains('"') {
        return trimmed.to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    let mut escaped = false;
    for ch in trimmed.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch != '"' {
            out.push(ch);
        }
    }
    out.trim().to_string()
}
