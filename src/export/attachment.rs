//! Write attachments to disk.
//!
//! Every target is created with `create_new`, so an existing file is never
//! overwritten and collision checks cannot race with the write.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MimeError, Result};
use crate::model::attachment::Attachment;

/// Longest filename written, in characters.
const MAX_FILENAME_LEN: usize = 150;

/// Upper bound on `name (n).ext` candidates tried before giving up.
const MAX_SUFFIX: usize = 10_000;

/// How to name a file whose target already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilenameStrategy {
    /// Fail with [`MimeError::FileExists`].
    DuplicateThrow,
    /// Append ` (1)`, ` (2)`, ... before the extension.
    #[default]
    DuplicateSuffix,
    /// Ignore the declared name and use 32 random hex characters.
    RandomFilename,
}

impl FromStr for FilenameStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "duplicatethrow" | "throw" => Ok(Self::DuplicateThrow),
            "duplicatesuffix" | "suffix" => Ok(Self::DuplicateSuffix),
            "randomfilename" | "random" => Ok(Self::RandomFilename),
            _ => Err(format!("unknown filename strategy: {s}")),
        }
    }
}

impl fmt::Display for FilenameStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DuplicateThrow => "DuplicateThrow",
            Self::DuplicateSuffix => "DuplicateSuffix",
            Self::RandomFilename => "RandomFilename",
        })
    }
}

/// One written attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedAttachment {
    /// Filename declared by (or generated for) the attachment.
    pub filename: String,
    /// Absolute path of the written file.
    pub path: PathBuf,
}

/// Write `attachments` into `dir`, in order.
///
/// Stops at the first error; files already written stay on disk.
pub fn save_attachments(
    attachments: &[Attachment<'_>],
    dir: &Path,
    strategy: FilenameStrategy,
) -> Result<Vec<SavedAttachment>> {
    if !dir.is_dir() {
        return Err(MimeError::InvalidPath(format!(
            "not a directory: {}",
            dir.display()
        )));
    }
    let dir = dir.canonicalize().map_err(|e| MimeError::io(dir, e))?;

    let mut saved = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let name = sanitize_filename(attachment.filename(), MAX_FILENAME_LEN);
        let (path, mut file) = create_target(&dir, &name, strategy)?;
        file.write_all(attachment.content())
            .map_err(|e| MimeError::io(&path, e))?;
        debug!(
            filename = %attachment.filename(),
            path = %path.display(),
            bytes = attachment.size(),
            "Saved attachment"
        );
        saved.push(SavedAttachment {
            filename: attachment.filename().to_string(),
            path,
        });
    }

    info!(count = saved.len(), dir = %dir.display(), %strategy, "Saved attachments");
    Ok(saved)
}

fn create_target(dir: &Path, name: &str, strategy: FilenameStrategy) -> Result<(PathBuf, File)> {
    match strategy {
        FilenameStrategy::DuplicateThrow => {
            let path = dir.join(name);
            match create_new(&path)? {
                Some(file) => Ok((path, file)),
                None => Err(MimeError::FileExists(path)),
            }
        }
        FilenameStrategy::DuplicateSuffix => {
            for n in 0..MAX_SUFFIX {
                let path = dir.join(suffixed(name, n));
                if let Some(file) = create_new(&path)? {
                    return Ok((path, file));
                }
            }
            Err(MimeError::FileExists(dir.join(name)))
        }
        FilenameStrategy::RandomFilename => loop {
            let path = dir.join(random_filename());
            if let Some(file) = create_new(&path)? {
                return Ok((path, file));
            }
        },
    }
}

/// `Ok(None)` when the path already exists.
fn create_new(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(MimeError::io(path, e)),
    }
}

/// `name (n).ext`; `n == 0` is the name itself.
fn suffixed(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}

fn random_filename() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Reduce a declared filename to a safe single path component.
///
/// Directory parts are dropped, reserved and control characters become `_`
/// and leading dots are removed, so the result can never leave the target
/// directory. Long names are truncated keeping the extension.
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();

    if cleaned.is_empty() {
        return "noname".to_string();
    }
    if cleaned.chars().count() <= max_len {
        return cleaned.to_string();
    }

    let (stem, ext) = match cleaned.rfind('.') {
        Some(dot) if cleaned.len() - dot <= 16 => cleaned.split_at(dot),
        _ => (cleaned, ""),
    };
    let keep = max_len.saturating_sub(ext.chars().count());
    let mut out: String = stem.chars().take(keep).collect();
    out.push_str(ext);
    out
}
