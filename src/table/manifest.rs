//! Manifest file parsing and minimal-diff rewriting (C5, spec.md §4.5/§6).
//!
//! A manifest is line-oriented UTF-8 text: one `key = value` pair per line, `#`-prefixed and
//! blank lines ignored, whitespace trimmed from both sides. Unknown keys are preserved verbatim on
//! rewrite so a manifest written by a newer host does not lose fields it doesn't recognize.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One parsed manifest, plus the original lines so a rewrite can be a minimal diff rather than a
/// full re-serialization.
#[derive(Clone, Debug)]
pub struct Manifest {
    pub id: Option<u16>,
    pub dict_file: PathBuf,
    pub namespaces: Vec<String>,
    pub created: DateTime<Utc>,
    pub level: i32,
    pub signature: Option<String>,
    pub retired: Option<DateTime<Utc>>,
    lines: Vec<Line>,
}

#[derive(Clone, Debug)]
enum Line {
    Verbatim(String),
    KeyValue { key: String, value: String },
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    if trimmed.trim_start().starts_with('#') || trimmed.trim().is_empty() {
        return Line::Verbatim(trimmed.to_owned());
    }
    match trimmed.split_once('=') {
        Some((k, v)) => Line::KeyValue { key: k.trim().to_owned(), value: v.trim().to_owned() },
        None => Line::Verbatim(trimmed.to_owned()),
    }
}

impl Manifest {
    /// Parses manifest text. `manifest_dir` is used to resolve a relative `dict_file`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `dict_file` is missing, or `id`/`level`/`created`/
    /// `retired` fail to parse.
    pub fn parse(text: &str, manifest_dir: &Path) -> Result<Self> {
        let lines: Vec<Line> = text.lines().map(parse_line).collect();

        let mut id = None;
        let mut dict_file: Option<PathBuf> = None;
        let mut namespaces: Vec<String> = Vec::new();
        let mut created: Option<DateTime<Utc>> = None;
        let mut level = 0i32;
        let mut signature = None;
        let mut retired = None;

        for line in &lines {
            let Line::KeyValue { key, value } = line else { continue };
            match key.as_str() {
                "id" => {
                    if !value.is_empty() {
                        id = Some(value.parse::<u16>().map_err(|_| {
                            Error::invalid(format!("manifest id {value:?} is not a valid u16"))
                        })?);
                    }
                },
                "dict_file" => dict_file = Some(PathBuf::from(value)),
                "namespaces" => {
                    namespaces = value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect();
                },
                "created" => {
                    created = Some(DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)).map_err(
                        |e| Error::invalid(format!("manifest created {value:?} is not RFC-3339: {e}")),
                    )?);
                },
                "level" => {
                    level = value
                        .parse()
                        .map_err(|_| Error::invalid(format!("manifest level {value:?} is not an integer")))?;
                },
                "signature" => {
                    if !value.is_empty() {
                        signature = Some(value.to_owned());
                    }
                },
                "retired" => {
                    if !value.is_empty() {
                        retired = Some(
                            DateTime::parse_from_rfc3339(value)
                                .map(|dt| dt.with_timezone(&Utc))
                                .map_err(|e| Error::invalid(format!("manifest retired {value:?} is not RFC-3339: {e}")))?,
                        );
                    }
                },
                _ => {}, // unknown key: preserved verbatim in `lines`, ignored here
            }
        }

        let dict_file = dict_file.ok_or_else(|| Error::invalid("manifest missing dict_file"))?;
        let dict_file = if dict_file.is_absolute() { dict_file } else { manifest_dir.join(dict_file) };
        if namespaces.is_empty() {
            namespaces.push("default".to_owned());
        }
        let created = created.unwrap_or_else(Utc::now);

        Ok(Self { id, dict_file, namespaces, created, level, signature, retired, lines })
    }

    /// Reads and parses the manifest at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, dir)
    }

    fn set_kv(&mut self, key: &str, value: String) {
        for line in &mut self.lines {
            if let Line::KeyValue { key: k, value: v } = line {
                if k == key {
                    *v = value;
                    return;
                }
            }
        }
        self.lines.push(Line::KeyValue { key: key.to_owned(), value });
    }

    /// Assigns `id`, updating both the in-memory struct and the preserved line text.
    pub fn set_id(&mut self, id: u16) {
        self.id = Some(id);
        self.set_kv("id", id.to_string());
    }

    /// Stamps a retirement time, updating both the in-memory struct and the preserved line text.
    pub fn set_retired(&mut self, at: DateTime<Utc>) {
        self.retired = Some(at);
        self.set_kv("retired", at.to_rfc3339());
    }

    /// Serializes back to manifest text: a minimal diff of the source, since every recognized
    /// field is rewritten in place and every unrecognized line is carried through verbatim.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Verbatim(text) => out.push_str(text),
                Line::KeyValue { key, value } => {
                    out.push_str(key);
                    out.push_str(" = ");
                    out.push_str(value);
                },
            }
            out.push('\n');
        }
        out
    }

    /// Atomically writes the rendered manifest to `path`: write to a sibling temp file, fsync,
    /// rename, fsync the parent directory.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("manifest")
        ));

        {
            let mut file = std::fs::File::create(&tmp)?;
            std::io::Write::write_all(&mut file, self.render().as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        if let Ok(dir_handle) = std::fs::File::open(dir) {
            let _ = dir_handle.sync_all();
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests
