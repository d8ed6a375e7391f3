use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::env::EnvProvider;
use crate::error::{Error, Location, Result};

/// One logical line handed to the parser, tagged with its 1-based number.
#[derive(Debug, Clone)]
pub struct Line {
    pub text: String,
    pub number: u32,
}

/// Line-oriented reader over one Kconfig file.
///
/// Nested `source` directives open a fresh reader while the outer one stays
/// paused on the parser's include stack, so reads restart exactly where the
/// outer file left off.
pub struct SourceReader {
    lines: Lines<BufReader<File>>,
    file: PathBuf,
    line_no: u32,
    pushed: Option<Line>,
    tab_width: usize,
}

impl SourceReader {
    pub async fn open(path: &Path, tab_width: usize) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            file: path.to_path_buf(),
            line_no: 0,
            pushed: None,
            tab_width: tab_width.max(1),
        })
    }

    pub fn location(&self) -> Location {
        Location::new(&self.file, self.line_no.max(1))
    }

    pub fn location_of(&self, line: &Line) -> Location {
        Location::new(&self.file, line.number)
    }

    /// One-slot push-back for look-ahead. Pushing twice without an
    /// intervening read loses the older line, so callers never do that.
    pub fn push_back(&mut self, line: Line) {
        debug_assert!(self.pushed.is_none());
        self.pushed = Some(line);
    }

    /// Next logical line: tabs expanded, `#` comments outside quotes
    /// stripped, blank lines skipped, `$VAR` interpolated inside quoted
    /// regions. Returns `None` at end of file.
    pub async fn next_line(&mut self, env: &dyn EnvProvider) -> Result<Option<Line>> {
        loop {
            let Some(raw) = self.next_raw_line().await? else {
                return Ok(None);
            };
            let stripped = strip_comment(&raw.text);
            if stripped.trim().is_empty() {
                continue;
            }
            let text = interpolate(stripped.trim_end(), env, || {
                Location::new(&self.file, raw.number)
            })?;
            return Ok(Some(Line {
                text,
                number: raw.number,
            }));
        }
    }

    /// Next physical line with only tab expansion applied. Help blocks are
    /// captured through this so indentation and `#` characters survive.
    pub async fn next_raw_line(&mut self) -> Result<Option<Line>> {
        if let Some(line) = self.pushed.take() {
            return Ok(Some(line));
        }
        match self.lines.next_line().await? {
            Some(raw) => {
                self.line_no += 1;
                Ok(Some(Line {
                    text: expand_tabs(&raw, self.tab_width),
                    number: self.line_no,
                }))
            }
            None => Ok(None),
        }
    }
}

fn expand_tabs(line: &str, tab_width: usize) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + tab_width);
    let mut col = 0usize;
    for ch in line.chars() {
        if ch == '\t' {
            let pad = tab_width - col % tab_width;
            out.extend(std::iter::repeat_n(' ', pad));
            col += pad;
        } else {
            out.push(ch);
            col += 1;
        }
    }
    out
}

/// Truncate at the first `#` that sits outside any quoted region.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1; // skip the escaped byte
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                } else if b == b'#' {
                    return &line[..i];
                }
            }
        }
        i += 1;
    }
    line
}

/// Replace `$VAR` inside quoted regions with the provider's value. An unset
/// variable is fatal to the parse.
fn interpolate(
    line: &str,
    env: &dyn EnvProvider,
    loc: impl Fn() -> Location,
) -> Result<String> {
    if !line.contains('$') {
        return Ok(line.to_string());
    }
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && i + 1 < bytes.len() {
                    out.push(b as char);
                    out.push(bytes[i + 1] as char);
                    i += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                    out.push(b as char);
                } else if b == b'$' {
                    let start = i + 1;
                    let mut end = start;
                    while end < bytes.len() && is_var_byte(bytes[end], end == start) {
                        end += 1;
                    }
                    if end == start {
                        out.push('$');
                    } else {
                        let var = &line[start..end];
                        match env.get(var) {
                            Some(value) => out.push_str(&value),
                            None => {
                                return Err(Error::Env {
                                    loc: loc(),
                                    var: var.to_string(),
                                });
                            }
                        }
                        i = end;
                        continue;
                    }
                } else {
                    out.push(b as char);
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    quote = Some(b);
                }
                out.push(b as char);
            }
        }
        i += 1;
    }
    Ok(out)
}

fn is_var_byte(b: u8, first: bool) -> bool {
    if first {
        b.is_ascii_alphabetic() || b == b'_'
    } else {
        b.is_ascii_alphanumeric() || b == b'_'
    }
}
