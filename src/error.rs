use std::fmt;
use std::path::PathBuf;

/// Source position reported with located diagnostics. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fatal syntax error in a Kconfig file: missing keyword, unpaired
    /// terminator, unquoted prompt, malformed attribute.
    #[error("{loc}: {msg}")]
    Parse { loc: Location, msg: String },

    /// Expression text that failed to compile. Localized at the owning
    /// entry; the caller downgrades this to a logged diagnostic.
    #[error("{loc}: in expression `{text}`: {msg}")]
    Expr {
        loc: Location,
        text: String,
        msg: String,
    },

    /// `$VAR` interpolation hit an unset variable.
    #[error("{loc}: environment variable `{var}` is not set")]
    Env { loc: Location, var: String },

    /// The dependency graph could not be fully layered; `symbols` holds the
    /// names of every entry left on a cycle.
    #[error("circular dependency between: {}", symbols.join(", "))]
    CircularDependency { symbols: Vec<String> },

    /// Errors accumulated while evaluating one layer in parallel.
    #[error("evaluation failed for layer {layer}: {}", messages.join("; "))]
    Evaluation { layer: usize, messages: Vec<String> },

    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
