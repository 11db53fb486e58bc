//! Extractor descriptors, execution mode, and the colon-separated
//! configuration grammar.
//!
//! The option-string parser follows an explicit-slice entry point returning
//! a structured result with consistently prefixed error strings; the
//! grammar itself is a colon-separated plugin list, one entry per
//! configured extractor.

use std::fmt;
use std::sync::Arc;

use libloading::Library;

use crate::worker::runtime::WorkerApi;

bitflags::bitflags! {
    /// Special per-extractor behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtractorFlags: u8 {
        /// Kill and respawn the worker after every file rather than reusing
        /// it for the next `EXTRACT_START`.
        const KILL_AFTER_EACH_FILE = 0b0000_0001;
        /// Close the worker's inherited stdout/stderr before it runs
        /// untrusted code (`extractor_plugins.h`'s `close std fds` flag).
        const CLOSE_STD_FDS = 0b0000_0010;
    }
}

/// A loaded extractor's entry point.
///
/// `Native` extractors run as an ordinary Rust closure and are used both for
/// in-process execution and for tests that don't need a real `.so`.
/// `Dynamic` extractors are opaque library handles resolved with
/// [`libloading`]; plugin discovery on disk is out of scope — the caller
/// already has a path and a symbol name.
#[derive(Clone)]
pub enum ExtractorEntry {
    Native(Arc<dyn Fn(&mut dyn WorkerApi) + Send + Sync>),
    Dynamic {
        library: Arc<Library>,
        symbol: String,
    },
}

impl fmt::Debug for ExtractorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractorEntry::Native(_) => f.write_str("ExtractorEntry::Native(..)"),
            ExtractorEntry::Dynamic { symbol, .. } => {
                f.debug_struct("ExtractorEntry::Dynamic").field("symbol", symbol).finish()
            }
        }
    }
}

/// Whether an extractor runs in its own worker process or synchronously,
/// in-process, against a fresh view of the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    OutOfProcess,
    InProcess,
}

/// Everything the engine needs to know about one configured extractor.
#[derive(Debug, Clone)]
pub struct ExtractorDescriptor {
    pub short_name: String,
    pub options: String,
    pub mode: ExecutionMode,
    pub flags: ExtractorFlags,
    pub entry: ExtractorEntry,
}

impl ExtractorDescriptor {
    pub fn native<F>(short_name: impl Into<String>, mode: ExecutionMode, f: F) -> ExtractorDescriptor
    where
        F: Fn(&mut dyn WorkerApi) + Send + Sync + 'static,
    {
        ExtractorDescriptor {
            short_name: short_name.into(),
            options: String::new(),
            mode,
            flags: ExtractorFlags::empty(),
            entry: ExtractorEntry::Native(Arc::new(f)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    UnterminatedParen(String),
    EmptyName(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnterminatedParen(tok) => {
                write!(f, "bad extractor config: unterminated '(' in {tok:?}")
            }
            ConfigError::EmptyName(tok) => write!(f, "bad extractor config: empty name in {tok:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// One parsed entry from a configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub remove: bool,
    pub name: String,
    pub options: String,
}

/// Parse `[-]NAME[(OPTIONS)][:...]`. A leading `-` marks removal of a
/// previously added extractor; `(OPTIONS)` carries that extractor's options
/// string; an unterminated `(` is an error.
pub fn parse_config_string(spec: &str) -> Result<Vec<ConfigEntry>, ConfigError> {
    let mut out = Vec::new();
    for token in spec.split(':').filter(|t| !t.is_empty()) {
        let mut rest = token;
        let remove = rest.starts_with('-');
        if remove {
            rest = &rest[1..];
        }
        let (name, options) = match rest.find('(') {
            Some(open) => {
                if !rest.ends_with(')') {
                    return Err(ConfigError::UnterminatedParen(token.to_string()));
                }
                (&rest[..open], &rest[open + 1..rest.len() - 1])
            }
            None => (rest, ""),
        };
        if name.is_empty() {
            return Err(ConfigError::EmptyName(token.to_string()));
        }
        out.push(ConfigEntry {
            remove,
            name: name.to_string(),
            options: options.to_string(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_name() {
        let entries = parse_config_string("mime").unwrap();
        assert_eq!(
            entries,
            vec![ConfigEntry {
                remove: false,
                name: "mime".to_string(),
                options: String::new()
            }]
        );
    }

    #[test]
    fn parses_name_with_options() {
        let entries = parse_config_string("ole2(verbose)").unwrap();
        assert_eq!(entries[0].name, "ole2");
        assert_eq!(entries[0].options, "verbose");
    }

    #[test]
    fn parses_removal_prefix() {
        let entries = parse_config_string("-mime").unwrap();
        assert!(entries[0].remove);
        assert_eq!(entries[0].name, "mime");
    }

    #[test]
    fn parses_multiple_colon_separated_entries() {
        let entries = parse_config_string("mime:-ole2:jpeg(exif)").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].name, "jpeg");
        assert_eq!(entries[2].options, "exif");
    }

    #[test]
    fn unterminated_paren_is_an_error() {
        let err = parse_config_string("ole2(verbose").unwrap_err();
        assert!(matches!(err, ConfigError::UnterminatedParen(_)));
    }

    #[test]
    fn empty_name_is_an_error() {
        let err = parse_config_string("(verbose)").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyName(_)));
    }
}
