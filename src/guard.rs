//! Missing-binary guard.
//!
//! Scenario items only make sense when a SIPp binary can be resolved. The
//! runner probes before each such item and reports a [`SippNotFound`] instead
//! of running it.

use std::path::PathBuf;

use miette::Diagnostic;

use crate::error::{SIPP_DOCS_URL, SippNotFound};

const BANNER: &str = "Could not find a suitable SIPp binary.";
const QUESTION: &str = "Is it installed properly?";

/// Resolves a binary name to an executable.
pub trait BinaryProbe: Send + Sync {
    fn locate(&self, binary: &str) -> Option<PathBuf>;
}

/// Looks the binary up on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathProbe;

impl BinaryProbe for PathProbe {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        which::which(binary).ok()
    }
}

/// Resolve `binary` or explain why it could not be.
pub fn check(probe: &dyn BinaryProbe, binary: &str) -> Result<PathBuf, SippNotFound> {
    match probe.locate(binary) {
        Some(path) => {
            tracing::trace!(path = %path.display(), "SIPp binary found");
            Ok(path)
        }
        None => {
            tracing::warn!(binary, "SIPp binary not found");
            Err(SippNotFound {
                binary: binary.to_string(),
            })
        }
    }
}

/// Report text for a missing binary. With `color`, the banner sentence is
/// bold red.
pub fn render_report(err: &SippNotFound, color: bool) -> String {
    let (on, off) = if color { ("\x1b[1;31m", "\x1b[0m") } else { ("", "") };
    let url = err
        .url()
        .map(|u| u.to_string())
        .unwrap_or_else(|| SIPP_DOCS_URL.to_string());
    format!("\n    {on}{BANNER}{off} {QUESTION}\n    See {url} for instructions.\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    impl BinaryProbe for Fixed {
        fn locate(&self, _binary: &str) -> Option<PathBuf> {
            self.0.map(PathBuf::from)
        }
    }

    #[test]
    fn test_check_found() {
        assert_eq!(check(&Fixed(Some("/usr/bin/sipp")), "sipp").unwrap(), PathBuf::from("/usr/bin/sipp"));
    }

    #[test]
    fn test_check_missing_names_binary() {
        let err = check(&Fixed(None), "sipp-3.7").unwrap_err();
        assert_eq!(err.binary, "sipp-3.7");
    }

    #[test]
    fn test_plain_report() {
        let err = SippNotFound {
            binary: "sipp".to_string(),
        };
        assert_eq!(
            render_report(&err, false),
            "\n    Could not find a suitable SIPp binary. Is it installed properly?\n    \
             See https://sipp.readthedocs.io/en/latest/installation.html for instructions.\n"
        );
    }

    #[test]
    fn test_colored_report_highlights_banner_only() {
        let err = SippNotFound {
            binary: "sipp".to_string(),
        };
        let report = render_report(&err, true);
        assert!(report.contains("\x1b[1;31mCould not find a suitable SIPp binary.\x1b[0m Is it installed properly?"));
    }

    #[test]
    fn test_path_probe_misses_nonsense() {
        assert!(PathProbe.locate("definitely-not-a-sipp-binary-7f3a").is_none());
    }
}
