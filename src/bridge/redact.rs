//! Output redaction.
//!
//! Scrubs credentials from captured script output before it is logged or
//! returned to the caller.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::trace;

use super::MASK;

/// A single ordered rewrite applied to captured output.
struct RedactionRule {
    name: &'static str,
    regex: Regex,
    replacement: String,
}

impl RedactionRule {
    fn new(name: &'static str, pattern: &str, replacement: impl Into<String>) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid redaction pattern"),
            replacement: replacement.into(),
        }
    }
}

lazy_static! {
    /// Applied in order; an earlier rule may consume text a later one would match.
    static ref RULES: Vec<RedactionRule> = vec![
        RedactionRule::new(
            "password_flag",
            r"(?i)--([\w-]*password[\w-]*)=\S+",
            format!("--${{1}}={MASK}"),
        ),
        RedactionRule::new(
            "password_label",
            r"(?i)([\w-]*password):[ \t]*\S+",
            format!("${{1}}: {MASK}"),
        ),
        RedactionRule::new(
            "auth_failure_hint",
            r"Authentication failed\. Please check username and password\.",
            "Authentication failed.",
        ),
    ];
}

/// Strip sensitive values from script output.
///
/// Never fails; text without a match is returned unchanged.
///
/// # Example
///
/// ```
/// use backup_validator::bridge::redact;
///
/// assert_eq!(redact("login --password=hunter2"), "login --password=********");
/// ```
pub fn redact(text: &str) -> String {
    let mut output = text.to_string();
    for rule in RULES.iter() {
        if rule.regex.is_match(&output) {
            trace!(rule = rule.name, "Redacting script output");
            output = rule
                .regex
                .replace_all(&output, rule.replacement.as_str())
                .into_owned();
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_flag() {
        assert_eq!(
            redact("running with --password=s3cr3t --host=db1"),
            "running with --password=******** --host=db1"
        );
    }

    #[test]
    fn test_prefixed_password_flags() {
        assert_eq!(
            redact("connecting --db_password=hunter2 --host=db1"),
            "connecting --db_password=******** --host=db1"
        );
        assert_eq!(redact("--Password=hunter2"), "--Password=********");
        assert_eq!(
            redact("--smtp-password-file=/run/secret"),
            "--smtp-password-file=********"
        );
    }

    #[test]
    fn test_prefixed_password_labels() {
        assert_eq!(redact("DB_PASSWORD: hunter2"), "DB_PASSWORD: ********");
        assert_eq!(redact("admin-password:x"), "admin-password: ********");
    }

    #[test]
    fn test_password_label_case_variants() {
        assert_eq!(redact("password: abc"), "password: ********");
        assert_eq!(redact("Password: abc"), "Password: ********");
        assert_eq!(redact("PASSWORD:abc"), "PASSWORD: ********");
    }

    #[test]
    fn test_auth_failure_sentence() {
        assert_eq!(
            redact("Authentication failed. Please check username and password."),
            "Authentication failed."
        );
    }

    #[test]
    fn test_multiline_output() {
        let input = "step 1 ok\npassword: hunter2\nstep 2 ok --password=x";
        assert_eq!(
            redact(input),
            "step 1 ok\npassword: ********\nstep 2 ok --password=********"
        );
    }

    #[test]
    fn test_no_match_is_noop() {
        let input = "backup verified: 42 files, 0 errors";
        assert_eq!(redact(input), input);
        assert_eq!(redact(""), "");
    }

    #[test]
    fn test_label_without_value_untouched() {
        assert_eq!(redact("password:"), "password:");
    }
}
