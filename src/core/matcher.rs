//! Prompt detection
//!
//! Recognizes shell prompts, `login:` and `Password:` prompts in console
//! output. The caller's prompt regex is always tried before the generic
//! fallback so a custom pattern takes precedence.

use super::error::RunError;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::sync::OnceLock;

/// Generic `user@host:path$` / `#` prompt
pub const FALLBACK_SHELL_PROMPT_REGEX: &str =
    r"(?:^|\r?\n)[^\r\n]*@[a-zA-Z0-9_.-]+:[^\r\n]*[$#](?:\s|$)";

/// `login:` at line start, optionally after a getty hostname
pub const LOGIN_PROMPT_REGEX: &str = r"(?:^|\r?\n)(?:[\w.-]+ )?login:\s*$";

/// `Password:` at line start
pub const PASSWORD_PROMPT_REGEX: &str = r"(?:^|\r?\n)Password:\s*$";

/// What a piece of console output is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// An interactive shell prompt
    Shell,
    /// A getty login prompt
    Login,
    /// A password prompt
    Password,
}

/// Compile a pattern with multi-line, CRLF-aware anchors
pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .crlf(true)
        .build()
}

fn ansi_csi() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI regex"))
}

/// Remove ANSI CSI escape sequences
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ansi_csi().replace_all(text, "")
}

/// Compiled prompt patterns for one session
#[derive(Debug, Clone)]
pub struct PromptMatcher {
    prompt: Regex,
    fallback: Regex,
    login: Regex,
    password: Regex,
}

impl PromptMatcher {
    /// Build a matcher around the caller's shell-prompt regex
    pub fn new(prompt_regex: &str) -> Result<Self, RunError> {
        let prompt = compile(prompt_regex)
            .map_err(|e| RunError::Config(format!("invalid prompt regex {prompt_regex:?}: {e}")))?;
        Ok(Self {
            prompt,
            fallback: compile(FALLBACK_SHELL_PROMPT_REGEX).expect("valid fallback regex"),
            login: compile(LOGIN_PROMPT_REGEX).expect("valid login regex"),
            password: compile(PASSWORD_PROMPT_REGEX).expect("valid password regex"),
        })
    }

    /// Whether `text` contains something that looks like a shell prompt
    pub fn looks_like_shell(&self, text: &str) -> bool {
        if self.prompt.is_match(text) || self.fallback.is_match(text) {
            return true;
        }

        text.split('\n').any(|raw_line| {
            let line = strip_ansi(raw_line);
            line.contains('@') && line.contains(':') && (line.contains('$') || line.contains('#'))
        })
    }

    /// Whether `text` ends at a login prompt
    pub fn is_login(&self, text: &str) -> bool {
        self.login.is_match(text)
    }

    /// Whether `text` ends at a password prompt
    pub fn is_password(&self, text: &str) -> bool {
        self.password.is_match(text)
    }

    /// Classify output; shell beats password beats login
    pub fn classify(&self, text: &str) -> Option<PromptKind> {
        if text.is_empty() {
            None
        } else if self.looks_like_shell(text) {
            Some(PromptKind::Shell)
        } else if self.is_password(text) {
            Some(PromptKind::Password)
        } else if self.is_login(text) {
            Some(PromptKind::Login)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> PromptMatcher {
        PromptMatcher::new(r"(?:nvidia@nvidia:.*[$#]|[$#]) ?$").unwrap()
    }

    #[test]
    fn test_caller_prompt() {
        let m = matcher();
        assert_eq!(m.classify("\r\nnvidia@nvidia:~$ "), Some(PromptKind::Shell));
        assert_eq!(m.classify("boot ok\r\n# "), Some(PromptKind::Shell));
    }

    #[test]
    fn test_fallback_prompt_with_custom_regex() {
        let m = PromptMatcher::new("^never-matches$").unwrap();
        assert!(m.looks_like_shell("\r\nroot@jetson:/tmp# "));
        assert!(!m.looks_like_shell("U-Boot 2020.04\r\nHit any key"));
    }

    #[test]
    fn test_ansi_colored_prompt() {
        let m = PromptMatcher::new("^never-matches$").unwrap();
        let colored = "\x1b[01;32mroot@dev\x1b[00m:\x1b[01;34m~\x1b[00m# ";
        assert!(m.looks_like_shell(colored));
        assert_eq!(strip_ansi(colored), "root@dev:~# ");
    }

    #[test]
    fn test_login_and_password_prompts() {
        let m = PromptMatcher::new("^never-matches$").unwrap();
        assert_eq!(m.classify("\r\njetson login: "), Some(PromptKind::Login));
        assert_eq!(m.classify("Ubuntu 20.04\r\nlogin: "), Some(PromptKind::Login));
        assert_eq!(m.classify("root\r\nPassword: "), Some(PromptKind::Password));
        assert_eq!(m.classify("Last login: Mon Jan  1"), None);
    }

    #[test]
    fn test_invalid_prompt_regex_is_config_error() {
        let err = PromptMatcher::new("([unclosed").unwrap_err();
        assert!(matches!(err, RunError::Config(_)));
    }
}
