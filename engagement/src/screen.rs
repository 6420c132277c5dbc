//! Content screening: secret-leak guard for outbound text and mechanical
//! spam detection for incoming replies.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

struct SecretPattern {
    name: &'static str,
    regex: Regex,
}

static SECRET_PATTERNS: LazyLock<Vec<SecretPattern>> = LazyLock::new(|| {
    [
        ("platform_api_key", r"(?i)moltbook_sk_[A-Za-z0-9_-]{20,}"),
        ("openai_key", r"sk-[A-Za-z0-9]{20,}"),
        ("api_key", r#"(?i)api[_-]?key["\s:=]+[A-Za-z0-9_-]{20,}"#),
        ("bearer_token", r"(?i)bearer\s+[A-Za-z0-9_-]{20,}"),
        ("hex_private_key", r"0x[a-fA-F0-9]{64}"),
        ("bitcoin_wif", r"[5KL][1-9A-HJ-NP-Za-km-z]{50,51}"),
        ("pem_private_key", r"(?i)-----BEGIN.*PRIVATE KEY-----"),
        ("aws_access_key", r"AKIA[0-9A-Z]{16}"),
        ("aws_secret", r#"(?i)aws[_-]?secret["\s:=]+[A-Za-z0-9/+=]{40}"#),
        ("password", r#"(?i)password["\s:=]+\S{8,}"#),
        ("generic_secret", r#"(?i)secret["\s:=]+[A-Za-z0-9_-]{16,}"#),
    ]
    .into_iter()
    .map(|(name, pattern)| SecretPattern {
        name,
        regex: Regex::new(pattern).expect("secret pattern should compile"),
    })
    .collect()
});

/// Name of the first secret-like pattern found in `text`, if any.
///
/// The matched text itself is never returned.
pub fn detect_secret(text: &str) -> Option<&'static str> {
    SECRET_PATTERNS
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| p.name)
}

/// Why a reply was judged mechanical spam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamReason {
    Empty,
    Repetitive,
    CharNoise,
}

impl std::fmt::Display for SpamReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Repetitive => write!(f, "repetitive"),
            Self::CharNoise => write!(f, "char_noise"),
        }
    }
}

/// Flag only obviously mechanical noise. Low-effort or hostile text that
/// reads like language is left for the decision service to judge.
pub fn detect_spam(content: &str) -> Option<SpamReason> {
    let content = content.trim();
    let chars = content.chars().count();
    if chars < 2 {
        return Some(SpamReason::Empty);
    }

    let lowered = content.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if !words.is_empty() {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *counts.entry(word).or_insert(0) += 1;
        }
        let top = counts.values().copied().max().unwrap_or(0);
        if top >= 5 && top * 2 > words.len() {
            return Some(SpamReason::Repetitive);
        }
    }

    let readable = content
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .count();
    // readable / chars < 0.3
    if chars > 10 && readable * 10 < chars * 3 {
        return Some(SpamReason::CharNoise);
    }
    None
}
