use serde::{Deserialize, Serialize};

/// Bans an account for `duration_minutes` when an upstream error carries
/// `error_code` and its body contains any of `keywords` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempUnschedRule {
    pub error_code: u16,
    pub keywords: Vec<String>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub description: String,
}

impl TempUnschedRule {
    /// The first keyword found in `body`, if the status matches.
    pub fn matches(&self, status: u16, body: &str) -> Option<&str> {
        if status != self.error_code {
            return None;
        }
        let body = body.to_lowercase();
        self.keywords
            .iter()
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
            .find(|k| body.contains(&k.to_lowercase()))
    }
}

/// First rule in `rules` that matches, with its index and keyword.
pub fn first_match<'a>(
    rules: &'a [TempUnschedRule],
    status: u16,
    body: &str,
) -> Option<(usize, &'a TempUnschedRule, &'a str)> {
    rules
        .iter()
        .enumerate()
        .find_map(|(idx, rule)| rule.matches(status, body).map(|kw| (idx, rule, kw)))
}
