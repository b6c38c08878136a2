//! Extraction of a bounded answer option from free-text model output.
//!
//! Three tiers of decreasing strictness are tried in order: the response
//! starting with an option, an option directly after the `### Your answer:`
//! marker line, and an option anywhere. A tier succeeds when it has matches
//! and they all name the same option; otherwise the next tier is tried.

use fancy_regex::Regex as FancyRegex;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ratings::Verdict;

// Option token optionally followed by its label, e.g. "3 - High", "?-Cannot judge".
const OPTION: &str = r"[1-3?](?: ?- ?(?:High|Medium|Low|Cannot judge))?";

static LEADING_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\A\s*{OPTION}")).expect("Invalid leading option regex"));

// Lookbehind keeps the marker out of the match text.
static ANSWER_OPTION: Lazy<FancyRegex> = Lazy::new(|| {
    FancyRegex::new(&format!(r"(?m)(?<=### Your answer:\n)^{OPTION}"))
        .expect("Invalid answer marker regex")
});

static ANY_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(OPTION).expect("Invalid option regex"));

/// Which tier of the cascade produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    LeadingOption,
    AnswerMarker,
    AnyOption,
}

/// A successfully extracted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedResponse {
    pub verdict: Verdict,
    pub tier: ParseTier,
}

/// Parse a model response; `None` is a true parse failure, distinct from an
/// explicit `?` answer.
pub fn parse_response(response: &str) -> Option<Verdict> {
    parse_response_detailed(response).map(|p| p.verdict)
}

pub fn parse_response_detailed(response: &str) -> Option<ParsedResponse> {
    let leading: Vec<&str> = LEADING_OPTION
        .find_iter(response)
        .map(|m| m.as_str())
        .collect();
    if let Some(v) = agreed_option(&leading) {
        return Some(ParsedResponse {
            verdict: v,
            tier: ParseTier::LeadingOption,
        });
    }

    // fancy-regex reports backtrack-limit errors per match; treat them as no match.
    let marked: Vec<&str> = ANSWER_OPTION
        .find_iter(response)
        .filter_map(Result::ok)
        .map(|m| m.as_str())
        .collect();
    if let Some(v) = agreed_option(&marked) {
        return Some(ParsedResponse {
            verdict: v,
            tier: ParseTier::AnswerMarker,
        });
    }

    let anywhere: Vec<&str> = ANY_OPTION.find_iter(response).map(|m| m.as_str()).collect();
    agreed_option(&anywhere).map(|v| ParsedResponse {
        verdict: v,
        tier: ParseTier::AnyOption,
    })
}

/// Reduce a match to its option character: text before any dash, trimmed.
fn option_token(matched: &str) -> &str {
    matched.split('-').next().unwrap_or(matched).trim()
}

/// The single option every match names, if there is one.
fn agreed_option(matches: &[&str]) -> Option<Verdict> {
    let (first, rest) = matches.split_first()?;
    let token = option_token(first);
    if rest.iter().any(|m| option_token(m) != token) {
        return None;
    }
    Verdict::from_option(token)
}

// =============================================================================
// TESTS
// =============================================================================
