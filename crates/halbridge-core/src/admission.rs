//! Admission heuristics for overheard chat lines.
//!
//! Decides, per line, whether it is a direct query for the bot, something
//! worth learning from, or noise.

use regex::Regex;
use tracing::warn;

use crate::text::{contains_url, strip_formatting};

/// Shortest normalized message, in characters, that is learned from.
pub const DEFAULT_MIN_MESSAGE_LENGTH: usize = 12;

/// Why a line was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The line carries an `http`/`https` link.
    ContainsUrl,
    /// Shorter than the minimum length.
    TooShort,
    /// Starts with `!` or `.`, a trigger for some other bot.
    CommandPrefix,
}

/// What to do with one chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Addressed to the bot: ask the subprocess and reply to the speaker.
    Direct(String),
    /// Feed to the subprocess as passive training input.
    Learn(String),
    Skip(SkipReason),
}

/// A single non-word character, ASCII rules: `æ` and `≈` both count as
/// separators. Case folding must not widen the class.
const SEPARATOR: &str = "(?-i:[^0-9A-Za-z_])";

/// Compiled prefix/suffix patterns for one nickname list.
#[derive(Debug)]
struct AddressPatterns {
    names: Vec<String>,
    prefix: Regex,
    suffix: Regex,
}

impl AddressPatterns {
    fn compile(names: &[String]) -> Option<Self> {
        let alternatives: Vec<String> = names
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| regex::escape(name))
            .collect();
        if alternatives.is_empty() {
            return None;
        }
        let alternation = alternatives.join("|");

        let prefix = Regex::new(&format!(r"(?i)^(?:{alternation}){SEPARATOR} (.+)"));
        let suffix = Regex::new(&format!(r"(?i)^(.*?){SEPARATOR}+(?:{alternation})$"));
        match (prefix, suffix) {
            (Ok(prefix), Ok(suffix)) => Some(Self {
                names: names.to_vec(),
                prefix,
                suffix,
            }),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, count = names.len(), "Failed to compile nickname patterns");
                None
            }
        }
    }

    fn extract(&self, text: &str) -> Option<String> {
        self.prefix
            .captures(text)
            .or_else(|| self.suffix.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|rest| rest.as_str().to_string())
    }
}

/// Compiled `<bot><sep> <query>` pattern for one bot nickname.
#[derive(Debug)]
struct DirectPattern {
    bot: String,
    regex: Regex,
}

impl DirectPattern {
    fn compile(bot: &str) -> Option<Self> {
        if bot.is_empty() {
            return None;
        }
        match Regex::new(&format!(r"(?i)^{}{SEPARATOR} (.+)", regex::escape(bot))) {
            Ok(regex) => Some(Self {
                bot: bot.to_string(),
                regex,
            }),
            Err(e) => {
                warn!(error = %e, bot, "Failed to compile direct query pattern");
                None
            }
        }
    }

    fn extract(&self, text: &str) -> Option<String> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|query| query.as_str().to_string())
    }
}

/// Classifies chat lines. Holds the compiled patterns between calls and
/// recompiles them whenever the bot nickname or the nickname list changes.
#[derive(Debug)]
pub struct AdmissionHeuristics {
    min_length: usize,
    direct: Option<DirectPattern>,
    patterns: Option<AddressPatterns>,
}

impl Default for AdmissionHeuristics {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_MESSAGE_LENGTH)
    }
}

impl AdmissionHeuristics {
    pub const fn new(min_length: usize) -> Self {
        Self {
            min_length,
            direct: None,
            patterns: None,
        }
    }

    /// Classify one chat line heard on a channel.
    ///
    /// `bot` is the bot's own nickname; `names` the known nicknames.
    pub fn classify(&mut self, bot: &str, text: &str, names: &[String]) -> Admission {
        let text = strip_formatting(text);
        if contains_url(&text) {
            return Admission::Skip(SkipReason::ContainsUrl);
        }
        if let Some(query) = self.direct_query(bot, &text) {
            return Admission::Direct(query);
        }
        self.classify_passive(&text, names)
    }

    /// Apply the passive-learning filters to normalized text.
    pub fn classify_passive(&mut self, text: &str, names: &[String]) -> Admission {
        if contains_url(text) {
            return Admission::Skip(SkipReason::ContainsUrl);
        }
        if text.chars().count() < self.min_length {
            return Admission::Skip(SkipReason::TooShort);
        }
        if let Some(rest) = self.patterns_for(names).and_then(|p| p.extract(text)) {
            return Admission::Learn(rest);
        }
        if text.starts_with(['!', '.']) {
            return Admission::Skip(SkipReason::CommandPrefix);
        }
        Admission::Learn(text.to_string())
    }

    /// Extract the query from `<bot><sep> <query>`, ignoring case.
    pub fn direct_query(&mut self, bot: &str, text: &str) -> Option<String> {
        let stale = self.direct.as_ref().is_none_or(|direct| direct.bot != bot);
        if stale {
            self.direct = DirectPattern::compile(bot);
        }
        self.direct.as_ref()?.extract(text)
    }

    fn patterns_for(&mut self, names: &[String]) -> Option<&AddressPatterns> {
        let stale = self
            .patterns
            .as_ref()
            .is_none_or(|patterns| patterns.names != names);
        if stale {
            self.patterns = AddressPatterns::compile(names);
        }
        self.patterns.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn length_boundary_is_twelve_characters() {
        let mut heuristics = AdmissionHeuristics::default();
        assert_eq!(
            heuristics.classify_passive("short text!", &[]),
            Admission::Skip(SkipReason::TooShort)
        );
        assert_eq!(
            heuristics.classify_passive("short text!!", &[]),
            Admission::Learn("short text!!".into())
        );
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let mut heuristics = AdmissionHeuristics::default();
        assert_eq!(
            heuristics.classify_passive("æøåæøåæøåæø", &[]),
            Admission::Skip(SkipReason::TooShort)
        );
    }

    #[test]
    fn links_are_never_learned() {
        let mut heuristics = AdmissionHeuristics::default();
        let known = names(&["Alice"]);
        for line in [
            "http://example.com",
            "Alice: look at http://example.com it is great",
            "megahal: what is http://example.com",
        ] {
            assert_eq!(
                heuristics.classify("megahal", line, &known),
                Admission::Skip(SkipReason::ContainsUrl),
                "{line}"
            );
        }
    }

    #[test]
    fn extracts_prefix_and_suffix_addressing() {
        let mut heuristics = AdmissionHeuristics::default();
        let known = names(&["Bob", "Alice"]);
        assert_eq!(
            heuristics.classify_passive("Alice: how are you", &known),
            Admission::Learn("how are you".into())
        );
        assert_eq!(
            heuristics.classify_passive("how are you Alice", &known),
            Admission::Learn("how are you".into())
        );
        assert_eq!(
            heuristics.classify_passive("alice, how are you", &known),
            Admission::Learn("how are you".into())
        );
        assert_eq!(
            heuristics.classify_passive("what do you think, bob?", &known),
            Admission::Learn("what do you think, bob?".into())
        );
    }

    #[test]
    fn nicknames_are_escaped() {
        let mut heuristics = AdmissionHeuristics::default();
        let known = names(&["[afk]joe", "a.b"]);
        assert_eq!(
            heuristics.classify_passive("[afk]joe: are you back yet", &known),
            Admission::Learn("are you back yet".into())
        );
        assert_eq!(
            heuristics.classify_passive("axb: this should stay whole", &known),
            Admission::Learn("axb: this should stay whole".into())
        );
    }

    #[test]
    fn command_prefixes_are_skipped() {
        let mut heuristics = AdmissionHeuristics::default();
        assert_eq!(
            heuristics.classify_passive("!weather copenhagen", &[]),
            Admission::Skip(SkipReason::CommandPrefix)
        );
        assert_eq!(
            heuristics.classify_passive(".seen somebody else", &[]),
            Admission::Skip(SkipReason::CommandPrefix)
        );
    }

    #[test]
    fn addressing_wins_over_command_prefix() {
        let mut heuristics = AdmissionHeuristics::default();
        let known = names(&["Alice"]);
        assert_eq!(
            heuristics.classify_passive("...and then Alice", &known),
            Admission::Learn("...and then".into())
        );
    }

    #[test]
    fn direct_queries_bypass_length_filter() {
        let mut heuristics = AdmissionHeuristics::default();
        assert_eq!(
            heuristics.classify("MegaHAL", "megahal: hi", &[]),
            Admission::Direct("hi".into())
        );
        assert_eq!(
            heuristics.classify("MegaHAL", "\x02MegaHAL\x02, \x034sup?", &[]),
            Admission::Direct("sup?".into())
        );
    }

    #[test]
    fn bot_name_without_separator_is_not_direct() {
        let mut heuristics = AdmissionHeuristics::default();
        assert!(heuristics.direct_query("hal", "halfway there").is_none());
        assert!(heuristics.direct_query("hal", "hal:").is_none());
        assert!(heuristics.direct_query("", "anything goes").is_none());
    }

    #[test]
    fn direct_pattern_follows_bot_rename() {
        let mut heuristics = AdmissionHeuristics::default();
        assert_eq!(heuristics.direct_query("hal", "hal: hello"), Some("hello".into()));
        assert_eq!(heuristics.direct_query("eliza", "hal: hello"), None);
        assert_eq!(
            heuristics.direct_query("eliza", "ELIZA, hello"),
            Some("hello".into())
        );
    }

    #[test]
    fn separators_follow_ascii_word_rules() {
        let mut heuristics = AdmissionHeuristics::default();
        let known = names(&["Alice"]);
        assert_eq!(
            heuristics.classify_passive("Aliceæ how are you", &known),
            Admission::Learn("how are you".into())
        );
        assert_eq!(
            heuristics.classify_passive("Alice≈ hi there friend", &known),
            Admission::Learn("hi there friend".into())
        );
        assert_eq!(
            heuristics.classify_passive("is it nice today æAlice", &known),
            Admission::Learn("is it nice today".into())
        );
        assert_eq!(
            heuristics.classify_passive("Alice_ how are you", &known),
            Admission::Learn("Alice_ how are you".into())
        );
        assert_eq!(heuristics.direct_query("hal", "halæ what now"), Some("what now".into()));
    }

    #[test]
    fn formatting_is_stripped_before_learning() {
        let mut heuristics = AdmissionHeuristics::default();
        assert_eq!(
            heuristics.classify("megahal", "\x0304this is \x02quite\x02 colourful", &[]),
            Admission::Learn("this is quite colourful".into())
        );
    }

    #[test]
    fn patterns_follow_name_changes() {
        let mut heuristics = AdmissionHeuristics::default();
        assert_eq!(
            heuristics.classify_passive("Carol: nice weather today", &names(&["Alice"])),
            Admission::Learn("Carol: nice weather today".into())
        );
        assert_eq!(
            heuristics.classify_passive("Carol: nice weather today", &names(&["Alice", "Carol"])),
            Admission::Learn("nice weather today".into())
        );
    }
}
