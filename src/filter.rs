//! Utterance filter: decides whether a final transcript is a real request.
//!
//! Open-mic recognition produces a steady trickle of fragments: coughs
//! transcribed as "the", half words, and pieces of the assistant's own voice
//! bleeding back into the microphone. The filter is a cheap heuristic gate in
//! front of the scene query:
//!
//! 1. **Echo**: the transcript contains a denylisted phrase, or its words are a
//!    contiguous run of something the assistant said recently.
//! 2. **Accept**: at least `min_words` words, or a keyword plus at least
//!    `keyword_min_words` words.
//! 3. **Noise**: everything else.
//!
//! False accepts cost one spurious query; false rejects cost the user repeating
//! themselves. Neither is fatal.

use crate::config::FilterConfig;
use std::collections::{HashSet, VecDeque};

/// What kind of scene query an accepted utterance asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// General "what's in front of me" description.
    DescribeScene,
    /// A specific question about the current view.
    Question,
}

/// Classification of a final transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Genuine request; forward to the scene service.
    Accept(QueryKind),
    /// Too short or too vague to act on.
    Noise,
    /// The assistant hearing itself.
    Echo,
}

impl Verdict {
    /// Whether the transcript should trigger a query.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

/// Word-count, keyword and echo-denylist gate for final transcripts.
#[derive(Debug, Clone)]
pub struct UtteranceFilter {
    min_words: usize,
    keyword_min_words: usize,
    keywords: HashSet<String>,
    echo_phrases: Vec<Vec<String>>,
    describe_phrases: Vec<Vec<String>>,
    recent_outputs: VecDeque<Vec<String>>,
    recent_capacity: usize,
}

impl UtteranceFilter {
    /// Build a filter from configuration. Phrases are normalized once here.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            min_words: config.min_words,
            keyword_min_words: config.keyword_min_words.max(1),
            keywords: config
                .keywords
                .iter()
                .flat_map(|k| normalize_words(k))
                .collect(),
            echo_phrases: normalized_phrases(&config.echo_phrases),
            describe_phrases: normalized_phrases(&config.describe_phrases),
            recent_outputs: VecDeque::new(),
            recent_capacity: config.recent_output_memory,
        }
    }

    /// Classify a final transcript.
    pub fn classify(&self, transcript: &str) -> Verdict {
        let words = normalize_words(transcript);
        if words.is_empty() {
            return Verdict::Noise;
        }

        if self.is_echo(&words) {
            return Verdict::Echo;
        }

        let has_keyword = words.iter().any(|w| self.keywords.contains(w));
        let accepted = words.len() >= self.min_words
            || (has_keyword && words.len() >= self.keyword_min_words);
        if !accepted {
            return Verdict::Noise;
        }

        if self
            .describe_phrases
            .iter()
            .any(|phrase| contains_run(&words, phrase))
        {
            Verdict::Accept(QueryKind::DescribeScene)
        } else {
            Verdict::Accept(QueryKind::Question)
        }
    }

    /// Remember text the assistant is about to speak so its echo can be rejected.
    pub fn remember_output(&mut self, text: &str) {
        if self.recent_capacity == 0 {
            return;
        }
        let words = normalize_words(text);
        if words.is_empty() {
            return;
        }
        while self.recent_outputs.len() >= self.recent_capacity {
            let _ = self.recent_outputs.pop_front();
        }
        self.recent_outputs.push_back(words);
    }

    /// Number of remembered outputs.
    pub fn recent_output_count(&self) -> usize {
        self.recent_outputs.len()
    }

    fn is_echo(&self, words: &[String]) -> bool {
        self.echo_phrases
            .iter()
            .any(|phrase| contains_run(words, phrase))
            || self
                .recent_outputs
                .iter()
                .any(|spoken| contains_run(spoken, words))
    }
}

fn normalized_phrases(phrases: &[String]) -> Vec<Vec<String>> {
    phrases
        .iter()
        .map(|p| normalize_words(p))
        .filter(|words| !words.is_empty())
        .collect()
}

/// Lowercase, expand contractions, strip punctuation, split into words.
///
/// "What's that?" → `["what", "is", "that"]`.
pub fn normalize_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .flat_map(|token| {
            let token: String = token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .collect();
            expand_contraction(token.trim_matches('\''))
        })
        .map(|word| word.replace('\'', ""))
        .filter(|word| !word.is_empty())
        .collect()
}

/// Expand a single lowercase token. Unknown tokens pass through.
fn expand_contraction(token: &str) -> Vec<String> {
    let expanded: &[&str] = match token {
        "what's" => &["what", "is"],
        "where's" => &["where", "is"],
        "who's" => &["who", "is"],
        "how's" => &["how", "is"],
        "that's" => &["that", "is"],
        "there's" => &["there", "is"],
        "it's" => &["it", "is"],
        "i'm" => &["i", "am"],
        "i'll" => &["i", "will"],
        "i've" => &["i", "have"],
        "i'd" => &["i", "would"],
        "you're" => &["you", "are"],
        "you'll" => &["you", "will"],
        "you'd" => &["you", "would"],
        "can't" => &["cannot"],
        "won't" => &["will", "not"],
        "don't" => &["do", "not"],
        "doesn't" => &["does", "not"],
        "didn't" => &["did", "not"],
        "isn't" => &["is", "not"],
        "aren't" => &["are", "not"],
        "couldn't" => &["could", "not"],
        _ => return vec![token.to_owned()],
    };
    expanded.iter().map(|w| (*w).to_owned()).collect()
}

/// Whether `needle` occurs as a contiguous run of words inside `haystack`.
fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn filter() -> UtteranceFilter {
        UtteranceFilter::new(&FilterConfig::default())
    }

    #[test]
    fn normalize_expands_contractions_and_strips_punctuation() {
        assert_eq!(normalize_words("What's that?"), vec!["what", "is", "that"]);
        assert_eq!(normalize_words("  I\u{2019}m   HERE, ok. "), vec!["i", "am", "here", "ok"]);
        assert_eq!(normalize_words("rock 'n' roll"), vec!["rock", "n", "roll"]);
        assert!(normalize_words("...").is_empty());
    }

    #[test]
    fn four_words_with_keyword_is_a_describe_request() {
        assert_eq!(
            filter().classify("what do you see"),
            Verdict::Accept(QueryKind::DescribeScene)
        );
    }

    #[test]
    fn single_filler_word_is_noise() {
        assert_eq!(filter().classify("the"), Verdict::Noise);
        assert_eq!(filter().classify(""), Verdict::Noise);
        assert_eq!(filter().classify("   "), Verdict::Noise);
    }

    #[test]
    fn keyword_needs_two_words() {
        let f = filter();
        assert_eq!(f.classify("help"), Verdict::Noise);
        assert_eq!(f.classify("help me"), Verdict::Accept(QueryKind::Question));
        assert_eq!(f.classify("where door"), Verdict::Accept(QueryKind::Question));
    }

    #[test]
    fn long_utterance_without_keyword_is_accepted() {
        assert_eq!(
            filter().classify("the red bus stop sign"),
            Verdict::Accept(QueryKind::Question)
        );
    }

    #[test]
    fn short_utterance_without_keyword_is_noise() {
        assert_eq!(filter().classify("red bus stop"), Verdict::Noise);
    }

    #[test]
    fn denylisted_phrase_is_echo_at_any_length() {
        let f = filter();
        assert_eq!(f.classify("I'm listening"), Verdict::Echo);
        assert_eq!(
            f.classify("okay so what i'm listening to is the radio over there"),
            Verdict::Echo
        );
        assert_eq!(f.classify("the camera is not ready"), Verdict::Echo);
    }

    #[test]
    fn fragment_of_recent_output_is_echo() {
        let mut f = filter();
        f.remember_output("There is a wooden chair about two steps ahead of you.");
        assert_eq!(f.classify("a wooden chair about two steps"), Verdict::Echo);
        assert_eq!(f.classify("chair"), Verdict::Echo);
        assert_eq!(
            f.classify("where is the wooden chair"),
            Verdict::Accept(QueryKind::Question)
        );
    }

    #[test]
    fn recent_output_memory_is_bounded() {
        let mut f = UtteranceFilter::new(&FilterConfig {
            recent_output_memory: 2,
            ..FilterConfig::default()
        });
        f.remember_output("first answer about a lamp");
        f.remember_output("second answer about a table");
        f.remember_output("third answer about a window");
        assert_eq!(f.recent_output_count(), 2);
        // Oldest answer has been forgotten.
        assert_eq!(
            f.classify("first answer about a lamp"),
            Verdict::Accept(QueryKind::Question)
        );
        assert_eq!(f.classify("answer about a window"), Verdict::Echo);
    }

    #[test]
    fn zero_memory_never_remembers() {
        let mut f = UtteranceFilter::new(&FilterConfig {
            recent_output_memory: 0,
            ..FilterConfig::default()
        });
        f.remember_output("a chair ahead");
        assert_eq!(f.recent_output_count(), 0);
    }

    #[test]
    fn describe_phrase_inside_longer_question() {
        assert_eq!(
            filter().classify("can you describe the room please"),
            Verdict::Accept(QueryKind::DescribeScene)
        );
        assert_eq!(
            filter().classify("what's in front of me"),
            Verdict::Accept(QueryKind::DescribeScene)
        );
    }

    #[test]
    fn contains_run_requires_contiguity() {
        let hay = normalize_words("a b c d");
        assert!(contains_run(&hay, &normalize_words("b c")));
        assert!(!contains_run(&hay, &normalize_words("b d")));
        assert!(!contains_run(&hay, &[]));
        assert!(!contains_run(&normalize_words("a"), &hay));
    }
}
