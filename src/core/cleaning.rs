//! Cleaning of noisy title and artist strings before metadata searches
//!
//! Providers report titles like `Song (2015 Remaster)` or `Song - Radio Edit`.
//! The suffix is dropped only when it looks like descriptor noise ("guff"),
//! so `Song (Live in Berlin with Full Orchestra)` keeps its parenthetical.

use lazy_static::lazy_static;
use regex::Regex;

/// A base shorter than this is never accepted as the cleaned value
const MIN_BASE_CHARS: usize = 3;

/// Bound on rule passes for inputs with several stacked suffixes
const MAX_PASSES: usize = 4;

lazy_static! {
    // Trailing "(…)" or "[…]"
    static ref BRACKET_SUFFIX: Regex = Regex::new(
        r"^(?P<base>.+?)\s*[\(\[](?P<suffix>[^\(\)\[\]]*)[\)\]]\s*$"
    ).unwrap();

    // "Song feat. Someone"
    static ref FEAT_CLAUSE: Regex = Regex::new(
        r"(?i)^(?P<base>.+?)\s+(?P<suffix>(?:feat\.?|ft\.?|featuring)\s+.+)$"
    ).unwrap();

    // "Song - Something"
    static ref DASH_SUFFIX: Regex = Regex::new(
        r"^(?P<base>.+?)\s+[-–—]\s+(?P<suffix>.+)$"
    ).unwrap();

    // "Artist, Other Artist"
    static ref ARTIST_COMMA: Regex = Regex::new(
        r"^(?P<base>.+?)\s*,\s*(?P<suffix>.+)$"
    ).unwrap();

    // "Artist & Other", "Artist with Other", "Artist feat. Other"
    static ref ARTIST_JOINER: Regex = Regex::new(
        r"(?i)^(?P<base>.+?)\s+(?:&|with|feat\.?|ft\.?|featuring)\s+(?P<suffix>.+)$"
    ).unwrap();

    // Descriptor vocabulary that marks a suffix as noise
    static ref GUFF_WORDS: Regex = Regex::new(
        r"(?i)\b(?:re-?master(?:ed)?|live|re-?mix(?:ed)?|mix|acoustic|radio\s+edit|edit|version|mono|stereo|demo|instrumental|deluxe|edition|single|extended|original|bonus(?:\s+track)?|explicit|clean|re-?recorded|unplugged|session|take|feat\.?|ft\.?|featuring|digital(?:ly)?|anniversary|expanded|reissue|album|from|soundtrack|ost)\b"
    ).unwrap();

    static ref YEAR: Regex = Regex::new(r"\b\d{4}\b").unwrap();

    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

struct Rule {
    pattern: &'static Regex,
    /// Drop the suffix without the guff test
    always_drop: bool,
}

/// Title/artist cleaner bound to a preferred Unicode script
pub struct Cleaner {
    script_filter: Option<Regex>,
}

impl Cleaner {
    /// `preferred_script` is a Unicode script name such as `Latin`; empty disables filtering
    pub fn new(preferred_script: &str) -> Self {
        let script = preferred_script.trim();
        if script.is_empty() {
            return Self {
                script_filter: None,
            };
        }

        let pattern = format!(r"[^\p{{{}}}\p{{Common}}\p{{Inherited}}]", script);
        let script_filter = match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Unknown preferred script '{}': {}", script, e);
                None
            }
        };

        Self { script_filter }
    }

    /// Clean a recording title
    pub fn clean_recording(&self, title: &str) -> String {
        let rules = [
            Rule {
                pattern: &BRACKET_SUFFIX,
                always_drop: false,
            },
            Rule {
                pattern: &FEAT_CLAUSE,
                always_drop: false,
            },
            Rule {
                pattern: &DASH_SUFFIX,
                always_drop: false,
            },
        ];
        self.clean(title, &rules)
    }

    /// Clean an artist string down to its primary artist
    pub fn clean_artist(&self, artist: &str) -> String {
        let rules = [
            Rule {
                pattern: &ARTIST_COMMA,
                always_drop: true,
            },
            Rule {
                pattern: &ARTIST_JOINER,
                always_drop: true,
            },
        ];
        self.clean(artist, &rules)
    }

    fn clean(&self, input: &str, rules: &[Rule]) -> String {
        if !brackets_balanced(input) {
            return input.to_string();
        }

        let mut current = self.strip_foreign_script(input);
        for _ in 0..MAX_PASSES {
            let next = apply_rules(&current, rules);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Remove characters outside the preferred script, unless that leaves no letters
    fn strip_foreign_script(&self, input: &str) -> String {
        let Some(filter) = &self.script_filter else {
            return input.trim().to_string();
        };

        let stripped = filter.replace_all(input, "");
        if !stripped.chars().any(|c| c.is_alphabetic()) {
            return input.to_string();
        }
        collapse_whitespace(&stripped)
    }
}

fn apply_rules(input: &str, rules: &[Rule]) -> String {
    let mut current = input.to_string();

    for rule in rules {
        let Some(caps) = rule.pattern.captures(&current) else {
            continue;
        };
        let base = caps.name("base").map(|m| m.as_str().trim()).unwrap_or("");
        let suffix = caps.name("suffix").map(|m| m.as_str().trim()).unwrap_or("");

        if base.chars().count() < MIN_BASE_CHARS {
            continue;
        }

        if rule.always_drop || is_likely_guff(suffix) {
            current = base.to_string();
        }
    }

    current
}

/// A suffix is guff when descriptor words, years and symbols outweigh the remaining letters
pub fn is_likely_guff(suffix: &str) -> bool {
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return true;
    }

    let without_words = GUFF_WORDS.replace_all(suffix, "");
    let leftover = YEAR.replace_all(&without_words, "");

    let letters = leftover.chars().filter(|c| c.is_alphabetic()).count();
    let guff = suffix.chars().count() - letters;

    guff > letters
}

fn brackets_balanced(input: &str) -> bool {
    let mut stack = Vec::new();
    for c in input.chars() {
        match c {
            '(' | '[' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

fn collapse_whitespace(input: &str) -> String {
    WHITESPACE.replace_all(input.trim(), " ").to_string()
}
