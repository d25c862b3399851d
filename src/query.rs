//! Translation of search parameters into Karp's extended query grammar.
//!
//! A query is a pipe-delimited expression such as
//! `extended||and|baselang.wordform|startswith|mum||and|subtype.search|equals|djur|växter`.

use crate::error::{Result, ServiceError};
use crate::settings::ModeProfile;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const MATCH_ALL: &str = ".*";

/// How the search word is matched against the word field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordMatch {
    Any,
    StartsWith(String),
    Contains(String),
}

impl WordMatch {
    pub fn new(word: &str, contains: bool) -> Self {
        if word.is_empty() {
            return WordMatch::Any;
        }
        let word = word.to_lowercase();
        if contains {
            WordMatch::Contains(word)
        } else {
            WordMatch::StartsWith(word)
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            WordMatch::Any | WordMatch::Contains(_) => "regexp",
            WordMatch::StartsWith(_) => "startswith",
        }
    }

    fn operand(&self) -> String {
        match self {
            WordMatch::Any => MATCH_ALL.to_string(),
            WordMatch::StartsWith(word) => word.clone(),
            WordMatch::Contains(word) => format!("{MATCH_ALL}{word}{MATCH_ALL}"),
        }
    }
}

/// One extended query: a word clause, optionally restricted to subtypes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KarpExpression<'a> {
    word_field: &'a str,
    word: WordMatch,
    subtype_field: &'a str,
    subtypes: &'a [String],
}

impl fmt::Display for KarpExpression<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "extended||and|{}|{}|{}",
            self.word_field,
            self.word.operator(),
            self.word.operand()
        )?;
        if !self.subtypes.is_empty() {
            write!(
                f,
                "||and|{}|equals|{}",
                self.subtype_field,
                self.subtypes.join("|")
            )?;
        }
        Ok(())
    }
}

/// Builds the `q` parameter for a search of `word` in `lang`.
pub fn build_query(
    word: &str,
    subtypes: &[String],
    contains: bool,
    lang: &str,
    profile: &ModeProfile,
) -> String {
    KarpExpression {
        word_field: profile.word_field(lang),
        word: WordMatch::new(word, contains),
        subtype_field: &profile.subtype_field,
        subtypes,
    }
    .to_string()
}

/// The word to narrow a search with when an unrestricted one reports `total`
/// hits, or `None` when it fits under the mode's overflow threshold.
///
/// The narrowed search is not counted again and may still exceed the threshold.
pub fn overflow_word(total: u64, lang: &str, profile: &ModeProfile) -> Option<String> {
    (total > profile.overflow_size as u64).then(|| profile.first_letter(lang).to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Html,
    Pdf,
}

impl OutputFormat {
    pub fn is_export(self) -> bool {
        matches!(self, OutputFormat::Html | OutputFormat::Pdf)
    }
}

impl FromStr for OutputFormat {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(OutputFormat::Json),
            "html" => Ok(OutputFormat::Html),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(ServiceError::Query(format!(
                "Unknown format: {other}. Available: json, html, pdf"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Html => write!(f, "html"),
            OutputFormat::Pdf => write!(f, "pdf"),
        }
    }
}

/// Whether a search should first be counted for overflow.
pub fn overflow_guard_applies(word: &str, format: OutputFormat) -> bool {
    word.is_empty() && !format.is_export()
}

/// Page size for a search: exports always use the export cap.
pub fn page_size(format: OutputFormat, requested: Option<usize>, profile: &ModeProfile) -> usize {
    if format.is_export() {
        profile.max_size_export
    } else {
        requested.unwrap_or(profile.max_size)
    }
}

/// Parameters of a Karp `query` or `statlist` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KarpQuery {
    pub resource: String,
    pub mode: String,
    pub size: usize,
    pub q: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<String>,
}

impl KarpQuery {
    pub fn new(profile: &ModeProfile, q: String, size: usize) -> Self {
        Self {
            resource: profile.resource.clone(),
            mode: profile.karp_mode.clone(),
            size,
            q,
            sort: None,
            buckets: None,
        }
    }

    /// The search proper, sorted on the target language when `lang` is not the source.
    pub fn search(profile: &ModeProfile, q: String, size: usize, lang: &str) -> Self {
        Self {
            sort: profile.sort_for(lang).map(str::to_string),
            ..Self::new(profile, q, size)
        }
    }

    /// A zero-size query only reporting how many entries match the subtypes.
    pub fn count(profile: &ModeProfile, subtypes: &[String], lang: &str) -> Self {
        Self::new(profile, build_query("", subtypes, false, lang, profile), 0)
    }

    /// A statistics query bucketing every entry of the mode by subtype.
    pub fn subtype_buckets(profile: &ModeProfile, size: usize) -> Self {
        let q = build_query("", &[], false, &profile.source_language, profile);
        Self {
            buckets: Some("subtype".to_string()),
            ..Self::new(profile, q, size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::settings::tests::swefin_defaults;
    use serde_json::json;

    fn profile() -> ModeProfile {
        let settings = Settings::from_layers(json!({}), swefin_defaults()).unwrap();
        settings.profile("term-swefin").unwrap().clone()
    }

    fn subtypes(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn empty_word_matches_everything_in_language_field() {
        let profile = profile();
        assert_eq!(
            build_query("", &[], false, "sv", &profile),
            "extended||and|baselang.wordform|regexp|.*"
        );
        assert_eq!(
            build_query("", &[], false, "fi", &profile),
            "extended||and|targetlang.wordform|regexp|.*"
        );
    }

    #[test]
    fn source_language_word_is_a_prefix_search() {
        assert_eq!(
            build_query("Cat", &[], false, "sv", &profile()),
            "extended||and|baselang.wordform|startswith|cat"
        );
    }

    #[test]
    fn contains_searches_target_field_with_regexp() {
        assert_eq!(
            build_query("cat", &[], true, "fi", &profile()),
            "extended||and|targetlang.wordform|regexp|.*cat.*"
        );
    }

    #[test]
    fn subtypes_are_conjoined() {
        let query = build_query(
            "MUMIN",
            &subtypes(&["muminfigurer", "djur"]),
            false,
            "sv",
            &profile(),
        );
        assert_eq!(
            query,
            "extended||and|baselang.wordform|startswith|mumin||and|subtype.search|equals|muminfigurer|djur"
        );
    }

    #[test]
    fn overflow_fires_only_above_threshold() {
        let profile = profile();
        assert_eq!(overflow_word(300, "sv", &profile), None);
        assert_eq!(overflow_word(301, "sv", &profile).as_deref(), Some("a"));
        assert_eq!(overflow_word(301, "fi", &profile).as_deref(), Some("aa"));
    }

    #[test]
    fn guard_skips_words_and_exports() {
        assert!(overflow_guard_applies("", OutputFormat::Json));
        assert!(!overflow_guard_applies("mumin", OutputFormat::Json));
        assert!(!overflow_guard_applies("", OutputFormat::Html));
        assert!(!overflow_guard_applies("", OutputFormat::Pdf));
    }

    #[test]
    fn page_size_prefers_export_cap() {
        let profile = profile();
        assert_eq!(page_size(OutputFormat::Html, Some(3), &profile), 5000);
        assert_eq!(page_size(OutputFormat::Json, Some(3), &profile), 3);
        assert_eq!(page_size(OutputFormat::Json, None, &profile), 50);
    }

    #[test]
    fn format_parsing() {
        assert_eq!("".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("HTML".parse::<OutputFormat>().unwrap(), OutputFormat::Html);
        assert_eq!("xml".parse::<OutputFormat>().unwrap_err().status(), 400);
    }

    #[test]
    fn search_sorts_on_target_language() {
        let profile = profile();
        let sv = KarpQuery::search(&profile, "q".into(), 10, "sv");
        let fi = KarpQuery::search(&profile, "q".into(), 10, "fi");
        assert_eq!(sv.sort, None);
        assert_eq!(fi.sort.as_deref(), Some("targetlang.wordform.sort"));
        assert_eq!(fi.resource, "term-swefin");
    }

    #[test]
    fn count_and_bucket_queries() {
        let profile = profile();
        let count = KarpQuery::count(&profile, &subtypes(&["djur"]), "fi");
        assert_eq!(count.size, 0);
        assert_eq!(
            count.q,
            "extended||and|targetlang.wordform|regexp|.*||and|subtype.search|equals|djur"
        );
        let buckets = KarpQuery::subtype_buckets(&profile, 1000);
        assert_eq!(buckets.buckets.as_deref(), Some("subtype"));
        assert_eq!(buckets.q, "extended||and|baselang.wordform|regexp|.*");
    }
}
