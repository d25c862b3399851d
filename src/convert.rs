//! Rendering of Karp lexicon entries as printable HTML wordlists.

use crate::error::{Result, ServiceError};
use crate::markup::{Element, Node, archaic_highlight};
use crate::query::OutputFormat;
use askama::Template;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

pub const NO_TRANSLATION: &str = "no translation available";
const DEFAULT_CSS: &str = "https://liljeholmen.sprakochfolkminnen.se/KARPexport_Fi-ordlista_HTML.css";

/// Renders a list of entries into a complete document.
pub type Renderer = fn(&[LexiconEntry], &str) -> Result<String>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LexiconEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub baselang: Language,
    #[serde(default, deserialize_with = "null_as_default")]
    pub targetlang: Vec<Language>,
    #[serde(default)]
    pub subtype: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Language {
    #[serde(default, deserialize_with = "null_as_default")]
    pub form: Vec<WordForm>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub compound: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WordForm {
    #[serde(default, deserialize_with = "null_as_default")]
    pub wordform: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The renderer registered for a Karp mode, if it has one.
pub fn renderer_for(karp_mode: &str) -> Option<Renderer> {
    match karp_mode {
        // Yiddish shares the Swedish-Finnish layout until it gets its own.
        "term-swefin" | "term-sweyid" => Some(swefin_document),
        _ => None,
    }
}

/// Formats the `_source` objects of a search as `(entry count, document)`.
///
/// Modes without a renderer, and formats other than HTML, give
/// `(0, "no translation available")`.
pub fn format_posts(
    sources: &[Value],
    karp_mode: &str,
    format: OutputFormat,
    css: &str,
) -> Result<(usize, String)> {
    let renderer = match (format, renderer_for(karp_mode)) {
        (OutputFormat::Html, Some(renderer)) => renderer,
        _ => return Ok((0, NO_TRANSLATION.to_string())),
    };
    let entries = sources
        .iter()
        .map(|source| LexiconEntry::deserialize(source))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| ServiceError::Upstream(format!("unexpected entry layout: {err}")))?;
    debug!(entries = entries.len(), %karp_mode, "rendering html");
    let document = renderer(&entries, css)?;
    Ok((entries.len(), document))
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="sv"><head><meta http-equiv="Content-Type" content="text/html; charset=UTF-8"><link rel="stylesheet" type="text/css" href="{{ css }}"><link rel="icon" href="http://liljeholmen.sprakochfolkminnen.se/favicon1.jpg" type="image/gif"><title>{{ title }}</title><meta name="description" content="{{ title }}"><meta name="keywords" content="{{ keywords }}"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>{{ body|safe }}</html>"#,
    ext = "html"
)]
struct ExportDocument<'a> {
    css: &'a str,
    title: &'a str,
    keywords: &'a str,
    body: String,
}

/// Swedish-Finnish wordlist layout, after the Språkrådet export template.
pub fn swefin_document(entries: &[LexiconEntry], css: &str) -> Result<String> {
    let css = if css.trim().is_empty() { DEFAULT_CSS } else { css };
    let main = Element::new("div").class("main").children(
        entries
            .iter()
            .flat_map(|entry| {
                let blocks = entry.subtype.as_ref().map_or(1, Vec::len);
                std::iter::repeat_with(move || Node::from(swefin_entry(entry))).take(blocks)
            }),
    );
    let body = Element::new("body").child(main).render();
    ExportDocument {
        css,
        title: "Sverigefinska ordlistor från Språkrådet",
        keywords: "sverigefinska, lexikon, svenska, finska, finska i Sverige, öppna data, Språkrådet, ISOF",
        body,
    }
    .render()
    .map_err(|err| ServiceError::Render(err.to_string()))
}

/// One `uppslag` block: the headword line followed by its compounds.
fn swefin_entry(entry: &LexiconEntry) -> Element {
    let headword = entry.baselang.form.first().cloned().unwrap_or_default();
    let lex = Element::new("p")
        .class("lex")
        .child(Element::new("span").class("lexem").text(padded(&headword.wordform)))
        .child(Element::new("span").class("comm-sv").text(padded(&headword.comment)))
        .children(entry.targetlang.iter().flat_map(|target| translations(&target.form)));

    let first_target = entry.targetlang.first();
    let compounds = entry
        .baselang
        .compound
        .iter()
        .enumerate()
        .map(|(idx, compound)| {
            let translation = first_target.and_then(|target| target.compound.get(idx));
            Node::from(compound_line(compound, translation.map(String::as_str)))
        });
    Element::new("div")
        .class("uppslag")
        .child(lex)
        .child(Element::new("div").class("uppslag_sub").children(compounds))
}

/// Finnish forms, comma separated, each optionally followed by its comment.
fn translations(forms: &[WordForm]) -> Vec<Node> {
    let mut nodes = Vec::new();
    for (idx, form) in forms.iter().enumerate() {
        let comment = form.comment.trim();
        let text = if comment.is_empty() {
            form.wordform.trim().to_string()
        } else {
            padded(&form.wordform)
        };
        nodes.push(
            Element::new("span")
                .class("fi_trans")
                .attr("lang", "fi")
                .text(text)
                .into(),
        );
        if !comment.is_empty() {
            nodes.push(Element::new("span").class("comm").text(comment).into());
        }
        let tail = if idx + 1 < forms.len() { ", " } else { " " };
        nodes.push(Node::Text(tail.to_string()));
    }
    nodes
}

fn compound_line(compound: &str, translation: Option<&str>) -> Element {
    let line = Element::new("p")
        .class("lex_sub")
        .child(Element::new("span").class("dash").text("– "))
        .child(Element::new("span").class("lexem_sub").text(padded(compound)));
    match translation {
        Some(translation) => line.child(
            Element::new("span")
                .class("fi_trans_sub")
                .attr("lang", "fi")
                .child(archaic_highlight(&padded(translation))),
        ),
        None => line,
    }
}

fn padded(text: &str) -> String {
    format!("{} ", text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(sources: &[Value]) -> String {
        let (count, html) =
            format_posts(sources, "term-swefin", OutputFormat::Html, "http://x/css?mode=m").unwrap();
        assert_eq!(count, sources.len());
        html
    }

    #[test]
    fn two_forms_are_comma_separated() {
        let html = render(&[json!({
            "baselang": {"form": [{"wordform": " katt "}]},
            "targetlang": [{"form": [{"wordform": "kissa"}, {"wordform": " kisu"}]}],
            "subtype": ["djur"]
        })]);
        assert!(html.contains(r#"<span class="lexem">katt </span><span class="comm-sv"> </span>"#));
        assert!(html.contains(
            r#"<span class="fi_trans" lang="fi">kissa</span>, <span class="fi_trans" lang="fi">kisu</span> </p>"#
        ));
    }

    #[test]
    fn comments_follow_their_form() {
        let html = render(&[json!({
            "baselang": {"form": [{"wordform": "bil", "comment": " fordon "}]},
            "targetlang": [{"form": [{"wordform": "auto", "comment": "ark."}, {"wordform": "vaunu"}]}]
        })]);
        assert!(html.contains(r#"<span class="comm-sv">fordon </span>"#));
        assert!(html.contains(
            r#"<span class="fi_trans" lang="fi">auto </span><span class="comm">ark.</span>, "#
        ));
    }

    #[test]
    fn short_compound_translations_render_blank() {
        let html = render(&[json!({
            "baselang": {"form": [{"wordform": "hus"}], "compound": ["hustak", "husvagn"]},
            "targetlang": [{"form": [{"wordform": "talo"}], "compound": ["katto (ark.)"]}]
        })]);
        assert!(html.contains(
            r#"<span class="lexem_sub">hustak </span><span class="fi_trans_sub" lang="fi">katto <span class="comm">(ark.)</span> </span></p>"#
        ));
        assert!(html.contains(r#"<span class="lexem_sub">husvagn </span></p>"#));
    }

    #[test]
    fn one_block_per_subtype() {
        let html = render(&[
            json!({"baselang": {"form": [{"wordform": "a"}]}, "subtype": ["x", "y"]}),
            json!({"baselang": {"form": [{"wordform": "b"}]}}),
            json!({"baselang": {"form": [{"wordform": "c"}]}, "subtype": []}),
        ]);
        assert_eq!(html.matches(r#"<div class="uppslag">"#).count(), 3);
        assert!(!html.contains(r#"<span class="lexem">c </span>"#));
    }

    #[test]
    fn document_has_shell() {
        let html = render(&[]);
        assert!(html.starts_with("<!DOCTYPE html>\n<html lang=\"sv\">"));
        assert!(html.contains(r#"<link rel="stylesheet" type="text/css" href="http:"#));
        assert!(html.contains("css?mode=m"));
        assert!(html.contains(r#"<meta name="viewport""#));
        assert!(html.contains(r#"<body><div class="main"></div></body>"#));
    }

    #[test]
    fn empty_css_uses_default_stylesheet() {
        let html = swefin_document(&[], "").unwrap();
        assert!(html.contains("KARPexport_Fi-ordlista_HTML.css"));
    }

    #[test]
    fn text_is_escaped() {
        let html = render(&[json!({"baselang": {"form": [{"wordform": "R&D"}]}})]);
        assert!(html.contains("R&amp;D "));
    }

    #[test]
    fn other_modes_and_formats_pass_through() {
        let sources = [json!({"baselang": {"form": [{"wordform": "a"}]}})];
        assert_eq!(
            format_posts(&sources, "karp-other", OutputFormat::Html, "").unwrap(),
            (0, NO_TRANSLATION.to_string())
        );
        assert_eq!(
            format_posts(&sources, "term-swefin", OutputFormat::Json, "").unwrap(),
            (0, NO_TRANSLATION.to_string())
        );
        assert!(renderer_for("term-sweyid").is_some());
    }

    #[test]
    fn malformed_entries_are_upstream_errors() {
        let err = format_posts(&[json!({"baselang": 3})], "term-swefin", OutputFormat::Html, "")
            .unwrap_err();
        assert_eq!(err.status(), 500);
    }
}
