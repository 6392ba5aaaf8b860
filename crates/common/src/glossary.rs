//! Inline glossary references in entry bodies.
//!
//! A body may mention `[[term-id]]` or `[[term-id|shown text]]`. Resolution
//! splits the body into plain text and term segments so the renderer can
//! attach the definition to the term.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::GlossaryEntry;

#[derive(Debug, Clone, Default)]
pub struct Glossary {
    terms: BTreeMap<String, GlossaryEntry>,
}

impl Glossary {
    pub fn new(entries: impl IntoIterator<Item = GlossaryEntry>) -> Self {
        Self {
            terms: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&GlossaryEntry> {
        self.terms.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BodySegment {
    Text { text: String },
    Term {
        id: String,
        text: String,
        definition: String,
    },
}

fn push_text(segments: &mut Vec<BodySegment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(BodySegment::Text { text: last }) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(BodySegment::Text {
            text: text.to_string(),
        });
    }
}

/// Split `body` into text and glossary-term segments.
pub fn resolve_body(body: &str, glossary: &Glossary) -> Vec<BodySegment> {
    let mut segments = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find("[[") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("]]") else {
            break;
        };
        let inner = &after_open[..close];
        if inner.is_empty() || inner.contains("[[") {
            // Not a reference; keep the brackets and move past them.
            push_text(&mut segments, &rest[..open + 2]);
            rest = after_open;
            continue;
        }

        push_text(&mut segments, &rest[..open]);
        let (id, shown) = match inner.split_once('|') {
            Some((id, shown)) => (id.trim(), Some(shown.trim())),
            None => (inner.trim(), None),
        };
        match glossary.get(id) {
            Some(term) => segments.push(BodySegment::Term {
                id: term.id.clone(),
                text: shown.unwrap_or(&term.term).to_string(),
                definition: term.definition.clone(),
            }),
            None => {
                tracing::debug!(term = id, "unknown glossary reference");
                push_text(&mut segments, shown.unwrap_or(id));
            }
        }
        rest = &after_open[close + 2..];
    }

    push_text(&mut segments, rest);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glossary() -> Glossary {
        Glossary::new([
            GlossaryEntry {
                id: "rug-pull".into(),
                term: "rug pull".into(),
                definition: "Developers abandon a project and take the funds.".into(),
            },
            GlossaryEntry {
                id: "dao".into(),
                term: "DAO".into(),
                definition: "Decentralized autonomous organization.".into(),
            },
        ])
    }

    fn text(s: &str) -> BodySegment {
        BodySegment::Text { text: s.into() }
    }

    #[test]
    fn test_plain_body_is_single_segment() {
        assert_eq!(resolve_body("nothing here", &glossary()), vec![text("nothing here")]);
        assert!(resolve_body("", &glossary()).is_empty());
    }

    #[test]
    fn test_resolves_terms_with_and_without_display_text() {
        let segments = resolve_body("A [[rug-pull]] hit the [[dao|collective]].", &glossary());
        assert_eq!(
            segments,
            vec![
                text("A "),
                BodySegment::Term {
                    id: "rug-pull".into(),
                    text: "rug pull".into(),
                    definition: "Developers abandon a project and take the funds.".into(),
                },
                text(" hit the "),
                BodySegment::Term {
                    id: "dao".into(),
                    text: "collective".into(),
                    definition: "Decentralized autonomous organization.".into(),
                },
                text("."),
            ]
        );
    }

    #[test]
    fn test_unknown_term_degrades_to_text() {
        let segments = resolve_body("a [[nope]] and [[nope|this]]", &glossary());
        assert_eq!(segments, vec![text("a nope and this")]);
    }

    #[test]
    fn test_unclosed_and_empty_brackets_are_literal() {
        assert_eq!(
            resolve_body("open [[dao and [[]] done", &glossary()),
            vec![text("open [[dao and [[]] done")]
        );
    }
}
