//! Lexical projection of filing names for full-text search.
//!
//! [`project`] turns a human-readable name into a deterministic,
//! order-sensitive vector of stemmed tokens with 1-based positions. The
//! rendered form is byte-stable, so re-projecting an unchanged name
//! yields an identical search row, and the whole vector is re-derived
//! (never patched) when the name changes.

use std::collections::BTreeMap;
use std::fmt;

use rust_stemmers::{Algorithm, Stemmer};

/// One stemmed token with every position it occupies in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub token: String,
    /// 1-based token positions, ascending. The first token of the name
    /// carries position 1, the highest rank.
    pub positions: Vec<u32>,
}

/// Deterministic lexical representation of a name field.
///
/// Renders in the canonical form `'adelson':2 'sheldon':1`: lexemes
/// sorted alphabetically, positions ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LexicalVector {
    lexemes: Vec<Lexeme>,
}

impl LexicalVector {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lexemes.is_empty()
    }

    /// Lexemes sorted by token.
    #[must_use]
    pub fn lexemes(&self) -> &[Lexeme] {
        &self.lexemes
    }

    /// Position-ordered token text (`"sheldon adelson"`), the form the
    /// FTS shadow table indexes.
    #[must_use]
    pub fn token_text(&self) -> String {
        let mut positioned: Vec<(u32, &str)> = self
            .lexemes
            .iter()
            .flat_map(|lexeme| {
                lexeme
                    .positions
                    .iter()
                    .map(move |&position| (position, lexeme.token.as_str()))
            })
            .collect();
        positioned.sort_unstable();
        positioned
            .into_iter()
            .map(|(_, token)| token)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for LexicalVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, lexeme) in self.lexemes.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "'{}':", lexeme.token)?;
            for (pos_idx, position) in lexeme.positions.iter().enumerate() {
                if pos_idx > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{position}")?;
            }
        }
        Ok(())
    }
}

/// Project a name into its lexical vector: lowercase, strip punctuation,
/// split on whitespace, stem each token, record 1-based positions in
/// token order.
#[must_use]
pub fn project(name: &str) -> LexicalVector {
    let stemmer = Stemmer::create(Algorithm::English);
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut by_token: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for (idx, raw) in cleaned.split_whitespace().enumerate() {
        let stemmed = stemmer.stem(raw).into_owned();
        if stemmed.is_empty() {
            continue;
        }
        let position = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        by_token.entry(stemmed).or_default().push(position);
    }

    LexicalVector {
        lexemes: by_token
            .into_iter()
            .map(|(token, positions)| Lexeme { token, positions })
            .collect(),
    }
}

/// Stem a free-form query through the same pipeline stored names went
/// through, deduplicated, in first-occurrence order.
#[must_use]
pub fn stem_query(query: &str) -> Vec<String> {
    let vector = project(query);
    let mut positioned: Vec<(u32, &str)> = vector
        .lexemes
        .iter()
        .filter_map(|lexeme| {
            lexeme
                .positions
                .first()
                .map(|&position| (position, lexeme.token.as_str()))
        })
        .collect();
    positioned.sort_unstable();
    positioned
        .into_iter()
        .map(|(_, token)| token.to_string())
        .collect()
}
