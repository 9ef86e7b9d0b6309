//! Surface forms that signal each environmental study requirement.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two study requirements a term can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyKind {
    /// Environmental control report (RCA).
    Rca,
    /// Environmental impact study and its public report (EIA/RIMA).
    EiaRima,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("Term '{0}' appears in both the RCA and the EIA/RIMA dictionary")]
    Overlap(String),
    #[error("Empty term in the {0:?} dictionary")]
    EmptyTerm(StudyKind),
}

const BUILTIN_RCA: &[&str] = &[
    "relatório de controle ambiental",
    "relatorio de controle ambiental",
    "relatorio de controle",
    "rca com art",
    "rca/pca",
    "rca / pca",
    "rca-pca",
    "r.c.a.",
    "r.c.a",
    "r c a",
    "rca",
    "controle ambiental",
];

const BUILTIN_EIA_RIMA: &[&str] = &[
    "eia/rima",
    "eia / rima",
    "eia-rima",
    "estudo de impacto ambiental",
    "relatório de impacto ambiental",
    "relatorio de impacto ambiental",
    "relatório de impacto",
    "e.i.a.",
    "e.i.a",
    "r.i.m.a.",
    "r.i.m.a",
    "e i a",
    "r i m a",
    "eia",
    "rima",
    "estudo ambiental",
    "impacto ambiental",
];

/// Two disjoint, ordered lists of lower-case surface forms.
///
/// Lookups return the first listed term that occurs in the text, so more
/// specific phrases are listed before bare abbreviations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermDictionary {
    rca: Vec<String>,
    eia_rima: Vec<String>,
}

impl Default for TermDictionary {
    fn default() -> Self {
        Self {
            rca: BUILTIN_RCA.iter().map(|t| t.to_string()).collect(),
            eia_rima: BUILTIN_EIA_RIMA.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl TermDictionary {
    /// Builds a dictionary, lower-casing every term.
    ///
    /// # Errors
    ///
    /// Returns [`DictionaryError::Overlap`] if a term is listed for both
    /// kinds, and [`DictionaryError::EmptyTerm`] for blank entries.
    pub fn new<I, J, S>(rca: I, eia_rima: J) -> Result<Self, DictionaryError>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalize = |kind: StudyKind, terms: Vec<S>| -> Result<Vec<String>, DictionaryError> {
            terms
                .into_iter()
                .map(|t| {
                    let t = t.as_ref().trim().to_lowercase();
                    if t.is_empty() {
                        Err(DictionaryError::EmptyTerm(kind))
                    } else {
                        Ok(t)
                    }
                })
                .collect()
        };
        let rca = normalize(StudyKind::Rca, rca.into_iter().collect())?;
        let eia_rima = normalize(StudyKind::EiaRima, eia_rima.into_iter().collect())?;

        if let Some(shared) = rca.iter().find(|t| eia_rima.contains(t)) {
            return Err(DictionaryError::Overlap(shared.clone()));
        }
        Ok(Self { rca, eia_rima })
    }

    pub fn terms(&self, kind: StudyKind) -> &[String] {
        match kind {
            StudyKind::Rca => &self.rca,
            StudyKind::EiaRima => &self.eia_rima,
        }
    }

    /// First term of `kind` occurring in `lowered` as a whole word.
    pub fn first_match(&self, kind: StudyKind, lowered: &str) -> Option<&str> {
        self.terms(kind)
            .iter()
            .find(|term| contains_term(lowered, term))
            .map(String::as_str)
    }
}

/// Whole-word occurrence: the characters around the match must not be
/// letters or digits, so "rca" does not match inside "cerca".
pub fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
