//! Evidence-based study requirement classifier.
//!
//! The classifier scans a case's text in passes of decreasing priority:
//! 1. the Lead zone (first paragraphs) and the Conclusion zone (the first
//!    paragraph with a conclusion marker plus the paragraphs after it),
//! 2. the full text,
//! 3. the titles of linked documents.
//!
//! The first pass that finds any term decides. Within a pass, an RCA term
//! and an EIA/RIMA term together yield `Both`. Classification is pure and
//! deterministic; empty or unusable input is `Undetermined`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::LazyLock;

use crate::harvest::dictionary::{StudyKind, TermDictionary};
use crate::harvest::traits::{
    ClassificationResult, Evidence, EvidenceZone, Provenance, RequirementCategory,
};

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Zone sizes and the markers that open the Conclusion zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub lead_paragraphs: usize,
    /// Paragraphs taken after the one holding the conclusion marker.
    pub conclusion_following: usize,
    /// Lower-case stems, matched as substrings.
    pub conclusion_markers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            lead_paragraphs: 10,
            conclusion_following: 3,
            conclusion_markers: vec!["conclus".to_string(), "parecer".to_string()],
        }
    }
}

/// One region scanned during a pass.
struct Zone<'a> {
    kind: EvidenceZone,
    lowered: &'a str,
    /// Original-case text the reason phrase is read from.
    source: &'a str,
}

pub struct RequirementClassifier {
    dictionary: TermDictionary,
    config: ClassifierConfig,
}

impl Default for RequirementClassifier {
    fn default() -> Self {
        Self::new(TermDictionary::default(), ClassifierConfig::default())
    }
}

impl RequirementClassifier {
    pub fn new(dictionary: TermDictionary, config: ClassifierConfig) -> Self {
        Self { dictionary, config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &TermDictionary {
        &self.dictionary
    }

    /// Classifies `text` (page or document text), falling back to
    /// `link_titles` when the text holds no term.
    pub fn classify(&self, text: &str, link_titles: &[String]) -> ClassificationResult {
        let lowered = text.to_lowercase();
        let paragraphs = split_paragraphs(&lowered);
        let originals = split_paragraphs(text);

        if !paragraphs.is_empty() {
            // Lower-casing never creates or removes whitespace, so both splits
            // line up paragraph for paragraph.
            let source_of = |range: Range<usize>| {
                if originals.len() == paragraphs.len() {
                    originals[range].join("\n\n")
                } else {
                    text.to_string()
                }
            };

            let lead_range = 0..paragraphs.len().min(self.config.lead_paragraphs);
            let lead = paragraphs[lead_range.clone()].join("\n\n");
            let lead_source = source_of(lead_range);
            let conclusion = self.conclusion_zone(&paragraphs).map(|range| {
                (paragraphs[range.clone()].join("\n\n"), source_of(range))
            });

            let mut priority = vec![Zone {
                kind: EvidenceZone::Lead,
                lowered: &lead,
                source: &lead_source,
            }];
            if let Some((lowered, source)) = &conclusion {
                priority.push(Zone {
                    kind: EvidenceZone::Conclusion,
                    lowered,
                    source,
                });
            }
            if let Some(result) = self.scan(&priority) {
                return result;
            }

            let full = [Zone {
                kind: EvidenceZone::FullText,
                lowered: &lowered,
                source: text,
            }];
            if let Some(result) = self.scan(&full) {
                return result;
            }
        }

        let lowered_titles: Vec<String> = link_titles.iter().map(|t| t.to_lowercase()).collect();
        let titles: Vec<Zone<'_>> = link_titles
            .iter()
            .zip(&lowered_titles)
            .map(|(title, lowered)| Zone {
                kind: EvidenceZone::LinkTitle,
                lowered,
                source: title,
            })
            .collect();
        self.scan(&titles)
            .unwrap_or_else(ClassificationResult::undetermined)
    }

    /// Paragraph range of the first paragraph holding a marker plus the
    /// configured number of following paragraphs.
    fn conclusion_zone(&self, paragraphs: &[&str]) -> Option<Range<usize>> {
        let start = paragraphs.iter().position(|p| {
            self.config
                .conclusion_markers
                .iter()
                .any(|marker| p.contains(marker.as_str()))
        })?;
        let end = (start + 1 + self.config.conclusion_following).min(paragraphs.len());
        Some(start..end)
    }

    /// One pass: RCA and EIA/RIMA evidence over equally prioritized zones.
    fn scan(&self, zones: &[Zone<'_>]) -> Option<ClassificationResult> {
        let rca = self.find_evidence(StudyKind::Rca, zones);
        let eia_rima = self.find_evidence(StudyKind::EiaRima, zones);
        if rca.is_none() && eia_rima.is_none() {
            return None;
        }
        Some(ClassificationResult::from_evidence(rca, eia_rima))
    }

    fn find_evidence(&self, kind: StudyKind, zones: &[Zone<'_>]) -> Option<Evidence> {
        zones.iter().find_map(|zone| {
            self.dictionary
                .first_match(kind, zone.lowered)
                .map(|term| Evidence {
                    term: term.to_string(),
                    zone: zone.kind,
                    reason: extract_reason(zone.source, term),
                })
        })
    }
}

/// Splits on blank lines, dropping empty paragraphs.
fn split_paragraphs(lowered: &str) -> Vec<&str> {
    PARAGRAPH_BREAK
        .split(lowered)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Reads the parenthetical of a `TERM - ... (reason)` mention. The term
/// must start on a word boundary, as in
/// [`contains_term`](crate::harvest::dictionary::contains_term).
fn extract_reason(source: &str, term: &str) -> Option<String> {
    let pattern = format!(
        r"(?i){}\s*[-–]\s*[^()\n]*\(([^()\n]+)\)",
        regex::escape(term)
    );
    let re = Regex::new(&pattern).ok()?;
    let reason = re
        .captures_iter(source)
        .filter(|caps| {
            caps.get(0).is_some_and(|m| {
                !source[..m.start()]
                    .chars()
                    .next_back()
                    .is_some_and(char::is_alphanumeric)
            })
        })
        .find_map(|caps| {
            let reason = caps.get(1)?.as_str().trim();
            (!reason.is_empty()).then(|| reason.to_string())
        });
    reason
}

// ============================================================================
// Activity-code inference
// ============================================================================

/// Fallback inference from the activity classification code or the
/// predominant class, applied only after the text was undetermined.
///
/// Inferred results carry [`Provenance::InferredFromActivity`] and no text
/// evidence, so they are never mistaken for findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInference {
    /// Code fragment -> required study, checked in order.
    pub codes: Vec<(String, StudyKind)>,
    /// Classes that legally require EIA/RIMA.
    pub eia_rima_classes: Vec<u8>,
}

impl Default for ActivityInference {
    fn default() -> Self {
        let eia = ["A-05-02-0", "A-05-03-7", "A-05-04-5", "A-05-05-3"];
        let rca = ["A-01-03-1", "A-04-01-4", "E-04-01-4"];
        Self {
            codes: eia
                .iter()
                .map(|c| (c.to_string(), StudyKind::EiaRima))
                .chain(rca.iter().map(|c| (c.to_string(), StudyKind::Rca)))
                .collect(),
            eia_rima_classes: vec![6],
        }
    }
}

impl ActivityInference {
    /// Returns `result` untouched unless it is `Undetermined` from text.
    pub fn infer(
        &self,
        result: ClassificationResult,
        activity_code: Option<&str>,
        class: Option<&str>,
    ) -> ClassificationResult {
        if result.category != RequirementCategory::Undetermined
            || result.provenance != Provenance::Text
        {
            return result;
        }

        if let Some(class) = class.and_then(parse_class) {
            if self.eia_rima_classes.contains(&class) {
                return inferred(RequirementCategory::EiaRima, format!("class {class}"));
            }
        }

        if let Some(code) = activity_code {
            let code = code.to_uppercase();
            if let Some((fragment, kind)) = self.codes.iter().find(|(c, _)| code.contains(c.as_str())) {
                let category = match kind {
                    StudyKind::Rca => RequirementCategory::Rca,
                    StudyKind::EiaRima => RequirementCategory::EiaRima,
                };
                return inferred(category, format!("activity {fragment}"));
            }
        }

        result
    }
}

/// "Classe 6", "6" or "classe: 6" -> 6.
fn parse_class(class: &str) -> Option<u8> {
    let digits: String = class
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn inferred(category: RequirementCategory, basis: String) -> ClassificationResult {
    ClassificationResult {
        category,
        rca: None,
        eia_rima: None,
        provenance: Provenance::InferredFromActivity { basis },
    }
}
