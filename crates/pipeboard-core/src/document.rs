//! Tax-document normalization.
//!
//! Brazilian tax identifiers arrive in many shapes: masked
//! (`123.456.789-01`, `12.345.678/0001-90`), bare digits, digits that lost
//! their leading zeros when a spreadsheet treated them as numbers, or digits
//! with extra garbage in front. This module turns any of those into the
//! ordered list of canonical lookup keys for each document kind.
//!
//! | Kind | Canonical length | Document |
//! |------|------------------|----------|
//! | [`DocumentKind::Pf`] | 11 | CPF (individual) |
//! | [`DocumentKind::Pj`] | 14 | CNPJ (organization) |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical digit count of an individual (CPF) document.
pub const PF_LEN: usize = 11;
/// Canonical digit count of an organization (CNPJ) document.
pub const PJ_LEN: usize = 14;

/// Entity category a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Individual (pessoa física).
    #[serde(rename = "PF")]
    Pf,
    /// Organization (pessoa jurídica).
    #[serde(rename = "PJ")]
    Pj,
}

impl DocumentKind {
    pub fn canonical_len(self) -> usize {
        match self {
            DocumentKind::Pf => PF_LEN,
            DocumentKind::Pj => PJ_LEN,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Pf => "PF",
            DocumentKind::Pj => "PJ",
        }
    }

    /// Variants of `document` for this kind. See [`generate_variants`].
    pub fn variants(self, document: &str) -> Vec<String> {
        generate_variants(document, self.canonical_len())
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PF" => Ok(DocumentKind::Pf),
            "PJ" => Ok(DocumentKind::Pj),
            other => anyhow::bail!("invalid document kind '{}': expected PF or PJ", other),
        }
    }
}

/// Keeps only the ASCII decimal digits of `input`, in their original order.
pub fn normalize_digits(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Produces the ordered, deduplicated candidate keys for `document` at
/// `target_len` digits.
///
/// The full-length (padded or right-truncated) form always comes first
/// since that is how the database stores documents; the form without
/// leading zeros follows when it differs. A document with no digits yields
/// no variants at all, never an all-zero key.
///
/// ```
/// use pipeboard_core::document::generate_variants;
///
/// assert_eq!(generate_variants("123.456.789-01", 11), vec!["12345678901"]);
/// assert_eq!(
///     generate_variants("012345678", 11),
///     vec!["00012345678", "12345678"]
/// );
/// assert!(generate_variants("n/a", 14).is_empty());
/// ```
pub fn generate_variants(document: &str, target_len: usize) -> Vec<String> {
    let digits = normalize_digits(document);
    if digits.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<String> = Vec::with_capacity(2);

    if digits.len() >= target_len {
        // Digits are ASCII, so byte slicing is char-safe.
        let base = &digits[digits.len() - target_len..];
        candidates.push(base.to_string());
        let stripped = base.trim_start_matches('0');
        if !stripped.is_empty() && stripped != base {
            candidates.push(stripped.to_string());
        }
    } else {
        candidates.push(format!("{:0>width$}", digits, width = target_len));
        let stripped = digits.trim_start_matches('0');
        if !stripped.is_empty() {
            candidates.push(stripped.to_string());
        }
    }

    let mut variants: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// Variant lists for both document kinds.
///
/// The two lists are independent namespaces: the same digit string may
/// appear in both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVariants {
    pub pf: Vec<String>,
    pub pj: Vec<String>,
}

impl DocumentVariants {
    pub fn for_kind(&self, kind: DocumentKind) -> &[String] {
        match kind {
            DocumentKind::Pf => &self.pf,
            DocumentKind::Pj => &self.pj,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pf.is_empty() && self.pj.is_empty()
    }
}

/// Builds PF and PJ variants for a document whose kind is unknown.
pub fn build_both_variants(document: &str) -> DocumentVariants {
    DocumentVariants {
        pf: DocumentKind::Pf.variants(document),
        pj: DocumentKind::Pj.variants(document),
    }
}
