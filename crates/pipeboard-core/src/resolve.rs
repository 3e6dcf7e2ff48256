//! Entity resolution by tax document.
//!
//! Given a raw document of unknown kind, the resolver builds both the PF
//! and PJ variant lists, probes each list in priority order for a person
//! and an organization, and then decides which of the two hits (if any)
//! answers the request.
//!
//! # Match policy
//!
//! | Hint | Preferred | Fallback |
//! |------|-----------|----------|
//! | `PF` | person | organization |
//! | `PJ` | organization | person |
//! | none, ≤ 11 digits | person | organization |
//! | none, > 11 digits | organization | person |
//!
//! A lookup error aborts the resolution; nothing found is `none`, which is
//! a normal outcome.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::document::{build_both_variants, normalize_digits, DocumentKind, DocumentVariants, PF_LEN};
use crate::models::{Organization, Person};
use crate::store::{CrmStore, OrganizationsByDocument, PersonsByDocument, Table};

/// Exact-key record lookup for one entity type.
#[async_trait]
pub trait RecordLookup: Send + Sync {
    type Record: Send;

    async fn lookup_by_key(&self, key: &str) -> Result<Option<Self::Record>>;
}

/// Which lookups have a backing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupAvailability {
    pub persons: bool,
    pub organizations: bool,
}

impl LookupAvailability {
    pub const ALL: LookupAvailability = LookupAvailability {
        persons: true,
        organizations: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Person,
    Organization,
    None,
}

/// Outcome of a resolution, serialized as the public response shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution<P, O> {
    #[serde(rename = "match")]
    pub match_kind: MatchKind,
    pub normalized: DocumentVariants,
    pub person: Option<P>,
    pub organization: Option<O>,
}

/// Tries `candidates` in order and returns the first record found.
pub async fn probe_first<L>(lookup: &L, candidates: &[String]) -> Result<Option<L::Record>>
where
    L: RecordLookup + ?Sized,
{
    for key in candidates {
        if let Some(record) = lookup.lookup_by_key(key).await? {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Applies the match policy to the lookup outcome.
///
/// `digit_count` is the number of digits in the raw document; without a
/// hint, up to [`PF_LEN`] digits reads as an individual.
pub fn decide_match(
    hint: Option<DocumentKind>,
    digit_count: usize,
    has_person: bool,
    has_organization: bool,
) -> MatchKind {
    let prefer_person = match hint {
        Some(DocumentKind::Pf) => true,
        Some(DocumentKind::Pj) => false,
        None => digit_count <= PF_LEN,
    };

    match (prefer_person, has_person, has_organization) {
        (true, true, _) => MatchKind::Person,
        (false, _, true) => MatchKind::Organization,
        (_, true, false) => MatchKind::Person,
        (_, false, true) => MatchKind::Organization,
        _ => MatchKind::None,
    }
}

/// Resolves `document` against the given lookups.
///
/// Unavailable lookups are never called. Lookups run sequentially, PF
/// variants first, and stop at the first hit per entity type.
pub async fn resolve_entity<P, O>(
    document: &str,
    hint: Option<DocumentKind>,
    persons: &P,
    organizations: &O,
    availability: LookupAvailability,
) -> Result<Resolution<P::Record, O::Record>>
where
    P: RecordLookup + ?Sized,
    O: RecordLookup + ?Sized,
{
    let normalized = build_both_variants(document);

    let person = if availability.persons {
        probe_first(persons, &normalized.pf).await?
    } else {
        None
    };
    let organization = if availability.organizations {
        probe_first(organizations, &normalized.pj).await?
    } else {
        None
    };

    let digit_count = normalize_digits(document).len();
    let match_kind = decide_match(hint, digit_count, person.is_some(), organization.is_some());

    tracing::debug!(
        pf = ?normalized.pf,
        pj = ?normalized.pj,
        ?hint,
        ?match_kind,
        "resolved document"
    );

    Ok(Resolution {
        match_kind,
        normalized,
        person,
        organization,
    })
}

/// Resolves `document` against a [`CrmStore`], skipping entity types whose
/// table does not exist.
pub async fn resolve_document<S>(
    store: &S,
    document: &str,
    hint: Option<DocumentKind>,
) -> Result<Resolution<Person, Organization>>
where
    S: CrmStore + ?Sized,
{
    let availability = LookupAvailability {
        persons: store.table_available(Table::Persons).await?,
        organizations: store.table_available(Table::Organizations).await?,
    };
    resolve_entity(
        document,
        hint,
        &PersonsByDocument(store),
        &OrganizationsByDocument(store),
        availability,
    )
    .await
}
