use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EtlResult;
use crate::types::{EntityKind, GenreDocument, LinkTable, ModifiedRow, PersonDocument};

/// One row of the film relation join: a film with at most one genre and one person attached.
///
/// A film with several genres and people yields the cartesian product of both.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FilmRelationRow {
    pub film_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub genre_name: Option<String>,
    pub person_id: Option<Uuid>,
    pub person_name: Option<String>,
    /// Raw `person_film_work.role` value.
    pub role: Option<String>,
}

/// Queries the sync needs from the catalog.
pub trait CatalogSource {
    /// Returns rows of `kind` changed after `since`, ascending by modification time then id.
    ///
    /// With an empty `seen_ids` only rows modified strictly after `since` are returned. Otherwise
    /// rows modified exactly at `since` are included unless their id is in `seen_ids`.
    /// At most `limit` rows are returned.
    fn modified_rows(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
        seen_ids: &BTreeSet<Uuid>,
        limit: usize,
    ) -> impl Future<Output = EtlResult<Vec<ModifiedRow>>> + Send;

    /// Returns the distinct films linked through `link` to any of `dependent_ids`.
    fn linked_film_ids(
        &self,
        link: LinkTable,
        dependent_ids: &[Uuid],
    ) -> impl Future<Output = EtlResult<BTreeSet<Uuid>>> + Send;

    /// Returns the relation join rows of the given films.
    fn film_relation_rows(
        &self,
        film_ids: &[Uuid],
    ) -> impl Future<Output = EtlResult<Vec<FilmRelationRow>>> + Send;

    fn genres(&self, ids: &[Uuid]) -> impl Future<Output = EtlResult<Vec<GenreDocument>>> + Send;

    fn persons(&self, ids: &[Uuid])
    -> impl Future<Output = EtlResult<Vec<PersonDocument>>> + Send;
}
