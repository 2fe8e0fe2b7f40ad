use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use etl_config::shared::{IntoConnectOptions, PgConnectionConfig, SEARCH_SYNC_OPTIONS};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;
use uuid::Uuid;

use crate::error::EtlResult;
use crate::source::{CatalogSource, FilmRelationRow};
use crate::types::{EntityKind, GenreDocument, LinkTable, ModifiedRow, PersonDocument};

/// Schema holding the catalog tables.
const CONTENT_SCHEMA: &str = "content";

/// Connections idle for this long are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the query returning one row per film, genre and person combination of the given films.
fn film_relations_query() -> String {
    format!(
        "SELECT \
             fw.id AS film_id, \
             fw.title, \
             fw.description, \
             fw.rating, \
             g.name AS genre_name, \
             p.id AS person_id, \
             p.full_name AS person_name, \
             pfw.role \
         FROM {CONTENT_SCHEMA}.{film} fw \
         LEFT JOIN {CONTENT_SCHEMA}.{person_link} pfw ON pfw.film_work_id = fw.id \
         LEFT JOIN {CONTENT_SCHEMA}.{person} p ON p.id = pfw.person_id \
         LEFT JOIN {CONTENT_SCHEMA}.{genre_link} gfw ON gfw.film_work_id = fw.id \
         LEFT JOIN {CONTENT_SCHEMA}.{genre} g ON g.id = gfw.genre_id \
         WHERE fw.id = ANY($1)",
        film = EntityKind::Film.table_name(),
        person_link = LinkTable::PersonFilmWork.table_name(),
        person = EntityKind::Person.table_name(),
        genre_link = LinkTable::GenreFilmWork.table_name(),
        genre = EntityKind::Genre.table_name(),
    )
}

fn genres_query() -> String {
    format!(
        "SELECT id, name, description FROM {CONTENT_SCHEMA}.{table} \
         WHERE id = ANY($1) ORDER BY id",
        table = EntityKind::Genre.table_name()
    )
}

fn persons_query() -> String {
    format!(
        "SELECT id, full_name FROM {CONTENT_SCHEMA}.{table} \
         WHERE id = ANY($1) ORDER BY id",
        table = EntityKind::Person.table_name()
    )
}

/// Catalog source reading from Postgres through a lazily connected pool.
#[derive(Debug, Clone)]
pub struct PgCatalogSource {
    pool: PgPool,
}

impl PgCatalogSource {
    /// Creates the source without connecting. Connections open on first use.
    pub fn new(config: &PgConnectionConfig) -> Self {
        let options = config.with_db(Some(&SEARCH_SYNC_OPTIONS));

        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(config.max_connections)
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connect_lazy_with(options);

        Self { pool }
    }

    /// Checks that the database is reachable.
    pub async fn ping(&self) -> EtlResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(())
    }
}

/// Builds the query returning rows of `kind` changed after a cursor.
fn modified_rows_query(kind: EntityKind) -> String {
    format!(
        "SELECT id, modified FROM {CONTENT_SCHEMA}.{table} \
         WHERE modified > $1 \
            OR (cardinality($2::uuid[]) > 0 AND modified = $1 AND NOT (id = ANY($2))) \
         ORDER BY modified, id \
         LIMIT $3",
        table = kind.table_name()
    )
}

/// Builds the query resolving films linked to dependent rows.
///
/// A single id is matched with `=`, several with `= ANY`; both select the same films.
fn linked_films_query(link: LinkTable, id_count: usize) -> String {
    let predicate = if id_count == 1 { "= $1" } else { "= ANY($1)" };

    format!(
        "SELECT DISTINCT film_work_id FROM {CONTENT_SCHEMA}.{table} \
         WHERE {column} {predicate} \
         ORDER BY film_work_id",
        table = link.table_name(),
        column = link.dependent_column(),
    )
}

impl CatalogSource for PgCatalogSource {
    async fn modified_rows(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
        seen_ids: &BTreeSet<Uuid>,
        limit: usize,
    ) -> EtlResult<Vec<ModifiedRow>> {
        let seen_ids: Vec<Uuid> = seen_ids.iter().copied().collect();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<(Uuid, DateTime<Utc>)> = sqlx::query_as(&modified_rows_query(kind))
            .bind(since)
            .bind(seen_ids)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(%kind, %since, count = rows.len(), "fetched modified rows");

        Ok(rows
            .into_iter()
            .map(|(id, modified)| ModifiedRow { id, modified })
            .collect())
    }

    async fn linked_film_ids(
        &self,
        link: LinkTable,
        dependent_ids: &[Uuid],
    ) -> EtlResult<BTreeSet<Uuid>> {
        if dependent_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let sql = linked_films_query(link, dependent_ids.len());
        let query = sqlx::query_scalar::<_, Uuid>(&sql);
        let query = match dependent_ids {
            [id] => query.bind(*id),
            ids => query.bind(ids.to_vec()),
        };

        let film_ids = query.fetch_all(&self.pool).await?;

        Ok(film_ids.into_iter().collect())
    }

    async fn film_relation_rows(&self, film_ids: &[Uuid]) -> EtlResult<Vec<FilmRelationRow>> {
        if film_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, FilmRelationRow>(&film_relations_query())
            .bind(film_ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn genres(&self, ids: &[Uuid]) -> EtlResult<Vec<GenreDocument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(Uuid, String, Option<String>)> = sqlx::query_as(&genres_query())
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, description)| GenreDocument {
                id,
                name,
                description,
            })
            .collect())
    }

    async fn persons(&self, ids: &[Uuid]) -> EtlResult<Vec<PersonDocument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(Uuid, String)> = sqlx::query_as(&persons_query())
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, full_name)| PersonDocument { id, full_name })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dependent_id_uses_equality() {
        let sql = linked_films_query(LinkTable::PersonFilmWork, 1);

        assert_eq!(
            sql,
            "SELECT DISTINCT film_work_id FROM content.person_film_work \
             WHERE person_id = $1 \
             ORDER BY film_work_id"
        );
    }

    #[test]
    fn several_dependent_ids_use_membership() {
        let sql = linked_films_query(LinkTable::GenreFilmWork, 3);

        assert!(sql.contains("FROM content.genre_film_work"));
        assert!(sql.contains("WHERE genre_id = ANY($1)"));
    }

    #[test]
    fn modified_rows_query_resumes_inside_a_timestamp() {
        let sql = modified_rows_query(EntityKind::Film);

        assert!(sql.starts_with("SELECT id, modified FROM content.film_work"));
        assert!(sql.contains(
            "WHERE modified > $1 \
             OR (cardinality($2::uuid[]) > 0 AND modified = $1 AND NOT (id = ANY($2)))"
        ));
        assert!(sql.ends_with("ORDER BY modified, id LIMIT $3"));
    }

    #[test]
    fn document_queries_read_the_content_schema() {
        let relations = film_relations_query();
        assert!(
            relations.contains("FROM content.film_work fw LEFT JOIN content.person_film_work pfw")
        );
        assert!(relations.contains("LEFT JOIN content.genre g ON g.id = gfw.genre_id"));
        assert!(relations.ends_with("WHERE fw.id = ANY($1)"));

        assert_eq!(
            genres_query(),
            "SELECT id, name, description FROM content.genre WHERE id = ANY($1) ORDER BY id"
        );
        assert_eq!(
            persons_query(),
            "SELECT id, full_name FROM content.person WHERE id = ANY($1) ORDER BY id"
        );
    }
}
