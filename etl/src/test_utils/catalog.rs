use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::source::{CatalogSource, FilmRelationRow};
use crate::types::{EntityKind, GenreDocument, LinkTable, ModifiedRow, PersonDocument};

#[derive(Debug, Clone)]
struct FilmRecord {
    title: String,
    description: Option<String>,
    rating: Option<f64>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PersonRecord {
    full_name: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct GenreRecord {
    name: String,
    description: Option<String>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    films: BTreeMap<Uuid, FilmRecord>,
    persons: BTreeMap<Uuid, PersonRecord>,
    genres: BTreeMap<Uuid, GenreRecord>,
    /// `(film, person, role)` rows of `person_film_work`.
    person_film_work: Vec<(Uuid, Uuid, String)>,
    /// `(film, genre)` rows of `genre_film_work`.
    genre_film_work: Vec<(Uuid, Uuid)>,
    failing: bool,
    modified_queries: Vec<(EntityKind, usize)>,
}

impl Inner {
    fn check(&self) -> EtlResult<()> {
        if self.failing {
            return Err(etl_error!(
                ErrorKind::SourceConnectionFailed,
                "Catalog is unavailable"
            ));
        }

        Ok(())
    }

    fn modified(&self, kind: EntityKind) -> Vec<ModifiedRow> {
        match kind {
            EntityKind::Film => self
                .films
                .iter()
                .map(|(id, film)| ModifiedRow {
                    id: *id,
                    modified: film.modified,
                })
                .collect(),
            EntityKind::Person => self
                .persons
                .iter()
                .map(|(id, person)| ModifiedRow {
                    id: *id,
                    modified: person.modified,
                })
                .collect(),
            EntityKind::Genre => self
                .genres
                .iter()
                .map(|(id, genre)| ModifiedRow {
                    id: *id,
                    modified: genre.modified,
                })
                .collect(),
        }
    }
}

/// Catalog held in memory, answering the same queries as the Postgres catalog.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_film(
        &self,
        title: &str,
        rating: Option<f64>,
        modified: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().await.films.insert(
            id,
            FilmRecord {
                title: title.to_string(),
                description: None,
                rating,
                modified,
            },
        );

        id
    }

    pub async fn add_person(&self, full_name: &str, modified: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().await.persons.insert(
            id,
            PersonRecord {
                full_name: full_name.to_string(),
                modified,
            },
        );

        id
    }

    pub async fn add_genre(&self, name: &str, modified: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().await.genres.insert(
            id,
            GenreRecord {
                name: name.to_string(),
                description: None,
                modified,
            },
        );

        id
    }

    pub async fn link_person(&self, film_id: Uuid, person_id: Uuid, role: &str) {
        self.inner
            .lock()
            .await
            .person_film_work
            .push((film_id, person_id, role.to_string()));
    }

    pub async fn link_genre(&self, film_id: Uuid, genre_id: Uuid) {
        self.inner
            .lock()
            .await
            .genre_film_work
            .push((film_id, genre_id));
    }

    /// Renames a row and bumps its modification time, as an update in the admin panel would.
    pub async fn rename(&self, kind: EntityKind, id: Uuid, name: &str, modified: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;

        match kind {
            EntityKind::Film => {
                if let Some(film) = inner.films.get_mut(&id) {
                    film.title = name.to_string();
                    film.modified = modified;
                }
            }
            EntityKind::Person => {
                if let Some(person) = inner.persons.get_mut(&id) {
                    person.full_name = name.to_string();
                    person.modified = modified;
                }
            }
            EntityKind::Genre => {
                if let Some(genre) = inner.genres.get_mut(&id) {
                    genre.name = name.to_string();
                    genre.modified = modified;
                }
            }
        }
    }

    /// Makes every query fail with a connection error until reset.
    pub async fn set_failing(&self, failing: bool) {
        self.inner.lock().await.failing = failing;
    }

    /// Kind and returned row count of every modified rows query.
    pub async fn modified_queries(&self) -> Vec<(EntityKind, usize)> {
        self.inner.lock().await.modified_queries.clone()
    }
}

impl CatalogSource for MemoryCatalog {
    async fn modified_rows(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
        seen_ids: &BTreeSet<Uuid>,
        limit: usize,
    ) -> EtlResult<Vec<ModifiedRow>> {
        let mut inner = self.inner.lock().await;
        inner.check()?;

        let mut rows: Vec<ModifiedRow> = inner
            .modified(kind)
            .into_iter()
            .filter(|row| {
                row.modified > since
                    || (!seen_ids.is_empty()
                        && row.modified == since
                        && !seen_ids.contains(&row.id))
            })
            .collect();
        rows.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.id.cmp(&b.id)));
        rows.truncate(limit);

        inner.modified_queries.push((kind, rows.len()));

        Ok(rows)
    }

    async fn linked_film_ids(
        &self,
        link: LinkTable,
        dependent_ids: &[Uuid],
    ) -> EtlResult<BTreeSet<Uuid>> {
        let inner = self.inner.lock().await;
        inner.check()?;

        let film_ids = match link {
            LinkTable::PersonFilmWork => inner
                .person_film_work
                .iter()
                .filter(|(_, person_id, _)| dependent_ids.contains(person_id))
                .map(|(film_id, _, _)| *film_id)
                .collect(),
            LinkTable::GenreFilmWork => inner
                .genre_film_work
                .iter()
                .filter(|(_, genre_id)| dependent_ids.contains(genre_id))
                .map(|(film_id, _)| *film_id)
                .collect(),
        };

        Ok(film_ids)
    }

    async fn film_relation_rows(&self, film_ids: &[Uuid]) -> EtlResult<Vec<FilmRelationRow>> {
        let inner = self.inner.lock().await;
        inner.check()?;

        let mut rows = Vec::new();
        for film_id in film_ids {
            let Some(film) = inner.films.get(film_id) else {
                continue;
            };

            let mut genres: Vec<Option<String>> = inner
                .genre_film_work
                .iter()
                .filter(|(linked_film, _)| linked_film == film_id)
                .filter_map(|(_, genre_id)| inner.genres.get(genre_id))
                .map(|genre| Some(genre.name.clone()))
                .collect();
            if genres.is_empty() {
                genres.push(None);
            }

            let mut people: Vec<Option<(Uuid, String, String)>> = inner
                .person_film_work
                .iter()
                .filter(|(linked_film, _, _)| linked_film == film_id)
                .filter_map(|(_, person_id, role)| {
                    inner
                        .persons
                        .get(person_id)
                        .map(|person| Some((*person_id, person.full_name.clone(), role.clone())))
                })
                .collect();
            if people.is_empty() {
                people.push(None);
            }

            for genre_name in &genres {
                for person in &people {
                    rows.push(FilmRelationRow {
                        film_id: *film_id,
                        title: film.title.clone(),
                        description: film.description.clone(),
                        rating: film.rating,
                        genre_name: genre_name.clone(),
                        person_id: person.as_ref().map(|(id, _, _)| *id),
                        person_name: person.as_ref().map(|(_, name, _)| name.clone()),
                        role: person.as_ref().map(|(_, _, role)| role.clone()),
                    });
                }
            }
        }

        Ok(rows)
    }

    async fn genres(&self, ids: &[Uuid]) -> EtlResult<Vec<GenreDocument>> {
        let inner = self.inner.lock().await;
        inner.check()?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                inner.genres.get(id).map(|genre| GenreDocument {
                    id: *id,
                    name: genre.name.clone(),
                    description: genre.description.clone(),
                })
            })
            .collect())
    }

    async fn persons(&self, ids: &[Uuid]) -> EtlResult<Vec<PersonDocument>> {
        let inner = self.inner.lock().await;
        inner.check()?;

        Ok(ids
            .iter()
            .filter_map(|id| {
                inner.persons.get(id).map(|person| PersonDocument {
                    id: *id,
                    full_name: person.full_name.clone(),
                })
            })
            .collect())
    }
}
