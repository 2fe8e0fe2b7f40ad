//! Flattening of the film relations into search documents.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;
use uuid::Uuid;

use crate::error::EtlResult;
use crate::source::{CatalogSource, FilmRelationRow};
use crate::types::{FilmDocument, PersonRef, Role};

/// People of one role in one film, keyed by id so each person appears once.
#[derive(Debug, Default)]
struct RoleMembers {
    people: BTreeMap<Uuid, String>,
}

impl RoleMembers {
    fn names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.people.values().collect();
        names.into_iter().cloned().collect()
    }

    fn refs(&self) -> Vec<PersonRef> {
        let mut refs: Vec<PersonRef> = self
            .people
            .iter()
            .map(|(id, name)| PersonRef {
                id: *id,
                name: name.clone(),
            })
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        refs
    }
}

#[derive(Debug)]
struct FilmAccumulator {
    title: String,
    description: Option<String>,
    rating: Option<f64>,
    genres: BTreeSet<String>,
    roles: BTreeMap<Role, RoleMembers>,
}

impl FilmAccumulator {
    fn new(row: &FilmRelationRow) -> Self {
        Self {
            title: row.title.clone(),
            description: row.description.clone(),
            rating: row.rating,
            genres: BTreeSet::new(),
            roles: Role::ALL
                .into_iter()
                .map(|role| (role, RoleMembers::default()))
                .collect(),
        }
    }

    fn role(&self, role: Role) -> (Vec<String>, Vec<PersonRef>) {
        self.roles
            .get(&role)
            .map(|members| (members.names(), members.refs()))
            .unwrap_or_default()
    }

    fn into_document(self, id: Uuid) -> FilmDocument {
        let (actors_names, actors) = self.role(Role::Actor);
        let (directors_names, directors) = self.role(Role::Director);
        let (writers_names, writers) = self.role(Role::Writer);

        FilmDocument {
            id,
            imdb_rating: self.rating,
            genre: self.genres.into_iter().collect(),
            title: self.title,
            description: self.description,
            directors_names,
            actors_names,
            writers_names,
            actors,
            writers,
            directors,
        }
    }
}

/// Groups relation join rows by film and builds one document per film, ordered by film id.
///
/// Genre and name lists are distinct and sorted, person lists hold each person once. Films
/// without genres or people get empty lists.
pub fn denormalize_films(rows: &[FilmRelationRow]) -> Vec<FilmDocument> {
    let mut films: BTreeMap<Uuid, FilmAccumulator> = BTreeMap::new();

    for row in rows {
        let film = films
            .entry(row.film_id)
            .or_insert_with(|| FilmAccumulator::new(row));

        if let Some(genre) = &row.genre_name {
            film.genres.insert(genre.clone());
        }

        let (Some(person_id), Some(person_name), Some(role)) =
            (row.person_id, &row.person_name, &row.role)
        else {
            continue;
        };

        match Role::from_db(role) {
            Some(role) => {
                film.roles
                    .entry(role)
                    .or_default()
                    .people
                    .insert(person_id, person_name.clone());
            }
            None => {
                warn!(
                    film_id = %row.film_id,
                    %person_id,
                    role = %role,
                    "ignoring person with unknown role"
                );
            }
        }
    }

    films
        .into_iter()
        .map(|(id, film)| film.into_document(id))
        .collect()
}

/// Loads and denormalizes the given films. Films missing from the catalog produce no document.
pub async fn load_film_documents<S>(source: &S, film_ids: &[Uuid]) -> EtlResult<Vec<FilmDocument>>
where
    S: CatalogSource,
{
    if film_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = source.film_relation_rows(film_ids).await?;

    Ok(denormalize_films(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(film_id: Uuid) -> FilmRelationRow {
        FilmRelationRow {
            film_id,
            title: "Star Wars".to_string(),
            description: Some("A long time ago".to_string()),
            rating: Some(8.6),
            genre_name: None,
            person_id: None,
            person_name: None,
            role: None,
        }
    }

    fn with_person(mut row: FilmRelationRow, id: Uuid, name: &str, role: &str) -> FilmRelationRow {
        row.person_id = Some(id);
        row.person_name = Some(name.to_string());
        row.role = Some(role.to_string());
        row
    }

    fn with_genre(mut row: FilmRelationRow, genre: &str) -> FilmRelationRow {
        row.genre_name = Some(genre.to_string());
        row
    }

    #[test]
    fn film_without_relations_has_empty_lists() {
        let film_id = Uuid::new_v4();

        let documents = denormalize_films(&[row(film_id)]);

        assert_eq!(documents.len(), 1);
        let document = &documents[0];
        assert_eq!(document.id, film_id);
        assert_eq!(document.imdb_rating, Some(8.6));
        assert!(document.genre.is_empty());
        assert!(document.actors.is_empty());
        assert!(document.writers.is_empty());
        assert!(document.directors.is_empty());
        assert!(document.actors_names.is_empty());
        assert!(document.writers_names.is_empty());
        assert!(document.directors_names.is_empty());

        let json = serde_json::to_value(document).unwrap();
        assert_eq!(json["actors"], serde_json::json!([]));
        assert_eq!(json["genre"], serde_json::json!([]));
    }

    #[test]
    fn cartesian_rows_collapse_into_distinct_people_and_genres() {
        let film_id = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let director = Uuid::new_v4();

        // Two genres times two people, as the join produces them.
        let rows = vec![
            with_genre(with_person(row(film_id), actor, "Mark Hamill", "actor"), "Sci-Fi"),
            with_genre(with_person(row(film_id), actor, "Mark Hamill", "actor"), "Action"),
            with_genre(with_person(row(film_id), director, "George Lucas", "director"), "Sci-Fi"),
            with_genre(with_person(row(film_id), director, "George Lucas", "DIRECTOR"), "Action"),
        ];

        let documents = denormalize_films(&rows);

        assert_eq!(documents.len(), 1);
        let document = &documents[0];
        assert_eq!(document.genre, vec!["Action", "Sci-Fi"]);
        assert_eq!(
            document.actors,
            vec![PersonRef {
                id: actor,
                name: "Mark Hamill".to_string()
            }]
        );
        assert_eq!(document.actors_names, vec!["Mark Hamill"]);
        assert_eq!(document.directors_names, vec!["George Lucas"]);
        assert!(document.writers.is_empty());
    }

    #[test]
    fn one_person_can_hold_several_roles() {
        let film_id = Uuid::new_v4();
        let person = Uuid::new_v4();

        let rows = vec![
            with_person(row(film_id), person, "George Lucas", "writer"),
            with_person(row(film_id), person, "George Lucas", "director"),
            with_person(row(film_id), Uuid::new_v4(), "Nobody", "producer"),
        ];

        let document = denormalize_films(&rows).remove(0);

        assert_eq!(document.writers.len(), 1);
        assert_eq!(document.directors.len(), 1);
        assert!(document.actors.is_empty());
    }

    #[test]
    fn documents_are_grouped_per_film() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let documents = denormalize_films(&[row(first), row(second), row(first)]);

        let ids: BTreeSet<Uuid> = documents.iter().map(|document| document.id).collect();
        assert_eq!(ids, BTreeSet::from([first, second]));
        assert_eq!(documents.len(), 2);
    }

    #[test]
    fn no_rows_produce_no_documents() {
        assert!(denormalize_films(&[]).is_empty());
    }
}
