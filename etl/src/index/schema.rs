//! Settings and mappings of the search indices.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::IndexKind;

/// Shape of an index schema file.
#[derive(Debug, Clone, Deserialize)]
struct SchemaFile {
    settings: Value,
    mappings: SchemaMappings,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaMappings {
    movies: Value,
    genres: Value,
    persons: Value,
}

/// Definitions used to create missing indices.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSchemas {
    settings: Value,
    movies: Value,
    genres: Value,
    persons: Value,
}

impl IndexSchemas {
    /// Reads schemas from `path`, or returns the built-in ones when no path is given.
    pub async fn load(path: Option<&Path>) -> EtlResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = tokio::fs::read(path).await.map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Index schema file could not be read",
                detail = format!("{}: {err}", path.display()),
                source: err
            )
        })?;

        Self::from_slice(&contents)
    }

    pub fn from_slice(contents: &[u8]) -> EtlResult<Self> {
        let file: SchemaFile = serde_json::from_slice(contents).map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Index schema file is not valid",
                err,
                source: err
            )
        })?;

        Ok(Self {
            settings: file.settings,
            movies: file.mappings.movies,
            genres: file.mappings.genres,
            persons: file.mappings.persons,
        })
    }

    /// Body of the index creation request of `index`.
    pub fn definition(&self, index: IndexKind) -> Value {
        let mappings = match index {
            IndexKind::Movies => &self.movies,
            IndexKind::Genres => &self.genres,
            IndexKind::Persons => &self.persons,
        };

        json!({
            "settings": self.settings,
            "mappings": mappings,
        })
    }
}

impl Default for IndexSchemas {
    fn default() -> Self {
        Self {
            settings: default_settings(),
            movies: movies_mappings(),
            genres: genres_mappings(),
            persons: persons_mappings(),
        }
    }
}

fn default_settings() -> Value {
    json!({
        "refresh_interval": "1s",
        "analysis": {
            "filter": {
                "english_stop": { "type": "stop", "stopwords": "_english_" },
                "english_stemmer": { "type": "stemmer", "language": "english" },
                "english_possessive_stemmer": { "type": "stemmer", "language": "possessive_english" },
                "russian_stop": { "type": "stop", "stopwords": "_russian_" },
                "russian_stemmer": { "type": "stemmer", "language": "russian" }
            },
            "analyzer": {
                "ru_en": {
                    "tokenizer": "standard",
                    "filter": [
                        "lowercase",
                        "english_stop",
                        "english_stemmer",
                        "english_possessive_stemmer",
                        "russian_stop",
                        "russian_stemmer"
                    ]
                }
            }
        }
    })
}

fn text_with_raw() -> Value {
    json!({
        "type": "text",
        "analyzer": "ru_en",
        "fields": { "raw": { "type": "keyword" } }
    })
}

fn nested_people() -> Value {
    json!({
        "type": "nested",
        "dynamic": "strict",
        "properties": {
            "id": { "type": "keyword" },
            "name": { "type": "text", "analyzer": "ru_en" }
        }
    })
}

fn movies_mappings() -> Value {
    let text = json!({ "type": "text", "analyzer": "ru_en" });

    json!({
        "dynamic": "strict",
        "properties": {
            "id": { "type": "keyword" },
            "imdb_rating": { "type": "float" },
            "genre": { "type": "keyword" },
            "title": text_with_raw(),
            "description": text,
            "directors_names": text,
            "actors_names": text,
            "writers_names": text,
            "actors": nested_people(),
            "directors": nested_people(),
            "writers": nested_people()
        }
    })
}

fn genres_mappings() -> Value {
    json!({
        "dynamic": "strict",
        "properties": {
            "id": { "type": "keyword" },
            "name": text_with_raw(),
            "description": text_with_raw()
        }
    })
}

fn persons_mappings() -> Value {
    json!({
        "dynamic": "strict",
        "properties": {
            "id": { "type": "keyword" },
            "full_name": text_with_raw()
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::types::{FilmDocument, GenreDocument, PersonDocument};

    fn mapped_fields(definition: &Value) -> BTreeSet<String> {
        definition["mappings"]["properties"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect()
    }

    fn document_fields(document: Value) -> BTreeSet<String> {
        document.as_object().unwrap().keys().cloned().collect()
    }

    #[test]
    fn default_mappings_cover_every_document_field() {
        let schemas = IndexSchemas::default();

        let film = FilmDocument {
            id: uuid::Uuid::nil(),
            imdb_rating: None,
            genre: vec![],
            title: String::new(),
            description: None,
            directors_names: vec![],
            actors_names: vec![],
            writers_names: vec![],
            actors: vec![],
            writers: vec![],
            directors: vec![],
        };
        let genre = GenreDocument {
            id: uuid::Uuid::nil(),
            name: String::new(),
            description: None,
        };
        let person = PersonDocument {
            id: uuid::Uuid::nil(),
            full_name: String::new(),
        };

        assert_eq!(
            mapped_fields(&schemas.definition(IndexKind::Movies)),
            document_fields(serde_json::to_value(film).unwrap())
        );
        assert_eq!(
            mapped_fields(&schemas.definition(IndexKind::Genres)),
            document_fields(serde_json::to_value(genre).unwrap())
        );
        assert_eq!(
            mapped_fields(&schemas.definition(IndexKind::Persons)),
            document_fields(serde_json::to_value(person).unwrap())
        );
    }

    #[test]
    fn definitions_share_the_analyzer_settings() {
        let schemas = IndexSchemas::default();

        for index in IndexKind::ALL {
            let definition = schemas.definition(index);
            assert!(definition["settings"]["analysis"]["analyzer"]["ru_en"].is_object());
            assert_eq!(definition["mappings"]["dynamic"], "strict");
        }
    }

    #[tokio::test]
    async fn schema_file_replaces_the_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{"settings": {"number_of_shards": 1}, "mappings": {"movies": {"properties": {}}, "genres": {}, "persons": {}}}"#,
        )
        .unwrap();

        let schemas = IndexSchemas::load(Some(&path)).await.unwrap();

        let definition = schemas.definition(IndexKind::Movies);
        assert_eq!(definition["settings"]["number_of_shards"], 1);
        assert_eq!(definition["mappings"], json!({"properties": {}}));
    }

    #[test]
    fn incomplete_schema_file_is_rejected() {
        let err = IndexSchemas::from_slice(br#"{"settings": {}}"#).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
