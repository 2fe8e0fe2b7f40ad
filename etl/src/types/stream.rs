use std::fmt;

use etl_config::shared::IndexNames;
use serde::{Deserialize, Serialize};

/// Kind of a catalog row, one per source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Film,
    Person,
    Genre,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Film => "film",
            EntityKind::Person => "person",
            EntityKind::Genre => "genre",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "film" => Some(EntityKind::Film),
            "person" => Some(EntityKind::Person),
            "genre" => Some(EntityKind::Genre),
            _ => None,
        }
    }

    /// Table in the `content` schema holding rows of this kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Film => "film_work",
            EntityKind::Person => "person",
            EntityKind::Genre => "genre",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search index fed by the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Movies,
    Genres,
    Persons,
}

impl IndexKind {
    pub const ALL: [IndexKind; 3] = [IndexKind::Movies, IndexKind::Genres, IndexKind::Persons];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Movies => "movies",
            IndexKind::Genres => "genres",
            IndexKind::Persons => "persons",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "movies" => Some(IndexKind::Movies),
            "genres" => Some(IndexKind::Genres),
            "persons" => Some(IndexKind::Persons),
            _ => None,
        }
    }

    /// Kind of the rows that become documents of this index.
    pub fn root_kind(&self) -> EntityKind {
        match self {
            IndexKind::Movies => EntityKind::Film,
            IndexKind::Genres => EntityKind::Genre,
            IndexKind::Persons => EntityKind::Person,
        }
    }

    /// Returns the configured name of this index in the cluster.
    pub fn index_name<'a>(&self, names: &'a IndexNames) -> &'a str {
        match self {
            IndexKind::Movies => &names.movies,
            IndexKind::Genres => &names.genres,
            IndexKind::Persons => &names.persons,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link table tying a dependent kind to films.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTable {
    PersonFilmWork,
    GenreFilmWork,
}

impl LinkTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            LinkTable::PersonFilmWork => "person_film_work",
            LinkTable::GenreFilmWork => "genre_film_work",
        }
    }

    /// Column referencing the dependent row.
    pub fn dependent_column(&self) -> &'static str {
        match self {
            LinkTable::PersonFilmWork => "person_id",
            LinkTable::GenreFilmWork => "genre_id",
        }
    }
}

/// A changed entity kind feeding one index. Each stream owns one cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncStream {
    pub index: IndexKind,
    pub entity: EntityKind,
}

impl SyncStream {
    pub const MOVIES_BY_FILM: SyncStream = SyncStream::new(IndexKind::Movies, EntityKind::Film);
    pub const MOVIES_BY_PERSON: SyncStream =
        SyncStream::new(IndexKind::Movies, EntityKind::Person);
    pub const MOVIES_BY_GENRE: SyncStream = SyncStream::new(IndexKind::Movies, EntityKind::Genre);
    pub const GENRES: SyncStream = SyncStream::new(IndexKind::Genres, EntityKind::Genre);
    pub const PERSONS: SyncStream = SyncStream::new(IndexKind::Persons, EntityKind::Person);

    /// Every stream, in tick order.
    pub const ALL: [SyncStream; 5] = [
        SyncStream::MOVIES_BY_FILM,
        SyncStream::MOVIES_BY_PERSON,
        SyncStream::MOVIES_BY_GENRE,
        SyncStream::GENRES,
        SyncStream::PERSONS,
    ];

    pub const fn new(index: IndexKind, entity: EntityKind) -> Self {
        Self { index, entity }
    }

    /// Resolves a stream from its persisted names. Unknown pairs yield `None`.
    pub fn from_names(index: &str, entity: &str) -> Option<Self> {
        let stream = SyncStream::new(IndexKind::from_name(index)?, EntityKind::from_name(entity)?);
        SyncStream::ALL.contains(&stream).then_some(stream)
    }

    /// Link table to resolve films from, `None` when the changed rows are the documents.
    pub fn link_table(&self) -> Option<LinkTable> {
        match (self.index, self.entity) {
            (IndexKind::Movies, EntityKind::Person) => Some(LinkTable::PersonFilmWork),
            (IndexKind::Movies, EntityKind::Genre) => Some(LinkTable::GenreFilmWork),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.entity)
    }
}

/// Participation of a person in a film.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Actor,
    Director,
    Writer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Actor, Role::Director, Role::Writer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Actor => "actor",
            Role::Director => "director",
            Role::Writer => "writer",
        }
    }

    /// Parses the `role` column of `person_film_work`.
    pub fn from_db(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "actor" => Some(Role::Actor),
            "director" => Some(Role::Director),
            "writer" => Some(Role::Writer),
            _ => None,
        }
    }
}
