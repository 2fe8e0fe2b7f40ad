use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A document stored in a search index under [`IndexDocument::document_id`].
pub trait IndexDocument: Serialize + Send + Sync {
    fn document_id(&self) -> Uuid;
}

impl<T> IndexDocument for &T
where
    T: IndexDocument,
{
    fn document_id(&self) -> Uuid {
        (**self).document_id()
    }
}

/// A person nested in a film document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: Uuid,
    pub name: String,
}

/// A film with its genres and people flattened in.
///
/// Every list is present, possibly empty. Person lists hold each person once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmDocument {
    pub id: Uuid,
    pub imdb_rating: Option<f64>,
    pub genre: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub directors_names: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
    pub directors: Vec<PersonRef>,
}

impl IndexDocument for FilmDocument {
    fn document_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreDocument {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl IndexDocument for GenreDocument {
    fn document_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDocument {
    pub id: Uuid,
    pub full_name: String,
}

impl IndexDocument for PersonDocument {
    fn document_id(&self) -> Uuid {
        self.id
    }
}
