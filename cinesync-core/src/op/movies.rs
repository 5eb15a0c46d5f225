//! Movie-list operations for one room.

use std::sync::Arc;

use crate::models::{Movie, MovieBase, MovieId, RoomId, UserId};
use crate::repository::RoomStore;
use crate::{Error, Result};

pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct MoviePage {
    pub movies: Vec<Movie>,
    pub total: u64,
}

pub struct Movies {
    room_id: RoomId,
    store: Arc<dyn RoomStore>,
}

impl Movies {
    #[must_use]
    pub fn new(room_id: RoomId, store: Arc<dyn RoomStore>) -> Self {
        Self { room_id, store }
    }

    pub async fn get(&self, id: &MovieId) -> Result<Movie> {
        self.store.movie(&self.room_id, id).await
    }

    /// List the children of `parent` (room root when `None`), filtered by
    /// keyword and paginated.
    pub async fn list(
        &self,
        parent: Option<&MovieId>,
        keyword: &str,
        page: u64,
        max: u64,
    ) -> Result<MoviePage> {
        if page == 0 || max == 0 || max > MAX_PAGE_SIZE {
            return Err(Error::InvalidInput(format!(
                "page must be >= 1 and 1 <= max <= {MAX_PAGE_SIZE}"
            )));
        }
        let keyword = keyword.to_lowercase();
        let mut movies: Vec<Movie> = self
            .store
            .movies(&self.room_id)
            .await?
            .into_iter()
            .filter(|m| m.parent_id.as_ref() == parent)
            .filter(|m| keyword.is_empty() || m.base.name.to_lowercase().contains(&keyword))
            .collect();
        movies.sort_by_key(|m| m.position);

        let total = movies.len() as u64;
        let start = ((page - 1) * max).min(total) as usize;
        let end = (start + max as usize).min(movies.len());
        Ok(MoviePage {
            movies: movies[start..end].to_vec(),
            total,
        })
    }

    pub async fn push(
        &self,
        creator: &UserId,
        parent: Option<MovieId>,
        base: MovieBase,
    ) -> Result<Movie> {
        if let Some(parent_id) = &parent {
            let folder = self.get(parent_id).await?;
            if !folder.is_folder() {
                return Err(Error::InvalidInput(
                    "parent movie is not a folder".to_string(),
                ));
            }
        }
        let mut movie = Movie::new(self.room_id.clone(), creator.clone(), base);
        movie.parent_id = parent;
        movie.validate()?;
        self.store.save_movie(&movie).await?;
        Ok(movie)
    }

    pub async fn push_many(
        &self,
        creator: &UserId,
        parent: Option<MovieId>,
        bases: Vec<MovieBase>,
    ) -> Result<Vec<Movie>> {
        let mut out = Vec::with_capacity(bases.len());
        for base in bases {
            out.push(self.push(creator, parent.clone(), base).await?);
        }
        Ok(out)
    }

    pub async fn edit(&self, id: &MovieId, base: MovieBase) -> Result<Movie> {
        let mut movie = self.get(id).await?;
        movie.base = base;
        movie.validate()?;
        self.store.save_movie(&movie).await?;
        Ok(movie)
    }

    pub async fn delete(&self, ids: &[MovieId]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::InvalidInput("no movie ids given".to_string()));
        }
        self.store.delete_movies(&self.room_id, ids).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear_movies(&self.room_id).await
    }

    pub async fn swap(&self, a: &MovieId, b: &MovieId) -> Result<()> {
        self.store.swap_movie_positions(&self.room_id, a, b).await
    }
}
