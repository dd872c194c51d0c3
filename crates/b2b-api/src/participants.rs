use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use b2b_db::Database;
use b2b_db::models::{BusinessRow, UserRow};
use b2b_types::models::{Business, Participant, User};

/// Resolves participant identifiers to their display identity.
///
/// Businesses are looked up first and users second. Ids are meant to be
/// unique across both collections; if one is not, the business wins.
#[derive(Clone)]
pub struct ParticipantResolver {
    db: Arc<Database>,
}

impl ParticipantResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn resolve(&self, id: &str) -> Result<Participant> {
        let db = self.db.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || resolve_with(&db, &id)).await?
    }

    /// Save a business profile. `false` if the id is already a user.
    pub async fn register_business(&self, business: Business) -> Result<bool> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.register_business(&BusinessRow {
                id: business.id,
                name: business.name,
                org_number: business.org_number,
                logo_url: business.logo_url,
            })
        })
        .await?
    }

    /// Save a user profile. `false` if the id is already a business.
    pub async fn register_user(&self, user: User) -> Result<bool> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.register_user(&UserRow {
                id: user.id,
                first_name: user.first_name,
                last_name: user.last_name,
                email: user.email,
                photo_url: user.photo_url,
            })
        })
        .await?
    }

    /// Directory search for the "new conversation" picker: businesses by
    /// name, users by first or last name, case-insensitive prefix.
    pub async fn search(&self, query: &str, limit: u32) -> Result<(Vec<Business>, Vec<User>)> {
        let query = query.trim().to_string();
        if query.is_empty() || limit == 0 {
            return Ok((Vec::new(), Vec::new()));
        }

        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let businesses = db.search_businesses(&query, limit)?;
            let users = db.search_users(&query, limit)?;
            Ok((
                businesses.into_iter().map(business_from_row).collect(),
                users.into_iter().map(user_from_row).collect(),
            ))
        })
        .await?
    }
}

fn resolve_with(db: &Database, id: &str) -> Result<Participant> {
    if let Some(business) = db.get_business(id)? {
        return Ok(Participant::Business(business_from_row(business)));
    }
    if let Some(user) = db.get_user(id)? {
        return Ok(Participant::User(user_from_row(user)));
    }
    Ok(Participant::Unknown { id: id.to_string() })
}

fn business_from_row(row: BusinessRow) -> Business {
    Business {
        id: row.id,
        name: row.name,
        org_number: row.org_number,
        logo_url: row.logo_url,
    }
}

fn user_from_row(row: UserRow) -> User {
    User {
        id: row.id,
        first_name: row.first_name,
        last_name: row.last_name,
        email: row.email,
        photo_url: row.photo_url,
    }
}

/// Memoizes resolutions for the lifetime of one screen (one request), so a
/// thread with many messages from the same sender resolves that sender once.
/// There is no invalidation: drop the cache when the screen is done.
pub struct ParticipantCache<'a> {
    resolver: &'a ParticipantResolver,
    resolved: HashMap<String, Participant>,
}

impl<'a> ParticipantCache<'a> {
    pub fn new(resolver: &'a ParticipantResolver) -> Self {
        Self {
            resolver,
            resolved: HashMap::new(),
        }
    }

    pub async fn get(&mut self, id: &str) -> Result<Participant> {
        if let Some(hit) = self.resolved.get(id) {
            return Ok(hit.clone());
        }
        let participant = self.resolver.resolve(id).await?;
        self.resolved.insert(id.to_string(), participant.clone());
        Ok(participant)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.resolved.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
