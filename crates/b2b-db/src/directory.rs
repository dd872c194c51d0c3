use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};

use crate::models::{BusinessRow, UserRow};
use crate::{Database, OptionalExt};

impl Database {
    // -- Businesses --

    pub fn upsert_business(&self, business: &BusinessRow) -> Result<()> {
        self.with_conn_mut(|conn| write_business(conn, business))
    }

    /// Upsert unless the id already belongs to a user. Returns `false` (and
    /// writes nothing) on such a collision.
    pub fn register_business(&self, business: &BusinessRow) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if query_user(&tx, &business.id)?.is_some() {
                return Ok(false);
            }
            write_business(&tx, business)?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_business(&self, id: &str) -> Result<Option<BusinessRow>> {
        self.with_conn(|conn| query_business(conn, id))
    }

    /// Case-insensitive prefix match on the business name.
    pub fn search_businesses(&self, prefix: &str, limit: u32) -> Result<Vec<BusinessRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, org_number, logo_url FROM businesses
                 WHERE name LIKE ?1 ESCAPE '\\'
                 ORDER BY name COLLATE NOCASE
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![like_prefix(prefix), limit], business_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Users --

    pub fn upsert_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn_mut(|conn| write_user(conn, user))
    }

    /// Upsert unless the id already belongs to a business. Returns `false`
    /// (and writes nothing) on such a collision.
    pub fn register_user(&self, user: &UserRow) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if query_business(&tx, &user.id)?.is_some() {
                return Ok(false);
            }
            write_user(&tx, user)?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Case-insensitive prefix match on first or last name. Each user appears once.
    pub fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, first_name, last_name, email, photo_url FROM users
                 WHERE first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\'
                 ORDER BY first_name COLLATE NOCASE, last_name COLLATE NOCASE
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![like_prefix(prefix), limit], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn write_business(conn: &Connection, business: &BusinessRow) -> Result<()> {
    conn.execute(
        "INSERT INTO businesses (id, name, org_number, logo_url) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             org_number = excluded.org_number,
             logo_url = excluded.logo_url",
        (&business.id, &business.name, &business.org_number, &business.logo_url),
    )?;
    Ok(())
}

fn write_user(conn: &Connection, user: &UserRow) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, first_name, last_name, email, photo_url) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
             first_name = excluded.first_name,
             last_name = excluded.last_name,
             email = excluded.email,
             photo_url = excluded.photo_url",
        (&user.id, &user.first_name, &user.last_name, &user.email, &user.photo_url),
    )?;
    Ok(())
}

fn query_business(conn: &Connection, id: &str) -> Result<Option<BusinessRow>> {
    conn.query_row(
        "SELECT id, name, org_number, logo_url FROM businesses WHERE id = ?1",
        [id],
        business_from_row,
    )
    .optional()
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, first_name, last_name, email, photo_url FROM users WHERE id = ?1",
        [id],
        user_from_row,
    )
    .optional()
}

fn business_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BusinessRow> {
    Ok(BusinessRow {
        id: row.get(0)?,
        name: row.get(1)?,
        org_number: row.get(2)?,
        logo_url: row.get(3)?,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        photo_url: row.get(4)?,
    })
}

/// `LIKE` pattern matching `prefix` literally at the start of the column.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
