//! Identities that messages point at: users, servers and channels.
//!
//! Every upsert updates columns in place. Replacing the row instead would
//! delete it first and cascade into the messages that reference it.

use rusqlite::{params, Connection};
use tracing::debug;

use super::pool::ConnectionPool;
use crate::error::StoreError;
use crate::model::{Channel, Server, User};

/// Storage for the users, servers and channels of the archive.
#[derive(Clone)]
pub struct DirectoryRepository {
    pool: ConnectionPool,
}

impl DirectoryRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of users in one transaction.
    pub async fn add_users(&self, users: Vec<User>) -> Result<(), StoreError> {
        if users.is_empty() {
            return Ok(());
        }
        let count = users.len();
        self.pool.run(move |conn| upsert_users(conn, &users)).await?;
        debug!(count, "Users added");
        Ok(())
    }

    /// Upsert a batch of servers in one transaction.
    pub async fn add_servers(&self, servers: Vec<Server>) -> Result<(), StoreError> {
        if servers.is_empty() {
            return Ok(());
        }
        let count = servers.len();
        self.pool.run(move |conn| upsert_servers(conn, &servers)).await?;
        debug!(count, "Servers added");
        Ok(())
    }

    /// Upsert a batch of channels in one transaction.
    ///
    /// Every channel's server must already be stored.
    pub async fn add_channels(&self, channels: Vec<Channel>) -> Result<(), StoreError> {
        if channels.is_empty() {
            return Ok(());
        }
        let count = channels.len();
        self.pool.run(move |conn| upsert_channels(conn, &channels)).await?;
        debug!(count, "Channels added");
        Ok(())
    }

    /// Number of stored users, including the platform sentinel.
    pub async fn count_users(&self) -> Result<u64, StoreError> {
        self.pool.run(|conn| count_rows(conn, "users")).await
    }

    pub async fn count_channels(&self) -> Result<u64, StoreError> {
        self.pool.run(|conn| count_rows(conn, "channels")).await
    }
}

pub fn upsert_users(conn: &mut Connection, users: &[User]) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO users (id, name, display_name, avatar_url, discriminator)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 display_name = excluded.display_name,
                 avatar_url = excluded.avatar_url,
                 discriminator = excluded.discriminator",
        )?;
        for user in users {
            stmt.execute(params![
                user.id,
                user.name,
                user.display_name,
                user.avatar_url,
                user.discriminator
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn upsert_servers(conn: &mut Connection, servers: &[Server]) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO servers (id, name, type)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 type = excluded.type",
        )?;
        for server in servers {
            stmt.execute(params![server.id, server.name, server.kind.as_str()])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn upsert_channels(conn: &mut Connection, channels: &[Channel]) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO channels (id, server, name, parent_id, position, topic, nsfw)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (id) DO UPDATE SET
                 server = excluded.server,
                 name = excluded.name,
                 parent_id = excluded.parent_id,
                 position = excluded.position,
                 topic = excluded.topic,
                 nsfw = excluded.nsfw",
        )?;
        for channel in channels {
            stmt.execute(params![
                channel.id,
                channel.server,
                channel.name,
                channel.parent_id,
                channel.position,
                channel.topic,
                channel.nsfw
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn count_rows(conn: &Connection, table: &'static str) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, ServerKind, PLATFORM_USER_ID};
    use crate::storage::messages::{count_all_messages, insert_messages};
    use crate::storage::schema::{apply_pragmas, migrate, LogProgress};

    fn open() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        migrate(&mut conn, &mut LogProgress).unwrap();
        conn
    }

    fn user(id: i64, name: &str) -> User {
        User {
            id,
            name: name.into(),
            display_name: None,
            avatar_url: None,
            discriminator: None,
        }
    }

    fn guild() -> Server {
        Server {
            id: 1,
            name: "Guild".into(),
            kind: ServerKind::Server,
        }
    }

    fn channel(id: i64, name: &str) -> Channel {
        Channel {
            id,
            server: 1,
            name: name.into(),
            parent_id: None,
            position: Some(0),
            topic: None,
            nsfw: Some(false),
        }
    }

    #[test]
    fn test_sentinel_user_counted() {
        let conn = open();
        assert_eq!(count_rows(&conn, "users").unwrap(), 1);

        let name: String = conn
            .query_row("SELECT name FROM users WHERE id = ?1", [PLATFORM_USER_ID], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "Platform");
    }

    #[test]
    fn test_update_keeps_dependent_messages() {
        let mut conn = open();
        upsert_servers(&mut conn, &[guild()]).unwrap();
        upsert_channels(&mut conn, &[channel(10, "general")]).unwrap();
        upsert_users(&mut conn, &[user(100, "alice")]).unwrap();
        insert_messages(&mut conn, &[Message::new(1, 100, 10, "hi", 0)]).unwrap();

        let mut renamed = user(100, "alice");
        renamed.display_name = Some("Alice".into());
        upsert_users(&mut conn, &[renamed]).unwrap();
        upsert_channels(&mut conn, &[channel(10, "lobby")]).unwrap();
        upsert_servers(&mut conn, &[guild()]).unwrap();

        assert_eq!(count_all_messages(&conn).unwrap(), 1);
        let display: Option<String> = conn
            .query_row("SELECT display_name FROM users WHERE id = 100", [], |row| row.get(0))
            .unwrap();
        assert_eq!(display.as_deref(), Some("Alice"));
        let name: String = conn
            .query_row("SELECT name FROM channels WHERE id = 10", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "lobby");
    }

    #[test]
    fn test_channel_requires_server() {
        let mut conn = open();
        assert!(upsert_channels(&mut conn, &[channel(10, "general")]).is_err());
        assert_eq!(count_rows(&conn, "channels").unwrap(), 0);
    }
}
