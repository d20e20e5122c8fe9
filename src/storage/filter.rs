//! Message filters and their compilation into SQL predicates.
//!
//! A filter compiles into a `WHERE` clause plus bound parameters. The same
//! filter can select either its matches or everything except its matches.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::FilterError;

/// Selects a subset of archived messages.
///
/// Every field that is set narrows the selection; a filter with no fields set
/// matches every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub channel_ids: Option<BTreeSet<i64>>,
    pub user_ids: Option<BTreeSet<i64>>,
    pub message_ids: Option<BTreeSet<i64>>,
    /// Inclusive lower bound on the message timestamp.
    pub after: Option<i64>,
    /// Inclusive upper bound on the message timestamp.
    pub before: Option<i64>,
    pub has_attachments: Option<bool>,
    pub has_embeds: Option<bool>,
    pub has_reactions: Option<bool>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.message_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_channel_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.channel_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_user_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.user_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_time_range(mut self, after: Option<i64>, before: Option<i64>) -> Self {
        self.after = after;
        self.before = before;
        self
    }

    pub fn with_attachments(mut self, present: bool) -> Self {
        self.has_attachments = Some(present);
        self
    }

    pub fn with_embeds(mut self, present: bool) -> Self {
        self.has_embeds = Some(present);
        self
    }

    pub fn with_reactions(mut self, present: bool) -> Self {
        self.has_reactions = Some(present);
        self
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reject filters that cannot describe a meaningful selection.
    pub fn validate(&self) -> Result<(), FilterError> {
        if let (Some(after), Some(before)) = (self.after, self.before) {
            if after > before {
                return Err(FilterError::EmptyTimeRange { after, before });
            }
        }
        Ok(())
    }
}

/// A compiled predicate: ` WHERE ...` plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    sql: String,
    params: Vec<Value>,
}

impl WhereClause {
    /// Clause text, starting with a space so it can be appended to a query.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Compile `filter` into a predicate over the `messages` table.
///
/// An absent or empty filter matches everything. With `invert` the predicate
/// matches exactly the rows the filter does not. `alias` qualifies column
/// references when the query names `messages` by an alias.
pub fn where_clause(
    filter: Option<&MessageFilter>,
    alias: Option<&str>,
    invert: bool,
) -> Result<WhereClause, FilterError> {
    let prefix = match alias {
        Some(alias) if is_identifier(alias) => format!("{alias}."),
        Some(alias) => return Err(FilterError::InvalidAlias(alias.to_string())),
        None => String::new(),
    };
    // Sub-queries bind their own `message_id`, so the outer row is always
    // named explicitly there.
    let outer = alias.unwrap_or("messages");

    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(filter) = filter {
        filter.validate()?;

        let id_sets = [
            ("channel_id", &filter.channel_ids),
            ("sender_id", &filter.user_ids),
            ("message_id", &filter.message_ids),
        ];
        for (column, ids) in id_sets {
            if let Some(ids) = ids {
                // One JSON array parameter regardless of set size.
                conditions.push(format!("{prefix}{column} IN (SELECT value FROM json_each(?))"));
                params.push(Value::Text(json_array(ids)));
            }
        }

        if let Some(after) = filter.after {
            conditions.push(format!("{prefix}timestamp >= ?"));
            params.push(Value::Integer(after));
        }
        if let Some(before) = filter.before {
            conditions.push(format!("{prefix}timestamp <= ?"));
            params.push(Value::Integer(before));
        }

        let children = [
            ("attachments", filter.has_attachments),
            ("embeds", filter.has_embeds),
            ("reactions", filter.has_reactions),
        ];
        for (table, present) in children {
            if let Some(present) = present {
                let negation = if present { "" } else { "NOT " };
                conditions.push(format!(
                    "{negation}EXISTS (SELECT 1 FROM {table} c WHERE c.message_id = {outer}.message_id)"
                ));
            }
        }
    }

    let predicate = if conditions.is_empty() {
        "1".to_string()
    } else {
        conditions.join(" AND ")
    };

    let sql = if invert {
        format!(" WHERE NOT ({predicate})")
    } else {
        format!(" WHERE {predicate}")
    };

    Ok(WhereClause { sql, params })
}

fn json_array(ids: &BTreeSet<i64>) -> String {
    let items: Vec<String> = ids.iter().map(i64::to_string).collect();
    format!("[{}]", items.join(","))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params_from_iter, Connection};

    fn matching_ids(conn: &Connection, clause: &WhereClause) -> Vec<i64> {
        let sql = format!("SELECT message_id FROM messages{} ORDER BY message_id", clause.sql());
        let mut stmt = conn.prepare(&sql).unwrap();
        stmt.query_map(params_from_iter(clause.params()), |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE messages (message_id INTEGER PRIMARY KEY, sender_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL, timestamp INTEGER NOT NULL);
            CREATE TABLE attachments (message_id INTEGER NOT NULL);
            CREATE TABLE embeds (message_id INTEGER NOT NULL);
            CREATE TABLE reactions (message_id INTEGER NOT NULL);
            INSERT INTO messages VALUES (1, 10, 100, 1000), (2, 20, 100, 2000),
                                        (3, 10, 200, 3000), (4, 20, 200, 4000);
            INSERT INTO attachments VALUES (2), (4);
            INSERT INTO reactions VALUES (3);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_absent_filter_matches_everything() {
        let clause = where_clause(None, None, false).unwrap();
        assert_eq!(clause.sql(), " WHERE 1");
        assert!(clause.params().is_empty());

        let conn = fixture();
        assert_eq!(matching_ids(&conn, &clause), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_inverted_absent_filter_matches_nothing() {
        let conn = fixture();
        let clause = where_clause(None, None, true).unwrap();
        assert!(matching_ids(&conn, &clause).is_empty());
    }

    #[test]
    fn test_invert_selects_complement() {
        let conn = fixture();
        let filter = MessageFilter::new().with_message_ids([2, 3]);

        let matches = where_clause(Some(&filter), None, false).unwrap();
        let rest = where_clause(Some(&filter), None, true).unwrap();

        assert_eq!(matching_ids(&conn, &matches), vec![2, 3]);
        assert_eq!(matching_ids(&conn, &rest), vec![1, 4]);
    }

    #[test]
    fn test_conditions_combine() {
        let conn = fixture();
        let filter = MessageFilter::new()
            .with_user_ids([20])
            .with_time_range(Some(1500), None)
            .with_attachments(true);
        let clause = where_clause(Some(&filter), None, false).unwrap();
        assert_eq!(matching_ids(&conn, &clause), vec![2, 4]);

        let filter = MessageFilter::new().with_channel_ids([200]).with_attachments(false);
        let clause = where_clause(Some(&filter), None, false).unwrap();
        assert_eq!(matching_ids(&conn, &clause), vec![3]);
    }

    #[test]
    fn test_child_presence_is_correlated_without_alias() {
        let conn = fixture();

        let with = where_clause(Some(&MessageFilter::new().with_attachments(true)), None, false).unwrap();
        assert!(with.sql().contains("c.message_id = messages.message_id"));
        assert_eq!(matching_ids(&conn, &with), vec![2, 4]);

        let without = where_clause(Some(&MessageFilter::new().with_attachments(false)), None, false).unwrap();
        assert_eq!(matching_ids(&conn, &without), vec![1, 3]);

        let inverted = where_clause(Some(&MessageFilter::new().with_attachments(true)), None, true).unwrap();
        assert_eq!(matching_ids(&conn, &inverted), vec![1, 3]);

        let reactions = where_clause(Some(&MessageFilter::new().with_reactions(true)), None, false).unwrap();
        assert_eq!(matching_ids(&conn, &reactions), vec![3]);
    }

    #[test]
    fn test_alias_qualifies_columns() {
        let filter = MessageFilter::new().with_channel_ids([1]).with_embeds(true);
        let clause = where_clause(Some(&filter), Some("m"), false).unwrap();
        assert!(clause.sql().contains("m.channel_id IN"));
        assert!(clause.sql().contains("c.message_id = m.message_id"));
    }

    #[test]
    fn test_malformed_filters_rejected() {
        let filter = MessageFilter::new().with_time_range(Some(10), Some(5));
        assert_eq!(
            where_clause(Some(&filter), None, false).unwrap_err(),
            FilterError::EmptyTimeRange { after: 10, before: 5 }
        );

        assert!(matches!(
            where_clause(None, Some("m; DROP TABLE messages"), false),
            Err(FilterError::InvalidAlias(_))
        ));
    }

    #[test]
    fn test_empty_filter_is_empty() {
        assert!(MessageFilter::new().is_empty());
        assert!(!MessageFilter::new().with_reactions(false).is_empty());
    }
}
