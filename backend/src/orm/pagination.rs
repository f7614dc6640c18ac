//! Cursor-based pagination over query results
//!
//! Implements Relay-style connections on top of [`Query`]. Pages are keyed on
//! the identifier: cursors encode the storage key of a node and results are
//! always ordered by id, so a cursor stays valid while rows are inserted.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use tracing::debug;

use super::context::Context;
use super::error::{Error, ValidationError};
use super::node::Node;
use super::predicate::{CmpOp, Order, Predicate};
use super::query::Query;
use super::value::Id;

/// Information about pagination in a connection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageInfo {
    /// When paginating forwards, are there more items?
    pub has_next_page: bool,
    /// When paginating backwards, are there more items?
    pub has_previous_page: bool,
    /// Cursor of the first item in this page
    pub start_cursor: Option<String>,
    /// Cursor of the last item in this page
    pub end_cursor: Option<String>,
    /// Total count of items matching the query, ignoring cursors
    pub total_count: Option<i64>,
}

/// A node and the cursor pointing at it
#[derive(Debug, Clone, Serialize)]
pub struct Edge<T> {
    pub node: T,
    pub cursor: String,
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    /// An empty page
    pub fn empty() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo {
                total_count: Some(0),
                ..PageInfo::default()
            },
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}

/// Encode a storage key as a cursor string
pub fn encode_cursor(key: i64) -> String {
    BASE64.encode(format!("cursor:{}", key))
}

/// Decode a cursor string to a storage key
pub fn decode_cursor(cursor: &str) -> Result<i64, &'static str> {
    let decoded = BASE64.decode(cursor).map_err(|_| "invalid cursor format")?;
    let s = String::from_utf8(decoded).map_err(|_| "invalid cursor encoding")?;

    let Some(key) = s.strip_prefix("cursor:") else {
        return Err("invalid cursor prefix");
    };

    key.parse().map_err(|_| "invalid cursor value")
}

/// Relay arguments for [`Query::paginate`]
#[derive(Debug, Clone, Default)]
pub struct PageArgs<'a> {
    pub after: Option<&'a str>,
    pub first: Option<u64>,
    pub before: Option<&'a str>,
    pub last: Option<u64>,
}

impl Query {
    /// Fetch one page of nodes.
    ///
    /// `first` and `last` are mutually exclusive. Any ordering, limit or
    /// offset already on the query is replaced by the page window.
    pub async fn paginate(
        &self,
        ctx: &Context,
        after: Option<&str>,
        first: Option<u64>,
        before: Option<&str>,
        last: Option<u64>,
    ) -> Result<Connection<Node>, Error> {
        let entity = self.entity();
        let invalid = |reason| {
            Error::from(ValidationError::InvalidPagination {
                entity: entity.label,
                reason,
            })
        };
        if first.is_some() && last.is_some() {
            return Err(invalid("first and last cannot be combined"));
        }
        let cursor_id = |cursor: &str| {
            decode_cursor(cursor).map(|key| Id::Int(key).to_kind(entity.id.kind))
        };

        let base = self.clone().unwindowed();
        let total = base.count(ctx).await?;

        let mut page = base;
        if let Some(cursor) = after {
            page = page.filter(Predicate::id_cmp(CmpOp::Gt, cursor_id(cursor).map_err(invalid)?));
        }
        if let Some(cursor) = before {
            page = page.filter(Predicate::id_cmp(CmpOp::Lt, cursor_id(cursor).map_err(invalid)?));
        }

        let id_column = entity.id.column;
        let (mut nodes, has_next_page, has_previous_page) = match (first, last) {
            (Some(n), _) => {
                let mut nodes = page
                    .order(Order::asc(id_column))
                    .limit(n.saturating_add(1))
                    .all(ctx)
                    .await?;
                let more = nodes.len() as u64 > n;
                nodes.truncate(n as usize);
                (nodes, more, after.is_some())
            }
            (None, Some(n)) => {
                let mut nodes = page
                    .order(Order::desc(id_column))
                    .limit(n.saturating_add(1))
                    .all(ctx)
                    .await?;
                let more = nodes.len() as u64 > n;
                nodes.truncate(n as usize);
                nodes.reverse();
                (nodes, before.is_some(), more)
            }
            (None, None) => {
                let nodes = page.order(Order::asc(id_column)).all(ctx).await?;
                (nodes, false, false)
            }
        };
        debug!(
            entity = entity.label,
            returned = nodes.len(),
            total,
            "Paginated query"
        );

        let edges = nodes
            .drain(..)
            .map(|node| {
                let key = node.id().storage_key(entity.label)?;
                Ok(Edge {
                    cursor: encode_cursor(key),
                    node,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
            total_count: Some(i64::try_from(total).unwrap_or(i64::MAX)),
        };
        Ok(Connection { edges, page_info })
    }

    /// [`Query::paginate`] taking its arguments as one value.
    pub async fn paginate_with(&self, ctx: &Context, args: PageArgs<'_>) -> Result<Connection<Node>, Error> {
        self.paginate(ctx, args.after, args.first, args.before, args.last)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_roundtrip() {
        for key in [0, 1, 100, 999999] {
            let cursor = encode_cursor(key);
            assert_eq!(decode_cursor(&cursor).unwrap(), key);
        }
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert_eq!(decode_cursor("%%%"), Err("invalid cursor format"));
        assert_eq!(
            decode_cursor(&BASE64.encode("offset:4")),
            Err("invalid cursor prefix")
        );
        assert_eq!(
            decode_cursor(&BASE64.encode("cursor:abc")),
            Err("invalid cursor value")
        );
    }

    #[test]
    fn test_empty_connection() {
        let conn: Connection<Node> = Connection::empty();
        assert!(conn.edges.is_empty());
        assert_eq!(conn.page_info.total_count, Some(0));
        assert!(!conn.page_info.has_next_page);
    }
}
