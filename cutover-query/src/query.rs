use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{
    cursor::{Cursor, CursorOrder, CursorType},
    error::QueryError,
};

const DEFAULT_LIMIT: u16 = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<N> {
    pub cursor: CursorType,
    pub node: N,
}

impl<N: Cursor> From<N> for Edge<N> {
    fn from(value: N) -> Self {
        Self {
            cursor: value.to_cursor(),
            node: value,
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_previous_page: bool,
    pub has_next_page: bool,
    pub start_cursor: Option<CursorType>,
    pub end_cursor: Option<CursorType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<N> {
    pub edges: Vec<Edge<N>>,
    pub page_info: PageInfo,
}

impl<N> Default for QueryResult<N> {
    fn default() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo::default(),
        }
    }
}

impl<N> QueryResult<N> {
    /// Converts every node while keeping the page tokens untouched.
    pub fn try_map<T, E, F>(self, mut f: F) -> Result<QueryResult<T>, E>
    where
        F: FnMut(N) -> Result<T, E>,
    {
        let mut edges = Vec::with_capacity(self.edges.len());

        for edge in self.edges {
            edges.push(Edge {
                cursor: edge.cursor,
                node: f(edge.node)?,
            });
        }

        Ok(QueryResult {
            edges,
            page_info: self.page_info,
        })
    }

    pub fn nodes(self) -> Vec<N> {
        self.edges.into_iter().map(|edge| edge.node).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryArgs {
    pub first: Option<u16>,
    pub after: Option<CursorType>,
    pub last: Option<u16>,
    pub before: Option<CursorType>,
}

impl QueryArgs {
    pub fn backward(last: u16, before: Option<CursorType>) -> Self {
        Self {
            last: Some(last),
            before,
            ..Default::default()
        }
    }

    pub fn forward(first: u16, after: Option<CursorType>) -> Self {
        Self {
            first: Some(first),
            after,
            ..Default::default()
        }
    }

    pub fn is_backward(&self) -> bool {
        (self.last.is_some() || self.before.is_some())
            && self.first.is_none()
            && self.after.is_none()
    }

    pub fn is_none(&self) -> bool {
        self.last.is_none() && self.before.is_none() && self.first.is_none() && self.after.is_none()
    }
}

/// Keyset pagination over an in-memory set of nodes.
///
/// `Ord` on `N` must agree with the fields listed by [`Cursor::keys`], since
/// the node decoded from a cursor only carries those fields.
pub struct Query<N> {
    nodes: Vec<N>,
    cursor_order: CursorOrder,
}

impl<N> Query<N>
where
    N: Cursor + Ord,
{
    pub fn new(nodes: impl IntoIterator<Item = N>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            cursor_order: CursorOrder::Asc,
        }
    }

    pub fn cursor_order(mut self, value: CursorOrder) -> Self {
        self.cursor_order = value;
        self
    }

    pub fn backward(self, last: u16, before: Option<CursorType>) -> Result<QueryResult<N>, QueryError> {
        self.build(QueryArgs::backward(last, before))
    }

    pub fn forward(self, first: u16, after: Option<CursorType>) -> Result<QueryResult<N>, QueryError> {
        self.build(QueryArgs::forward(first, after))
    }

    pub fn forward_desc(
        self,
        first: u16,
        after: Option<CursorType>,
    ) -> Result<QueryResult<N>, QueryError> {
        self.cursor_order(CursorOrder::Desc)
            .build(QueryArgs::forward(first, after))
    }

    pub fn build(self, args: QueryArgs) -> Result<QueryResult<N>, QueryError> {
        let is_backward = args.is_backward();
        let (limit, cursor) = if is_backward {
            (args.last.unwrap_or(DEFAULT_LIMIT), args.before.as_ref())
        } else {
            (args.first.unwrap_or(DEFAULT_LIMIT), args.after.as_ref())
        };

        let cursor = match cursor {
            Some(cursor) => Some(N::from_cursor(cursor)?),
            None => None,
        };

        let descending = matches!(
            (self.cursor_order, is_backward),
            (CursorOrder::Asc, true) | (CursorOrder::Desc, false)
        );

        let mut nodes = self.nodes;
        nodes.sort();

        if descending {
            nodes.reverse();
        }

        let mut rows = nodes
            .into_iter()
            .filter(|node| match &cursor {
                Some(cursor) if descending => node < cursor,
                Some(cursor) => node > cursor,
                None => true,
            })
            .take(usize::from(limit) + 1)
            .collect::<Vec<_>>();

        let has_more = rows.len() > usize::from(limit);

        if has_more {
            rows.pop();
        }

        let edges_iter = rows.into_iter().map(Edge::from);

        let edges: Vec<_> = if is_backward {
            edges_iter.rev().collect()
        } else {
            edges_iter.collect()
        };

        let page_info = if is_backward {
            let start_cursor = edges.first().map(|edge| edge.cursor.clone());

            PageInfo {
                has_previous_page: has_more,
                has_next_page: false,
                start_cursor,
                end_cursor: None,
            }
        } else {
            let end_cursor = edges.last().map(|edge| edge.cursor.clone());

            PageInfo {
                has_previous_page: false,
                has_next_page: has_more,
                start_cursor: None,
                end_cursor,
            }
        };

        Ok(QueryResult { edges, page_info })
    }
}
