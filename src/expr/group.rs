//! Immutable AND/OR groups built as a backward-linked chain of frames.
//!
//! Every call to [`Group::and`] or [`Group::or`] allocates one frame that
//! holds only the newly added children and points at the previous frame.
//! Reading a group replays the chain from root to tip, so a group handed to
//! one query is never changed by code that keeps extending a shared base.

use crate::expr::cond::{Cond, Condition};
use crate::models::RawSql;
use std::sync::Arc;

/// How the children of a group are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joiner {
    And,
    Or,
}

impl Joiner {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A node of a logical expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    Condition(Condition),
    Group(Group),
    Raw(RawSql),
}

impl Expr {
    /// True when the node would render to no SQL at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Condition(_) => false,
            Self::Group(group) => group.is_empty(),
            Self::Raw(raw) => raw.text.trim().is_empty(),
        }
    }
}

impl From<Condition> for Expr {
    fn from(c: Condition) -> Self {
        Expr::Condition(c)
    }
}

impl From<Group> for Expr {
    fn from(g: Group) -> Self {
        Expr::Group(g)
    }
}

impl From<RawSql> for Expr {
    fn from(r: RawSql) -> Self {
        Expr::Raw(r)
    }
}

/// A single-key map becomes a bare condition. Anything larger becomes an
/// AND group so it keeps its meaning when placed under an OR.
impl From<Cond> for Expr {
    fn from(cond: Cond) -> Self {
        let mut conditions = cond.into_conditions();
        if conditions.len() == 1 {
            if let Some(only) = conditions.pop() {
                return Expr::Condition(only);
            }
        }
        Expr::Group(Group::new(
            Joiner::And,
            conditions.into_iter().map(Expr::Condition),
        ))
    }
}

#[derive(Debug)]
struct Frame {
    prev: Option<Arc<Frame>>,
    delta: Vec<Expr>,
    /// Whether this frame or any ancestor carries a non-empty node.
    populated: bool,
}

/// An ordered list of child nodes joined by AND or OR.
#[derive(Debug, Clone)]
pub struct Group {
    joiner: Joiner,
    tip: Option<Arc<Frame>>,
}

impl Group {
    pub fn new<I, E>(joiner: Joiner, exprs: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        Self {
            joiner,
            tip: None,
        }
        .extend(exprs)
    }

    pub fn empty(joiner: Joiner) -> Self {
        Self { joiner, tip: None }
    }

    pub fn joiner(&self) -> Joiner {
        self.joiner
    }

    /// Combine with more nodes under AND.
    ///
    /// An AND group grows by one frame. An OR group becomes the first child
    /// of a new AND group. Passing no nodes returns an identical group.
    pub fn and<I, E>(&self, exprs: I) -> Group
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        self.combine(Joiner::And, exprs)
    }

    /// Combine with more nodes under OR. Mirrors [`Group::and`].
    pub fn or<I, E>(&self, exprs: I) -> Group
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        self.combine(Joiner::Or, exprs)
    }

    fn combine<I, E>(&self, joiner: Joiner, exprs: I) -> Group
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let delta: Vec<Expr> = exprs.into_iter().map(Into::into).collect();
        if delta.is_empty() {
            return self.clone();
        }
        if joiner == self.joiner {
            return self.clone().extend(delta);
        }
        let mut children = Vec::with_capacity(delta.len() + 1);
        children.push(Expr::Group(self.clone()));
        children.extend(delta);
        Group::new(joiner, children)
    }

    fn extend<I, E>(self, exprs: I) -> Group
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let delta: Vec<Expr> = exprs.into_iter().map(Into::into).collect();
        if delta.is_empty() {
            return self;
        }
        let populated = delta.iter().any(|e| !e.is_empty())
            || self.tip.as_ref().is_some_and(|f| f.populated);
        Group {
            joiner: self.joiner,
            tip: Some(Arc::new(Frame {
                prev: self.tip,
                delta,
                populated,
            })),
        }
    }

    /// True if neither this group nor any frame before it carries a node
    /// that renders to SQL.
    pub fn is_empty(&self) -> bool {
        !self.tip.as_ref().is_some_and(|f| f.populated)
    }

    /// Replay the frame chain from root to tip into a flat list of children.
    pub fn expressions(&self) -> Vec<Expr> {
        let mut frames = Vec::new();
        let mut cursor = self.tip.as_deref();
        while let Some(frame) = cursor {
            frames.push(frame);
            cursor = frame.prev.as_deref();
        }
        frames
            .into_iter()
            .rev()
            .flat_map(|f| f.delta.iter().cloned())
            .collect()
    }

    /// Number of children across all frames.
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.tip.as_deref();
        while let Some(frame) = cursor {
            n += frame.delta.len();
            cursor = frame.prev.as_deref();
        }
        n
    }
}
