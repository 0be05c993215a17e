// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Navigable tree views over state values.
//!
//! Nodes are computed on demand from the stored value. Records expose their
//! fields, maps their entries and arrays their elements; arrays longer than
//! the group size are split into `"[i - j]"` buckets, nesting buckets until
//! no level exceeds the group size. Every node carries the value path that
//! addresses it, so a node can be followed back to its value.

use std::ops::ControlFlow;

use prism_capture::{Key, Val};
use prism_db::{async_trait, value, Context, Error, Resolvable, Result, Storable, Value};
use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::resolve;

/// A state value exposed as a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTree {
    /// The value.
    pub root: Val,
    /// Path of the value.
    pub root_path: Path,
    /// Maximum elements per array level.
    pub array_group_size: u64,
}

impl Storable for StateTree {}

/// Summary of one state-tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTreeNodeInfo {
    /// Field name, key, element index or bucket range.
    pub name: String,
    /// Path of the node's value.
    pub value_path: Path,
    /// Short rendering of leaf values.
    pub preview: Option<String>,
    /// Number of children.
    pub num_children: u64,
}

#[derive(Clone)]
struct Cursor<'a> {
    name: String,
    val: &'a Val,
    path: Path,
    bucket: Option<(u64, u64)>,
}

fn strip(v: &Val) -> &Val {
    match v {
        Val::Ptr(Some(inner)) => strip(inner),
        other => other,
    }
}

impl<'a> Cursor<'a> {
    fn children(&self, group: u64) -> Vec<Cursor<'a>> {
        match strip(self.val) {
            Val::Struct(s) => s
                .fields
                .iter()
                .map(|f| Cursor {
                    name: f.name.clone(),
                    val: &f.value,
                    path: self.path.clone().field(f.name.clone()),
                    bucket: None,
                })
                .collect(),
            Val::Map(m) => m
                .iter()
                .map(|(k, v)| Cursor {
                    name: match k {
                        Key::Str(s) => s.clone(),
                        other => other.to_string(),
                    },
                    val: v,
                    path: self.path.clone().key(k.clone()),
                    bucket: None,
                })
                .collect(),
            Val::Array(items) => self.elements(items, group),
            _ => Vec::new(),
        }
    }

    /// Path of the array this cursor views, for bucket cursors.
    fn array_path(&self) -> Path {
        match (&self.bucket, &self.path) {
            (Some(_), Path::Slice(s)) => (*s.parent).clone(),
            _ => self.path.clone(),
        }
    }

    fn elements(&self, items: &'a [Val], group: u64) -> Vec<Cursor<'a>> {
        let (start, end) = self.bucket.unwrap_or((0, items.len() as u64));
        let n = end - start;
        let array = self.array_path();
        if group < 2 || n <= group {
            return (start..end)
                .filter_map(|i| {
                    Some(Cursor {
                        name: i.to_string(),
                        val: items.get(usize::try_from(i).ok()?)?,
                        path: array.clone().index(i),
                        bucket: None,
                    })
                })
                .collect();
        }
        let mut per = group;
        while per.saturating_mul(group) < n {
            per *= group;
        }
        (start..end)
            .step_by(usize::try_from(per).unwrap_or(usize::MAX))
            .map(|a| {
                let b = (a + per).min(end);
                Cursor {
                    name: format!("[{a} - {}]", b - 1),
                    val: self.val,
                    path: array.clone().slice(a, b),
                    bucket: Some((a, b)),
                }
            })
            .collect()
    }

    fn info(&self, group: u64) -> StateTreeNodeInfo {
        let num_children = self.children(group).len() as u64;
        let preview = match strip(self.val) {
            _ if self.bucket.is_some() => None,
            Val::Struct(_) | Val::Map(_) => None,
            Val::Array(_) if num_children > 0 => None,
            other => Some(other.to_string()),
        };
        StateTreeNodeInfo {
            name: self.name.clone(),
            value_path: self.path.clone(),
            preview,
            num_children,
        }
    }
}

impl StateTree {
    fn root_cursor(&self) -> Cursor<'_> {
        Cursor {
            name: "state".to_owned(),
            val: &self.root,
            path: self.root_path.clone(),
            bucket: None,
        }
    }

    fn cursor(&self, indices: &[u64]) -> Result<Cursor<'_>> {
        let mut cur = self.root_cursor();
        for &i in indices {
            let mut children = cur.children(self.array_group_size);
            let len = children.len() as u64;
            let slot = usize::try_from(i)
                .ok()
                .filter(|&s| s < children.len())
                .ok_or_else(|| Error::out_of_bounds(i, len))?;
            cur = children.swap_remove(slot);
        }
        Ok(cur)
    }

    /// Summary of the root node.
    pub fn root_info(&self) -> StateTreeNodeInfo {
        self.root_cursor().info(self.array_group_size)
    }

    /// Summary of the node at `indices`.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] for an index past a node's children.
    pub fn node(&self, indices: &[u64]) -> Result<StateTreeNodeInfo> {
        Ok(self.cursor(indices)?.info(self.array_group_size))
    }

    /// Child indices of the node showing `member`, or of its closest shown
    /// ancestor.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `member` is not below the tree's value.
    pub fn indices_for(&self, member: &Path) -> Result<Vec<u64>> {
        let mut steps = Vec::new();
        let mut p = member.clone();
        while p != self.root_path {
            steps.push(p.clone());
            p = p.parent().ok_or_else(|| {
                Error::not_found(format!("{member} below {}", self.root_path))
            })?;
        }
        steps.reverse();

        let mut out = Vec::new();
        let mut cur = self.root_cursor();
        let mut steps = steps.into_iter().peekable();
        while let Some(step) = steps.peek() {
            let children = cur.children(self.array_group_size);
            let exact = children.iter().position(|c| c.path == *step);
            let bucket = || match step {
                Path::ArrayIndex(a) => children.iter().position(|c| {
                    c.bucket.is_some_and(|(s, e)| (s..e).contains(&a.index))
                }),
                _ => None,
            };
            let Some(i) = exact.or_else(bucket) else {
                break;
            };
            if exact.is_some() {
                steps.next();
            }
            out.push(i as u64);
            cur = children.into_iter().nth(i).ok_or_else(|| {
                Error::Internal("state-tree child vanished".into())
            })?;
        }
        Ok(out)
    }

    /// Visits every node in pre-order until `f` breaks.
    pub fn walk(&self, f: &mut dyn FnMut(&[u64], StateTreeNodeInfo) -> ControlFlow<()>) {
        let mut indices = Vec::new();
        let _ = self.walk_from(&self.root_cursor(), &mut indices, f);
    }

    fn walk_from(
        &self,
        cur: &Cursor<'_>,
        indices: &mut Vec<u64>,
        f: &mut dyn FnMut(&[u64], StateTreeNodeInfo) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        for (i, child) in cur.children(self.array_group_size).iter().enumerate() {
            indices.push(i as u64);
            f(indices, child.info(self.array_group_size))?;
            self.walk_from(child, indices, f)?;
            indices.pop();
        }
        ControlFlow::Continue(())
    }
}

/// Resolvable description of a state tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTreeResolvable {
    /// Path of the state value.
    pub state: Path,
    /// Maximum elements per array level.
    pub array_group_size: u64,
}

impl Storable for StateTreeResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for StateTreeResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        let root = resolve::resolve_val(ctx, &self.state).await?;
        Ok(value(StateTree {
            root,
            root_path: self.state.clone(),
            array_group_size: self.array_group_size,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prism_capture::Struct;
    use prism_db::Id;

    use super::*;
    use crate::path::CapturePath;

    fn tree(root: Val, group: u64) -> StateTree {
        StateTree {
            root,
            root_path: CapturePath::new(Id::of_str("c")).command(0).global_state(),
            array_group_size: group,
        }
    }

    fn sample() -> Val {
        Val::Struct(
            Struct::new("GL")
                .with("viewport", Val::Array((0..25u64).map(Val::Uint).collect()))
                .with("name", "main"),
        )
    }

    #[test]
    fn arrays_are_bucketed() {
        let t = tree(sample(), 10);
        let root = t.node(&[]).unwrap();
        assert_eq!(root.num_children, 2);
        let vp = t.node(&[0]).unwrap();
        assert_eq!((vp.name.as_str(), vp.num_children), ("viewport", 3));
        let bucket = t.node(&[0, 2]).unwrap();
        assert_eq!((bucket.name.as_str(), bucket.num_children), ("[20 - 24]", 5));
        let leaf = t.node(&[0, 2, 1]).unwrap();
        assert_eq!(leaf.preview.as_deref(), Some("21"));
        assert_eq!(leaf.value_path, t.root_path.clone().field("viewport").index(21));
        assert_eq!(t.node(&[1]).unwrap().preview.as_deref(), Some("main"));
    }

    #[test]
    fn member_paths_map_back_to_indices() {
        let t = tree(sample(), 10);
        let member = t.root_path.clone().field("viewport").index(13);
        let idx = t.indices_for(&member).unwrap();
        assert_eq!(idx, [0, 1, 3]);
        assert_eq!(t.node(&idx).unwrap().value_path, member);
        let missing = t.root_path.clone().field("scissor");
        assert_eq!(t.indices_for(&missing).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn walk_visits_in_pre_order() {
        let t = tree(sample(), 100);
        let mut names = Vec::new();
        t.walk(&mut |_, n| {
            names.push(n.name);
            if names.len() == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(names, ["viewport", "0", "1"]);
    }
}
