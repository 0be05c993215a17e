// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Global state mutated by the command walk, and the hooks observing it.

use std::collections::BTreeMap;
use std::fmt;

use prism_db::{Error, Result, Storable};
use serde::{Deserialize, Serialize};

use crate::api::ApiId;
use crate::command::{Severity, SubCmdIdx};
use crate::val::{Key, MemoryRange, Struct, Val};

/// A framebuffer attachment slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attachment {
    /// Color attachment 0.
    Color0,
    /// Color attachment 1.
    Color1,
    /// Color attachment 2.
    Color2,
    /// Color attachment 3.
    Color3,
    /// Depth attachment.
    Depth,
    /// Stencil attachment.
    Stencil,
}

impl Attachment {
    /// Every slot, in reporting order.
    pub const ALL: [Attachment; 6] = [
        Self::Color0,
        Self::Color1,
        Self::Color2,
        Self::Color3,
        Self::Depth,
        Self::Stencil,
    ];
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Color0 => "color0",
            Self::Color1 => "color1",
            Self::Color2 => "color2",
            Self::Color3 => "color3",
            Self::Depth => "depth",
            Self::Stencil => "stencil",
        })
    }
}

impl std::str::FromStr for Attachment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.to_string() == s)
            .ok_or_else(|| Error::invalid(format!("unknown attachment {s:?}")))
    }
}

/// Descriptor of the image bound to an attachment slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Index of the attachment within its render target.
    #[serde(default)]
    pub index: u32,
    /// Pixel format name.
    pub format: String,
}

impl Storable for AttachmentInfo {}

/// Bytes of one memory pool. Unwritten bytes read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Written bytes, starting at address zero.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl Pool {
    /// Reads `len` bytes at `base`.
    pub fn read(&self, base: u64, len: u64) -> Vec<u8> {
        let mut out = vec![0u8; usize::try_from(len).unwrap_or(0)];
        let start = usize::try_from(base).unwrap_or(usize::MAX);
        if start < self.data.len() {
            let avail = &self.data[start..];
            let n = avail.len().min(out.len());
            out[..n].copy_from_slice(&avail[..n]);
        }
        out
    }

    /// Writes `bytes` at `base`, growing the pool as needed.
    pub fn write(&mut self, base: u64, bytes: &[u8]) -> Result<()> {
        let start = usize::try_from(base)
            .map_err(|_| Error::invalid(format!("address {base:#x} exceeds host range")))?;
        let end = start + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// A live resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource kind (`"texture"`, `"buffer"`, `"shader"`…).
    pub kind: String,
    /// Human-readable label.
    #[serde(default)]
    pub label: String,
    /// Current contents.
    #[serde(default)]
    pub data: Val,
}

/// Global state of every API at one point in a capture.
///
/// States are plain values: each walk clones the capture's initial state and
/// mutates its own copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Per-API state values.
    #[serde(default)]
    pub apis: BTreeMap<ApiId, Val>,
    /// Memory pools.
    #[serde(default)]
    pub memory: BTreeMap<u32, Pool>,
    /// Currently bound framebuffer attachments.
    #[serde(default)]
    pub attachments: BTreeMap<Attachment, AttachmentInfo>,
    /// Live resources keyed by handle.
    #[serde(default)]
    pub resources: BTreeMap<u64, ResourceState>,
}

impl Storable for GlobalState {}

impl GlobalState {
    /// Reads the bytes addressed by `range`.
    pub fn read_memory(&self, range: &MemoryRange) -> Vec<u8> {
        match self.memory.get(&range.pool) {
            Some(pool) => pool.read(range.base, range.byte_len()),
            None => vec![0; usize::try_from(range.byte_len()).unwrap_or(0)],
        }
    }

    /// Writes `bytes` into `pool` at `base`.
    pub fn write_memory(&mut self, pool: u32, base: u64, bytes: &[u8]) -> Result<()> {
        self.memory.entry(pool).or_default().write(base, bytes)
    }

    /// Sets the value at `path` inside the state of `api`.
    ///
    /// Missing intermediate records are created; an empty path replaces the
    /// whole API state. Map steps use string keys.
    pub fn set_api_value(&mut self, api: ApiId, path: &[String], value: Val) -> Result<()> {
        let mut slot = self.apis.entry(api).or_default();
        for (depth, name) in path.iter().enumerate() {
            if slot.is_nil() {
                *slot = Val::Struct(Struct::new("State"));
            }
            slot = match slot {
                Val::Struct(s) => {
                    if s.get(name).is_none() {
                        s.set(name, Val::Nil);
                    }
                    s.get_mut(name)
                        .ok_or_else(|| Error::Internal("field vanished".into()))?
                }
                Val::Map(m) => m.entry(Key::Str(name.clone())).or_default(),
                other => {
                    return Err(Error::invalid(format!(
                        "cannot set {} through {} at depth {depth}",
                        path.join("."),
                        other.type_name()
                    )))
                }
            };
        }
        *slot = value;
        Ok(())
    }

    /// The whole state as a navigable record, with API states named by
    /// `api_name`.
    pub fn to_val(&self, api_name: impl Fn(ApiId) -> String) -> Val {
        let mut root = Struct::new("GlobalState");
        for (api, v) in &self.apis {
            root.set(&api_name(*api), v.clone());
        }
        if !self.memory.is_empty() {
            let pools = self
                .memory
                .iter()
                .map(|(id, pool)| {
                    (
                        Key::Uint(u64::from(*id)),
                        Val::Memory(MemoryRange {
                            pool: *id,
                            base: 0,
                            count: pool.data.len() as u64,
                            elem_size: 1,
                        }),
                    )
                })
                .collect();
            root.set("memory", Val::Map(pools));
        }
        if !self.attachments.is_empty() {
            let fb = self
                .attachments
                .iter()
                .map(|(a, info)| {
                    (
                        Key::Str(a.to_string()),
                        Val::record(
                            "Attachment",
                            [
                                ("width", Val::from(info.width)),
                                ("height", Val::from(info.height)),
                                ("index", Val::from(info.index)),
                                ("format", Val::from(info.format.as_str())),
                            ],
                        ),
                    )
                })
                .collect();
            root.set("framebuffer", Val::Map(fb));
        }
        if !self.resources.is_empty() {
            let res = self
                .resources
                .iter()
                .map(|(h, r)| {
                    (
                        Key::Uint(*h),
                        Val::record(
                            "Resource",
                            [
                                ("kind", Val::from(r.kind.as_str())),
                                ("label", Val::from(r.label.as_str())),
                                ("data", r.data.clone()),
                            ],
                        ),
                    )
                })
                .collect();
            root.set("resources", Val::Map(res));
        }
        Val::Struct(root)
    }
}

/// A resource event reported to [`StateHooks`].
#[derive(Debug, Clone, Copy)]
pub struct ResourceEvent<'a> {
    /// API-level handle.
    pub handle: u64,
    /// Resource kind.
    pub kind: &'a str,
    /// Human-readable label.
    pub label: &'a str,
}

/// Observers installed on a command walk.
///
/// Backends call these while mutating state; the report builder and resource
/// tracker implement them. Every method defaults to a no-op.
pub trait StateHooks {
    /// Records a diagnostic for the command at `at`. Returns a token for
    /// [`StateHooks::add_tag`], or `None` if messages are not collected.
    fn new_message(&mut self, _at: &SubCmdIdx, _severity: Severity, _text: &str) -> Option<usize> {
        None
    }

    /// Attaches `tag` to the message identified by `token`.
    fn add_tag(&mut self, _token: usize, _tag: &str) {}

    /// A resource was created.
    fn on_create(&mut self, _at: &SubCmdIdx, _resource: ResourceEvent<'_>) {}

    /// A resource was read or written.
    fn on_access(&mut self, _at: &SubCmdIdx, _resource: ResourceEvent<'_>) {}

    /// A resource was destroyed.
    fn on_destroy(&mut self, _at: &SubCmdIdx, _resource: ResourceEvent<'_>) {}

    /// Mutating the command at `at` failed; the walk continues.
    fn on_error(&mut self, _at: &SubCmdIdx, _err: &Error) {}
}

/// Hooks that observe nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl StateHooks for NoHooks {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn pools_read_zero_past_written_bytes() {
        let mut p = Pool::default();
        p.write(2, &[1, 2, 3]).unwrap();
        assert_eq!(p.read(0, 6), vec![0, 0, 1, 2, 3, 0]);
        assert_eq!(p.read(100, 2), vec![0, 0]);
    }

    #[test]
    fn set_api_value_creates_intermediate_records() {
        let mut s = GlobalState::default();
        let api = ApiId(2);
        s.set_api_value(api, &["viewport".into(), "width".into()], Val::Uint(800))
            .unwrap();
        s.set_api_value(api, &["viewport".into(), "height".into()], Val::Uint(600))
            .unwrap();
        let Val::Struct(root) = &s.apis[&api] else {
            panic!("expected a record");
        };
        let Some(Val::Struct(vp)) = root.get("viewport") else {
            panic!("expected a viewport record");
        };
        assert_eq!(vp.get("width"), Some(&Val::Uint(800)));
        assert_eq!(vp.get("height"), Some(&Val::Uint(600)));
    }

    #[test]
    fn set_api_value_rejects_scalars_in_the_way() {
        let mut s = GlobalState::default();
        let api = ApiId(1);
        s.set_api_value(api, &["x".into()], Val::Uint(1)).unwrap();
        let err = s
            .set_api_value(api, &["x".into(), "y".into()], Val::Uint(2))
            .unwrap_err();
        assert_eq!(err.kind(), prism_db::ErrorKind::InvalidArgument);
    }

    #[test]
    fn attachments_parse_from_display() {
        for a in Attachment::ALL {
            assert_eq!(a.to_string().parse::<Attachment>().unwrap(), a);
        }
    }
}
