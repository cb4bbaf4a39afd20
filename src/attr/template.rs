// SPDX-License-Identifier: Apache-2.0

//! Attribute templates: the (shared, mostly static) type and hook
//! description for a key, grounded on `attr_template` and `attr_ops` in
//! `original_source/src/kdumpfile/attr.c`.

use std::borrow::Cow;

use crate::attr::dict::AttrDict;
use crate::attr::node::AttrId;
use crate::attr::value::AttrValue;
use crate::error::Result;

/// The type an attribute's value is declared to hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrType {
    Nil,
    Directory,
    Number,
    Address,
    String,
    Bitmap,
    Blob,
}

/// Hooks a template may carry, run while the dictionary's write lock is
/// held (spec §5: "Hook invocations execute inside the same critical
/// section as the value mutation").
pub trait AttrOps: Send + Sync {
    /// Called before a value is installed; may reject or rewrite it.
    /// Returning `Err` abandons the set — the candidate value is always
    /// consumed either way (spec §4.A).
    fn pre_set(&self, _dict: &mut AttrDict, _id: AttrId, _val: &mut AttrValue) -> Result<()> {
        Ok(())
    }

    /// Called after a value has been installed and marked `isset`.
    fn post_set(&self, _dict: &mut AttrDict, _id: AttrId) -> Result<()> {
        Ok(())
    }

    /// Called before an attribute is cleared.
    fn pre_clear(&self, _dict: &mut AttrDict, _id: AttrId) {}

    /// Called to recompute a value that may have gone stale since it was
    /// last set (e.g. a value derived from another attribute).
    fn revalidate(&self, _dict: &mut AttrDict, _id: AttrId) -> Result<()> {
        Ok(())
    }
}

/// A named key with a declared type and optional hooks.
///
/// `key` is `Cow<'static, str>` rather than a plain `&'static str` because
/// most templates come from a fixed global table (spec's required key
/// namespace, §6), but arbitrary dotted paths also create directory
/// templates on the fly (`alloc_attr_template` in `attr.c`).
#[derive(Clone)]
pub struct AttrTemplate {
    pub key: Cow<'static, str>,
    pub ty: AttrType,
    pub ops: Option<&'static dyn AttrOps>,
}

impl AttrTemplate {
    pub const fn new(key: &'static str, ty: AttrType) -> Self {
        AttrTemplate {
            key: Cow::Borrowed(key),
            ty,
            ops: None,
        }
    }

    pub const fn with_ops(key: &'static str, ty: AttrType, ops: &'static dyn AttrOps) -> Self {
        AttrTemplate {
            key: Cow::Borrowed(key),
            ty,
            ops: Some(ops),
        }
    }

    /// Build a directory template for a path segment discovered at
    /// runtime (not part of the static key namespace).
    pub fn dynamic_dir(key: String) -> Self {
        AttrTemplate {
            key: Cow::Owned(key),
            ty: AttrType::Directory,
            ops: None,
        }
    }

    /// Build a leaf template for a path segment discovered at runtime.
    pub fn dynamic_leaf(key: String, ty: AttrType) -> Self {
        AttrTemplate {
            key: Cow::Owned(key),
            ty,
            ops: None,
        }
    }
}

/// The generic directory template, used for any path segment created
/// implicitly on the way to a leaf (`dir_template` in `attr.c`).
pub const DIR_TEMPLATE: AttrTemplate = AttrTemplate::new("", AttrType::Directory);
