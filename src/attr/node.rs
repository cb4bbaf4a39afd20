// SPDX-License-Identifier: Apache-2.0

//! Arena-allocated attribute nodes.
//!
//! `attr.c`'s `attr_data` is a parent-pointer node with a sibling-linked
//! child list; the root's `dir` field closes a cycle back through the
//! tree. Per the redesign note in spec §9 ("Arena for attribute nodes"),
//! nodes here live in a flat `Vec` inside [`crate::attr::dict::AttrDict`]
//! and refer to each other by index (`AttrId`) instead of by pointer,
//! which sidesteps the cycle entirely.

use crate::attr::template::{AttrOps, AttrTemplate};
use crate::attr::value::AttrValue;

/// Index of a node within an [`crate::attr::dict::AttrDict`]'s arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrId(pub(crate) u32);

impl AttrId {
    /// The root directory is always the first node allocated.
    pub const ROOT: AttrId = AttrId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AttrFlags {
    pub isset: bool,
    /// Survives `clear_volatile`.
    pub persist: bool,
}

pub struct AttrNode {
    pub parent: Option<AttrId>,
    pub template: AttrTemplate,
    pub flags: AttrFlags,
    pub value: Option<AttrValue>,
    /// A stack of hook overrides layered onto this node's template
    /// (`attr_add_override`/`attr_remove_override` in `attr.c`). The top
    /// of the stack, if any, runs instead of `template.ops`; pushing
    /// another override shadows the previous one without discarding it,
    /// and popping restores it. `attr.c` threads this through a
    /// `template.parent` linked list of `attr_template`s; a `Vec` here
    /// is the same last-in-first-out shape without the pointer chain.
    pub overrides: Vec<Box<dyn AttrOps>>,
}

impl AttrNode {
    pub fn new_root() -> Self {
        AttrNode {
            parent: None,
            template: AttrTemplate::dynamic_dir(String::new()),
            flags: AttrFlags {
                isset: true,
                persist: true,
            },
            value: None,
            overrides: Vec::new(),
        }
    }

    pub fn new(parent: AttrId, template: AttrTemplate) -> Self {
        AttrNode {
            parent: Some(parent),
            template,
            flags: AttrFlags::default(),
            value: None,
            overrides: Vec::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.template.ty == crate::attr::template::AttrType::Directory
    }
}
