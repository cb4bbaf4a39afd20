// SPDX-License-Identifier: Apache-2.0

//! The attribute dictionary: a hierarchical, typed, fallback-chained
//! key/value store (spec §4.A), grounded on
//! `original_source/src/kdumpfile/attr.c`.
//!
//! Unlike the C implementation, which hashes a node's full dotted path
//! into one flat collision-chain table (`attr_hash_index`/`keycmp`),
//! each directory node here keeps its own `HashMap<String, AttrId>` of
//! immediate children. This is functionally equivalent — path lookup
//! still "consumes one dot-separated segment at a time" exactly as the
//! spec describes — and maps directly onto `std::collections::HashMap`
//! instead of hand-rolled chaining.

use std::collections::HashMap;

use crate::attr::node::{AttrId, AttrNode};
use crate::attr::template::{AttrOps, AttrTemplate, AttrType};
use crate::attr::value::{AttrValue, Blob};
use crate::error::{Error, Result};
use crate::Shared;

pub struct AttrDict {
    nodes: Vec<AttrNode>,
    children: Vec<HashMap<String, AttrId>>,
    fallback: Option<Shared<AttrDict>>,
}

impl AttrDict {
    pub fn new() -> Self {
        AttrDict {
            nodes: vec![AttrNode::new_root()],
            children: vec![HashMap::new()],
            fallback: None,
        }
    }

    /// Register a well-known key up front with a fixed type (and
    /// optionally hooks), auto-vivifying any missing parent directories.
    /// Mirrors `global_keys` in `attr.c`.
    pub fn declare(&mut self, path: &str, ty: AttrType) -> AttrId {
        self.ensure_path_local(path, ty)
            .expect("static key declaration cannot fail")
    }

    pub fn declare_with_ops(&mut self, path: &str, ty: AttrType, ops: &'static dyn AttrOps) -> AttrId {
        let id = self.declare(path, ty);
        self.nodes[id.index()].template.ops = Some(ops);
        id
    }

    /// Layer a hook override onto `id`, shadowing its current ops (the
    /// template's own, or a previously layered override) without losing
    /// it (`attr_add_override`).
    pub fn add_override(&mut self, id: AttrId, ops: Box<dyn AttrOps>) {
        self.nodes[id.index()].overrides.push(ops);
    }

    /// Remove the most recently added override from `id`, restoring
    /// whatever ops were active before it (`attr_remove_override`).
    /// Returns `false` if no override was layered on.
    pub fn remove_override(&mut self, id: AttrId) -> bool {
        self.nodes[id.index()].overrides.pop().is_some()
    }

    /// Produce a child dictionary whose leaf overrides shadow `orig`
    /// (`attr_dict_clone`). The new dictionary's root is independent;
    /// lookups miss through to `orig` whenever a path starts without a
    /// leading dot.
    pub fn clone_from_shared(orig: &Shared<AttrDict>) -> AttrDict {
        AttrDict {
            nodes: vec![AttrNode::new_root()],
            children: vec![HashMap::new()],
            fallback: Some(orig.clone()),
        }
    }

    fn index_of(&self, id: AttrId) -> &AttrNode {
        &self.nodes[id.index()]
    }

    pub fn is_directory(&self, id: AttrId) -> bool {
        self.index_of(id).is_directory()
    }

    pub fn is_set(&self, id: AttrId) -> bool {
        self.index_of(id).flags.isset
    }

    pub fn path_of(&self, id: AttrId) -> String {
        let mut segs = Vec::new();
        let mut cur = id;
        loop {
            let node = &self.nodes[cur.index()];
            match node.parent {
                Some(p) => {
                    segs.push(node.template.key.to_string());
                    cur = p;
                }
                None => break,
            }
        }
        segs.reverse();
        segs.join(".")
    }

    /// Look up `path`. A leading `.` restricts the search to this
    /// dictionary only, skipping the fallback chain (spec §4.A).
    pub fn lookup(&self, path: &str) -> Result<AttrId> {
        if let Some(stripped) = path.strip_prefix('.') {
            self.lookup_local(AttrId::ROOT, stripped)
        } else {
            match self.lookup_local(AttrId::ROOT, path) {
                Ok(id) => Ok(id),
                Err(Error::NoKey(_)) => {
                    if let Some(fb) = &self.fallback {
                        fb.read().map_err(|_| Error::Busy)?.lookup(path)
                    } else {
                        Err(Error::no_key(path))
                    }
                }
                Err(e) => Err(e),
            }
        }
    }

    /// Look up `key` as an immediate or nested child of `dir`, never
    /// consulting the fallback chain.
    pub fn lookup_dir(&self, dir: AttrId, key: &str) -> Result<AttrId> {
        self.lookup_local(dir, key)
    }

    fn lookup_local(&self, mut dir: AttrId, path: &str) -> Result<AttrId> {
        if path.is_empty() {
            return Ok(dir);
        }
        for seg in path.split('.') {
            let children = &self.children[dir.index()];
            dir = *children.get(seg).ok_or_else(|| Error::no_key(path))?;
        }
        Ok(dir)
    }

    /// Ensure every directory along `path` exists in this dictionary
    /// only (no fallback), creating the leaf with type `ty` if missing.
    /// Mirrors `create_attr_path`.
    fn ensure_path_local(&mut self, path: &str, ty: AttrType) -> Result<AttrId> {
        let mut dir = AttrId::ROOT;
        let segs: Vec<&str> = path.split('.').collect();
        for (i, seg) in segs.iter().enumerate() {
            let last = i + 1 == segs.len();
            if let Some(&child) = self.children[dir.index()].get(*seg) {
                if last && self.nodes[child.index()].template.ty != ty {
                    return Err(Error::invalid(format!(
                        "attribute {path} has type {:?}, not {:?}",
                        self.nodes[child.index()].template.ty, ty
                    )));
                }
                dir = child;
                continue;
            }
            let template = if last {
                AttrTemplate::dynamic_leaf(seg.to_string(), ty)
            } else {
                AttrTemplate::dynamic_dir(seg.to_string())
            };
            let id = AttrId(self.nodes.len() as u32);
            self.nodes.push(AttrNode::new(dir, template));
            self.children.push(HashMap::new());
            self.children[dir.index()].insert(seg.to_string(), id);
            dir = id;
        }
        Ok(dir)
    }

    fn instantiate_path(&mut self, id: AttrId) {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = &mut self.nodes[c.index()];
            if node.flags.isset {
                break;
            }
            node.flags.isset = true;
            cur = node.parent;
        }
    }

    /// Install `val` at `path`, creating the path if necessary. Runs
    /// `pre_set`/`post_set`, instantiates ancestor directories, and
    /// marks the node `isset` (spec §4.A `Set`).
    pub fn set(&mut self, path: &str, val: AttrValue) -> Result<AttrId> {
        let ty = match &val {
            AttrValue::Number(_) => AttrType::Number,
            AttrValue::Address(_) => AttrType::Address,
            AttrValue::String(_) => AttrType::String,
            AttrValue::Bitmap(_) => AttrType::Bitmap,
            AttrValue::Blob(_) => AttrType::Blob,
        };
        let id = self.ensure_path_local(path, ty)?;
        self.set_attr(id, val)?;
        Ok(id)
    }

    pub fn set_persistent(&mut self, path: &str, val: AttrValue) -> Result<AttrId> {
        let id = self.set(path, val)?;
        self.nodes[id.index()].flags.persist = true;
        Ok(id)
    }

    fn set_attr(&mut self, id: AttrId, mut val: AttrValue) -> Result<()> {
        // A layered override (if any) takes priority over the template's
        // own ops (`attr_add_override`). Pop it out to a local first: the
        // hooks below take `&mut self`, and a reference borrowed from
        // `self.nodes` would conflict with that. It's pushed back before
        // every return.
        let top_override = self.nodes[id.index()].overrides.pop();
        let base_ops = self.nodes[id.index()].template.ops;
        let ops: Option<&dyn AttrOps> = top_override.as_deref().or(base_ops);

        if let Some(ops) = ops {
            if let Err(e) = ops.pre_set(self, id, &mut val) {
                // Ownership of `val` is consumed regardless of rejection
                // (spec §4.A): dropping it here releases any heap storage.
                drop(val);
                if let Some(o) = top_override {
                    self.nodes[id.index()].overrides.push(o);
                }
                return Err(e);
            }
        }

        if let Some(parent) = self.nodes[id.index()].parent {
            self.instantiate_path(parent);
        }

        let node = &mut self.nodes[id.index()];
        node.value = Some(val);
        node.flags.isset = true;

        let post_result = match ops {
            Some(ops) => ops.post_set(self, id),
            None => Ok(()),
        };
        if let Some(o) = top_override {
            self.nodes[id.index()].overrides.push(o);
        }
        post_result
    }

    pub fn set_blob(&mut self, path: &str, bytes: Vec<u8>) -> Result<AttrId> {
        self.set(path, AttrValue::Blob(std::sync::Arc::new(bytes)))
    }

    fn child_ids(&self, id: AttrId) -> Vec<AttrId> {
        self.children[id.index()].values().copied().collect()
    }

    /// Clear (unset) `id` and, if it is a directory, all of its
    /// children recursively (`clear_attr`).
    pub fn clear(&mut self, id: AttrId) {
        for child in self.child_ids(id) {
            self.clear(child);
        }
        self.clear_single(id);
    }

    fn clear_single(&mut self, id: AttrId) {
        let top_override = self.nodes[id.index()].overrides.pop();
        let base_ops = self.nodes[id.index()].template.ops;
        let ops: Option<&dyn AttrOps> = top_override.as_deref().or(base_ops);
        if let Some(ops) = ops {
            ops.pre_clear(self, id);
        }
        if let Some(o) = top_override {
            self.nodes[id.index()].overrides.push(o);
        }
        let node = &mut self.nodes[id.index()];
        node.value = None;
        node.flags.isset = false;
    }

    /// Clear every non-persistent attribute, preserving full paths to
    /// any persistent descendant (`clear_volatile_attrs`).
    pub fn clear_volatile(&mut self, id: AttrId) -> bool {
        let mut persist = self.nodes[id.index()].flags.persist;
        for child in self.child_ids(id) {
            persist |= self.clear_volatile(child);
        }
        if !persist {
            self.clear_single(id);
        }
        persist
    }

    /// Children of a directory attribute that are currently set
    /// (`kdump_attr_iter_start`).
    pub fn iterate(&self, dir: AttrId) -> Result<Vec<AttrId>> {
        if !self.is_set(dir) {
            return Err(Error::no_data(self.path_of(dir)));
        }
        if !self.is_directory(dir) {
            return Err(Error::invalid("not a directory"));
        }
        Ok(self.children[dir.index()]
            .values()
            .copied()
            .filter(|&c| self.is_set(c))
            .collect())
    }

    fn value(&self, id: AttrId) -> Result<&AttrValue> {
        let node = &self.nodes[id.index()];
        if !node.flags.isset {
            return Err(Error::no_data(self.path_of(id)));
        }
        node.value
            .as_ref()
            .ok_or_else(|| Error::no_data(self.path_of(id)))
    }

    pub fn get_number(&self, path: &str) -> Result<u64> {
        let id = self.lookup(path)?;
        self.value(id)?
            .as_number()
            .ok_or_else(|| Error::invalid(path))
    }

    pub fn get_address(&self, path: &str) -> Result<u64> {
        let id = self.lookup(path)?;
        self.value(id)?
            .as_address()
            .ok_or_else(|| Error::invalid(path))
    }

    pub fn get_string(&self, path: &str) -> Result<String> {
        let id = self.lookup(path)?;
        self.value(id)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::invalid(path))
    }

    pub fn get_blob(&self, path: &str) -> Result<Blob> {
        let id = self.lookup(path)?;
        self.value(id)?
            .as_blob()
            .cloned()
            .ok_or_else(|| Error::invalid(path))
    }

    pub fn try_get_number(&self, path: &str) -> Option<u64> {
        self.get_number(path).ok()
    }
}

impl Default for AttrDict {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shared;
    use std::sync::{Arc, RwLock};

    #[test]
    fn set_then_lookup_roundtrip() {
        let mut dict = AttrDict::new();
        let id = dict
            .set("linux.version_code", AttrValue::Number(0x40d00))
            .unwrap();
        assert!(dict.is_set(id));
        assert_eq!(dict.get_number("linux.version_code").unwrap(), 0x40d00);

        // Every ancestor directory must also be isset.
        let linux_dir = dict.lookup("linux").unwrap();
        assert!(dict.is_set(linux_dir));
        assert!(dict.is_set(AttrId::ROOT));
    }

    #[test]
    fn clear_volatile_preserves_persistent_descendants() {
        let mut dict = AttrDict::new();
        dict.set_persistent("linux.version_code", AttrValue::Number(1)).unwrap();
        dict.set("linux.phys_base", AttrValue::Address(0x1000)).unwrap();

        dict.clear_volatile(AttrId::ROOT);

        assert!(dict.get_number("linux.version_code").is_ok());
        assert!(dict.get_address("linux.phys_base").is_err());
        // The path down to the persistent leaf must still be isset.
        assert!(dict.is_set(dict.lookup("linux").unwrap()));
    }

    #[test]
    fn fallback_chain_respects_leading_dot() {
        let mut base = AttrDict::new();
        base.set("linux.version_code", AttrValue::Number(0x40d00))
            .unwrap();
        let shared: Shared<AttrDict> = Arc::new(RwLock::new(base));

        let clone = AttrDict::clone_from_shared(&shared);

        assert_eq!(clone.get_number("linux.version_code").unwrap(), 0x40d00);
        assert!(matches!(
            clone.lookup(".linux.version_code"),
            Err(Error::NoKey(_))
        ));
    }

    #[test]
    fn unknown_key_is_no_key() {
        let dict = AttrDict::new();
        assert!(matches!(dict.lookup("does.not.exist"), Err(Error::NoKey(_))));
    }

    #[test]
    fn type_mismatch_on_redeclare_is_invalid() {
        let mut dict = AttrDict::new();
        dict.set("arch.page_size", AttrValue::Number(4096)).unwrap();
        let err = dict.set("arch.page_size", AttrValue::Address(0)).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn iterate_yields_only_set_children() {
        let mut dict = AttrDict::new();
        dict.set("xen.ver_major", AttrValue::Number(4)).unwrap();
        let xen_dir = dict.ensure_path_local("xen.ver_minor", AttrType::Number).unwrap();
        // ver_minor intentionally left unset.
        let _ = xen_dir;
        let dir = dict.lookup("xen").unwrap();
        let set_children = dict.iterate(dir).unwrap();
        assert_eq!(set_children.len(), 1);
    }

    struct DoublingOverride;

    impl AttrOps for DoublingOverride {
        fn pre_set(&self, _dict: &mut AttrDict, _id: AttrId, val: &mut AttrValue) -> Result<()> {
            if let AttrValue::Number(n) = val {
                *n *= 2;
            }
            Ok(())
        }
    }

    #[test]
    fn override_shadows_then_remove_restores_base_behavior() {
        let mut dict = AttrDict::new();
        let id = dict.declare("linux.version_code", AttrType::Number);

        dict.add_override(id, Box::new(DoublingOverride));
        dict.set("linux.version_code", AttrValue::Number(21)).unwrap();
        assert_eq!(dict.get_number("linux.version_code").unwrap(), 42);

        assert!(dict.remove_override(id));
        dict.set("linux.version_code", AttrValue::Number(21)).unwrap();
        assert_eq!(dict.get_number("linux.version_code").unwrap(), 21);

        assert!(!dict.remove_override(id));
    }
}
