// SPDX-License-Identifier: Apache-2.0

//! The attribute dictionary (spec §4.A): a hierarchical, typed store of
//! configuration, discovered facts, and overrides, grounded on
//! `original_source/src/kdumpfile/attr.c`.

pub mod dict;
pub mod node;
pub mod template;
pub mod value;

pub use dict::AttrDict;
pub use node::AttrId;
pub use template::{AttrOps, AttrTemplate, AttrType};
pub use value::{AttrValue, Bitmap, Blob};

/// Register the required key namespace (spec §6) on a freshly created
/// dictionary: `arch.*`, `linux.*`, `xen.*`, `addrxlat.*` and friends,
/// each with its declared type. Mirrors `attr_dict_new`'s walk over
/// `global_keys`.
pub fn declare_well_known(dict: &mut AttrDict) {
    use AttrType::*;

    dict.declare("arch.name", String);
    dict.declare("arch.ptr_size", Number);
    dict.declare("arch.byte_order", String);
    dict.declare("arch.page_size", Number);

    dict.declare("linux.version_code", Number);
    dict.declare("linux.phys_base", Address);
    dict.declare("linux.uts.machine", String);
    dict.declare("linux.uts.release", String);
    dict.declare("linux.vmcoreinfo_raw", Blob);
    dict.declare("linux.task_struct_raw", Blob);
    dict.declare("linux.num_cpus", Number);

    dict.declare("xen.version_code", Number);
    dict.declare("xen.ver_major", Number);
    dict.declare("xen.ver_minor", Number);
    dict.declare("xen.ver_extra", String);
    dict.declare("xen.ver_extra_addr", Address);
    dict.declare("xen.phys_start", Address);
    dict.declare("xen.xen_p2m_mfn", Address);
    dict.declare("xen.xen_xlat", Number);
    dict.declare("xen.vmcoreinfo_raw", Blob);

    dict.declare("file.eraseinfo_raw", Blob);

    dict.declare("addrxlat.ostype", String);
    dict.declare("addrxlat.opts.rootpgt", Address);
    dict.declare("addrxlat.opts.virt_bits", Number);
    dict.declare("addrxlat.opts.sme_mask", Number);
    dict.declare("addrxlat.opts.xen_p2m_mfn", Address);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_keys_start_unset() {
        let mut dict = AttrDict::new();
        declare_well_known(&mut dict);
        let id = dict.lookup("arch.page_size").unwrap();
        assert!(!dict.is_set(id));
        assert!(dict.get_number("arch.page_size").is_err());
    }
}
