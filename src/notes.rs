// SPDX-License-Identifier: Apache-2.0

//! ELF note parsing: extracts facts from a dump's notes segment into the
//! attribute dictionary (spec §4.D). Grounded on `do_notes`/`note_equal`/
//! `do_noarch_note`/`do_arch_note` in
//! `original_source/src/kdumpfile/notes.c`.

use crate::attr::{AttrDict, AttrValue};
use crate::error::{Error, Result};

/// Byte order a note buffer is encoded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Architecture-specific decoding the core cannot provide on its own:
/// `CORE/NT_PRSTATUS` and `QEMU/CPUSTATE` payloads are per-register wire
/// formats that belong to the architecture backend, not to the note
/// parser (spec.md's "architecture-specific per-CPU register decoder").
pub trait CpuStateDecoder {
    /// Handle one `CORE/NT_PRSTATUS` note for CPU number `cpu`.
    fn process_prstatus(&mut self, cpu: u32, desc: &[u8]) -> Result<()>;

    /// Handle one `QEMU/CPUSTATE` note.
    fn process_qemu_cpustate(&mut self, desc: &[u8]) -> Result<()>;
}

/// A no-op decoder for callers that don't care about per-CPU register
/// state, only the attributes notes populate directly.
pub struct NullCpuStateDecoder;

impl CpuStateDecoder for NullCpuStateDecoder {
    fn process_prstatus(&mut self, _cpu: u32, _desc: &[u8]) -> Result<()> {
        Ok(())
    }

    fn process_qemu_cpustate(&mut self, _desc: &[u8]) -> Result<()> {
        Ok(())
    }
}

fn read_u32(buf: &[u8], order: ByteOrder) -> u32 {
    let b: [u8; 4] = buf[..4].try_into().unwrap();
    match order {
        ByteOrder::Little => u32::from_le_bytes(b),
        ByteOrder::Big => u32::from_be_bytes(b),
    }
}

fn read_u64(buf: &[u8], order: ByteOrder) -> u64 {
    let b: [u8; 8] = buf[..8].try_into().unwrap();
    match order {
        ByteOrder::Little => u64::from_le_bytes(b),
        ByteOrder::Big => u64::from_be_bytes(b),
    }
}

fn roundup4(n: usize) -> usize {
    (n + 3) & !3
}

/// One parsed note header plus its name and descriptor slices.
struct Note<'a> {
    n_type: u32,
    name: &'a [u8],
    desc: &'a [u8],
}

/// Name equality tolerating an optional trailing NUL (`note_equal`).
fn note_equal(name: &str, note_name: &[u8]) -> bool {
    let namelen = name.len();
    if note_name.len() != namelen && note_name.len() != namelen + 1 {
        return false;
    }
    &note_name[..namelen] == name.as_bytes()
}

/// Walk a concatenated-notes buffer, calling `f` on each well-formed
/// note and stopping silently at the first truncated tail (`do_notes`).
fn do_notes<'a>(data: &'a [u8], order: ByteOrder, mut f: impl FnMut(Note<'a>) -> Result<()>) -> Result<()> {
    let mut buf = data;
    const HDR: usize = 12;
    while buf.len() >= HDR {
        let namesz = read_u32(&buf[0..4], order) as usize;
        let descsz = read_u32(&buf[4..8], order) as usize;
        let n_type = read_u32(&buf[8..12], order);
        let name_off = HDR;
        let desc_off = name_off + roundup4(namesz);
        let total = desc_off + descsz;
        if buf.len() < total {
            break;
        }
        let name = &buf[name_off..name_off + namesz];
        let desc = &buf[desc_off..desc_off + descsz];
        f(Note { n_type, name, desc })?;
        let next = desc_off + roundup4(descsz);
        if next > buf.len() {
            break;
        }
        buf = &buf[next..];
    }
    Ok(())
}

const NT_PRSTATUS: u32 = 1;
const NT_TASKSTRUCT: u32 = 4;
const QEMU_ELFNOTE_CPUSTATE: u32 = 0;
const XEN_ELFNOTE_CRASH_INFO: u32 = 0x1000001;
const XEN_ELFNOTE_DUMPCORE_HEADER: u32 = 0x2000001;
const XEN_ELFNOTE_DUMPCORE_XEN_VERSION: u32 = 0x2000002;
const XEN_ELFNOTE_DUMPCORE_FORMAT_VERSION: u32 = 0x2000003;
const XEN_EXTRA_VERSION_SZ: usize = 16;

fn process_core_note(
    dict: &mut AttrDict,
    decoder: &mut dyn CpuStateDecoder,
    note_type: u32,
    desc: &[u8],
) -> Result<()> {
    if note_type == NT_PRSTATUS {
        let cpu = dict.try_get_number("linux.num_cpus").unwrap_or(0) as u32;
        dict.set("linux.num_cpus", AttrValue::Number((cpu + 1) as u64))?;
        decoder.process_prstatus(cpu, desc)?;
    } else if note_type == NT_TASKSTRUCT {
        dict.set_blob("linux.task_struct_raw", desc.to_vec())?;
    }
    Ok(())
}

fn process_qemu_note(decoder: &mut dyn CpuStateDecoder, note_type: u32, desc: &[u8]) -> Result<()> {
    if note_type == QEMU_ELFNOTE_CPUSTATE {
        decoder.process_qemu_cpustate(desc)?;
    }
    Ok(())
}

/// Decode `Xen/CRASH_INFO`: major/minor/extra version, and, when the
/// payload is long enough, a trailing `p2m_mfn` word and (x86_64 only)
/// a `xen_phys_start` field.
fn process_xen_crash_info(dict: &mut AttrDict, ptr_size: u8, order: ByteOrder, desc: &[u8]) -> Result<()> {
    let (major, minor, extra, rest): (u64, u64, u64, &[u8]);
    if ptr_size == 8 {
        const BASE: usize = 8 * 8; // xen_crash_info_64: 8 u64 fields
        if desc.len() < BASE {
            return Ok(());
        }
        major = read_u64(&desc[0..8], order);
        minor = read_u64(&desc[8..16], order);
        extra = read_u64(&desc[16..24], order);
        rest = &desc[BASE..];
    } else if ptr_size == 4 {
        const BASE: usize = 8 * 4; // xen_crash_info_32: 8 u32 fields
        if desc.len() < BASE {
            return Ok(());
        }
        major = read_u32(&desc[0..4], order) as u64;
        minor = read_u32(&desc[4..8], order) as u64;
        extra = read_u32(&desc[8..12], order) as u64;
        rest = &desc[BASE..];
    } else {
        return Ok(());
    }

    dict.set("xen.ver_major", AttrValue::Number(major))?;
    dict.set("xen.ver_minor", AttrValue::Number(minor))?;
    dict.set("xen.version_code", AttrValue::Number((major << 16) | minor))?;
    dict.set("xen.ver_extra_addr", AttrValue::Address(extra))?;

    // The trailing p2m_mfn word sits at the last word-aligned offset that
    // still fits entirely inside `desc` (notes.c: `(len - 8) & ~7UL`).
    if !rest.is_empty() {
        let word = if ptr_size == 8 { 8 } else { 4 };
        let tail_off = (desc.len() - word) & !(word - 1);
        let p = &desc[tail_off..tail_off + word];
        let p2m_mfn = if ptr_size == 8 {
            read_u64(p, order)
        } else {
            read_u32(p, order) as u64
        };
        dict.set("xen.xen_p2m_mfn", AttrValue::Address(p2m_mfn))?;

        // x86_64 struct adds xen_phys_start right after the base.
        if ptr_size == 8 && rest.len() >= 2 * word {
            let phys_start = read_u64(&rest[0..8], order);
            dict.set("xen.phys_start", AttrValue::Address(phys_start))?;
        }
    }

    Ok(())
}

fn process_xen_dumpcore_version(dict: &mut AttrDict, ptr_size: u8, order: ByteOrder, desc: &[u8]) -> Result<()> {
    let word = if ptr_size == 8 { 8 } else { 4 };
    if desc.len() < 2 * word + XEN_EXTRA_VERSION_SZ {
        return Ok(());
    }
    let (major, minor) = if ptr_size == 8 {
        (read_u64(&desc[0..8], order), read_u64(&desc[8..16], order))
    } else {
        (
            read_u32(&desc[0..4], order) as u64,
            read_u32(&desc[4..8], order) as u64,
        )
    };
    let extra_off = 2 * word;
    let extra_bytes = &desc[extra_off..extra_off + XEN_EXTRA_VERSION_SZ];
    let nul = extra_bytes.iter().position(|&b| b == 0).unwrap_or(extra_bytes.len());
    let extra = String::from_utf8_lossy(&extra_bytes[..nul]).into_owned();

    dict.set("xen.ver_major", AttrValue::Number(major))?;
    dict.set("xen.ver_minor", AttrValue::Number(minor))?;
    dict.set("xen.ver_extra", AttrValue::String(extra.into()))?;
    Ok(())
}

fn process_xen_note(dict: &mut AttrDict, ptr_size: u8, order: ByteOrder, note_type: u32, desc: &[u8]) -> Result<()> {
    if note_type == XEN_ELFNOTE_CRASH_INFO {
        process_xen_crash_info(dict, ptr_size, order, desc)
    } else if note_type == XEN_ELFNOTE_DUMPCORE_XEN_VERSION {
        process_xen_dumpcore_version(dict, ptr_size, order, desc)
    } else {
        Ok(())
    }
}

fn process_xc_xen_note(dict: &mut AttrDict, order: ByteOrder, note_type: u32, desc: &[u8]) -> Result<()> {
    if note_type == XEN_ELFNOTE_DUMPCORE_HEADER {
        if desc.len() < 32 {
            return Ok(());
        }
        let page_size = read_u64(&desc[24..32], order);
        dict.set("arch.page_size", AttrValue::Number(page_size))?;
    } else if note_type == XEN_ELFNOTE_DUMPCORE_FORMAT_VERSION {
        if desc.len() < 8 {
            return Ok(());
        }
        let version = read_u64(&desc[0..8], order);
        if version != 1 {
            return Err(Error::not_implemented(format!(
                "unsupported Xen dumpcore format version: {version}"
            )));
        }
    }
    Ok(())
}

fn do_noarch_note(dict: &mut AttrDict, note: &Note) -> Result<()> {
    if note_equal("VMCOREINFO", note.name) {
        dict.set_blob("linux.vmcoreinfo_raw", note.desc.to_vec())?;
    } else if note_equal("VMCOREINFO_XEN", note.name) {
        dict.set_blob("xen.vmcoreinfo_raw", note.desc.to_vec())?;
    } else if note_equal("ERASEINFO", note.name) {
        dict.set_blob("file.eraseinfo_raw", note.desc.to_vec())?;
    }
    Ok(())
}

fn do_arch_note(
    dict: &mut AttrDict,
    decoder: &mut dyn CpuStateDecoder,
    ptr_size: u8,
    order: ByteOrder,
    note: &Note,
) -> Result<()> {
    if note_equal("CORE", note.name) {
        process_core_note(dict, decoder, note.n_type, note.desc)
    } else if note_equal("QEMU", note.name) {
        process_qemu_note(decoder, note.n_type, note.desc)
    } else if note_equal("Xen", note.name) {
        process_xen_note(dict, ptr_size, order, note.n_type, note.desc)
    } else if note_equal(".note.Xen", note.name) {
        process_xc_xen_note(dict, order, note.n_type, note.desc)
    } else {
        Ok(())
    }
}

/// Process every note in `data`, routing architecture-neutral producers
/// (`VMCOREINFO`, `ERASEINFO`, ...) to the dictionary and
/// architecture-specific ones (`CORE`, `QEMU`, `Xen`, `.note.Xen`) to
/// both the dictionary and `decoder` (spec §4.D).
pub fn process_notes(
    dict: &mut AttrDict,
    decoder: &mut dyn CpuStateDecoder,
    ptr_size: u8,
    order: ByteOrder,
    data: &[u8],
) -> Result<()> {
    do_notes(data, order, |note| {
        do_noarch_note(dict, &note)?;
        do_arch_note(dict, decoder, ptr_size, order, &note)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::declare_well_known;

    fn build_note(name: &str, n_type: u32, desc: &[u8]) -> Vec<u8> {
        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        let namesz = name_bytes.len() as u32;
        let descsz = desc.len() as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&namesz.to_le_bytes());
        buf.extend_from_slice(&descsz.to_le_bytes());
        buf.extend_from_slice(&n_type.to_le_bytes());
        buf.extend_from_slice(&name_bytes);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
        buf.extend_from_slice(desc);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
        buf
    }

    #[test]
    fn vmcoreinfo_note_becomes_blob_attr() {
        let mut dict = AttrDict::new();
        declare_well_known(&mut dict);
        let payload: &[u8] = b"OSRELEASE=6.1.0\n";
        let data = build_note("VMCOREINFO", 0, payload);
        process_notes(&mut dict, &mut NullCpuStateDecoder, 8, ByteOrder::Little, &data).unwrap();
        assert_eq!(dict.get_blob("linux.vmcoreinfo_raw").unwrap().as_slice(), payload);
    }

    #[test]
    fn truncated_tail_is_tolerated_silently() {
        let mut dict = AttrDict::new();
        declare_well_known(&mut dict);
        let mut data = build_note("VMCOREINFO", 0, b"abcd");
        data.truncate(data.len() - 2); // chop the descriptor short
        assert!(process_notes(&mut dict, &mut NullCpuStateDecoder, 8, ByteOrder::Little, &data).is_ok());
        assert!(dict.get_blob("linux.vmcoreinfo_raw").is_err());
    }

    #[test]
    fn prstatus_increments_cpu_count_and_reaches_decoder() {
        struct CountingDecoder(u32);
        impl CpuStateDecoder for CountingDecoder {
            fn process_prstatus(&mut self, cpu: u32, _desc: &[u8]) -> Result<()> {
                assert_eq!(cpu, self.0);
                self.0 += 1;
                Ok(())
            }
            fn process_qemu_cpustate(&mut self, _desc: &[u8]) -> Result<()> {
                Ok(())
            }
        }

        let mut dict = AttrDict::new();
        declare_well_known(&mut dict);
        let mut decoder = CountingDecoder(0);
        let mut data = build_note("CORE", NT_PRSTATUS, &[0u8; 16]);
        data.extend(build_note("CORE", NT_PRSTATUS, &[0u8; 16]));
        process_notes(&mut dict, &mut decoder, 8, ByteOrder::Little, &data).unwrap();
        assert_eq!(decoder.0, 2);
        assert_eq!(dict.get_number("linux.num_cpus").unwrap(), 2);
    }

    #[test]
    fn xen_dumpcore_format_version_mismatch_is_not_implemented() {
        let mut dict = AttrDict::new();
        declare_well_known(&mut dict);
        let data = build_note(".note.Xen", XEN_ELFNOTE_DUMPCORE_FORMAT_VERSION, &2u64.to_le_bytes());
        let err = process_notes(&mut dict, &mut NullCpuStateDecoder, 8, ByteOrder::Little, &data).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn note_name_matches_with_or_without_trailing_nul() {
        assert!(note_equal("CORE", b"CORE\0"));
        assert!(note_equal("CORE", b"CORE"));
        assert!(!note_equal("CORE", b"COREX"));
    }
}
