//! CPIO archive lookup (SPEC_FULL.md §4.8 step "CPIO-archive lookup-by-name"),
//! grounded on `original_source/sos/src/main.c`'s `cpio_get_file(_cpio_archive,
//! cpio_len, app_name, &elf_size)` and parsed with `hadris_cpio`/`hadris_io`
//! the way `asterism-labs-hadron`'s `fs/initramfs.rs` unpacks its own CPIO
//! "newc" archive in `no_std`.

use alloc::vec;
use alloc::vec::Vec;
use hadris_cpio::CpioReader;
use hadris_io::Cursor;

/// Find `name` in a CPIO "newc" archive and return its file data, or `None`
/// if no entry with that name exists. The root `.` entry and directory
/// entries are skipped, matching the subset of the format a static ELF
/// initramfs actually needs.
pub fn lookup(archive: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut reader = CpioReader::new(Cursor::new(archive));
    let mut name_buf = [0u8; 256];

    loop {
        let entry = reader.next_entry_with_buf(&mut name_buf).ok()??;
        let entry_name = entry.name_str().unwrap_or("");
        let entry_name = entry_name.strip_prefix('/').unwrap_or(entry_name);

        if entry_name != name {
            reader.skip_entry_data(&entry).ok()?;
            continue;
        }

        let size = entry.file_size() as usize;
        let mut data = vec![0u8; size];
        reader.read_entry_data(&entry, &mut data).ok()?;
        return Some(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-build a minimal CPIO "newc" archive containing one regular file
    /// and a trailing `TRAILER!!!` entry, the way `mkcpio`/`cpio -o` would
    /// for a single-file initramfs.
    fn build_archive(name: &str, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        push_entry(&mut out, name, data, 0o100644);
        push_entry(&mut out, "TRAILER!!!", &[], 0);
        out
    }

    fn push_entry(out: &mut Vec<u8>, name: &str, data: &[u8], mode: u32) {
        let namesize = name.len() + 1;
        let header = alloc::format!(
            "070701{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
            0u32,
            mode,
            0u32,
            0u32,
            1u32,
            0u32,
            data.len() as u32,
            0u32,
            0u32,
            0u32,
            0u32,
            namesize as u32,
            0u32,
        );
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        pad_to_4(out);
        out.extend_from_slice(data);
        pad_to_4(out);
    }

    fn pad_to_4(out: &mut Vec<u8>) {
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    #[test]
    fn finds_a_named_entry() {
        let archive = build_archive("init", b"hello world");
        let found = lookup(&archive, "init").unwrap();
        assert_eq!(found, b"hello world");
    }

    #[test]
    fn missing_entry_returns_none() {
        let archive = build_archive("init", b"hello world");
        assert!(lookup(&archive, "no-such-app").is_none());
    }

    #[test]
    fn leading_slash_in_archive_name_is_stripped() {
        let archive = build_archive("/init", b"x");
        assert!(lookup(&archive, "init").is_some());
    }
}
