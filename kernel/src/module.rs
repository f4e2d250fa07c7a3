//! Boot-module loader.
//!
//! The bootloader can hand the kernel auxiliary images alongside the
//! kernel proper. Each module is a small container: a fixed header with a
//! magic, a name, a format version, a type tag and the payload size; then
//! the payload; then a trailing CRC-32 over header plus payload. A module
//! that fails any structural or checksum test is rejected and logged, and
//! boot continues without it.
//!
//! The one payload type the kernel understands is `DEBUG_SYMBOLS`: a
//! sorted address/name table the panic path uses to put names on raw
//! return addresses.

#[cfg(feature = "alloc")]
extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use crate::crypto::crc32;

/// Container magic ("OSPP" little-endian).
pub const MODULE_MAGIC: u32 = 0x4F53_5050;

/// Container format version this loader accepts.
pub const MODULE_VERSION: u8 = 1;

/// Fixed header size: magic + 32-byte name + version + type + payload size.
pub const HEADER_SIZE: usize = 4 + 32 + 1 + 1 + 4;

/// Bytes of the trailing checksum.
const CRC_SIZE: usize = 4;

/// Payload type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleType {
    DebugSymbols = 0,
}

/// Why a module image was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleError {
    InvalidMagic,
    UnsupportedVersion,
    InvalidCrc,
    InvalidSize,
    AllocationFailed,
}

/// Decoded fixed header.
struct ModuleHeader {
    name: [u8; 32],
    version: u8,
    type_tag: u8,
    data_size: u32,
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

impl ModuleHeader {
    fn parse(bytes: &[u8]) -> Option<(Self, u32)> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let magic = read_u32(bytes, 0);
        let mut name = [0u8; 32];
        name.copy_from_slice(&bytes[4..36]);
        Some((
            Self {
                name,
                version: bytes[36],
                type_tag: bytes[37],
                data_size: read_u32(bytes, 38),
            },
            magic,
        ))
    }

    fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(32);
        core::str::from_utf8(&self.name[..end]).unwrap_or("<non-utf8>")
    }
}

// ---------------------------------------------------------------------------
// Debug symbols payload
// ---------------------------------------------------------------------------

/// Parsed `DEBUG_SYMBOLS` payload: `{count, strtab_offset}` then `count`
/// `{address, name_offset}` records, then a NUL-separated string table.
pub struct DebugSymbolsModule {
    data: Vec<u8>,
    count: usize,
    strtab_offset: usize,
}

/// A symbol never covers more than this many bytes; lookups farther from
/// the nearest address return nothing.
const SYMBOL_SPAN_LIMIT: u32 = 0x1000;

impl DebugSymbolsModule {
    const RECORD_SIZE: usize = 8;
    const PAYLOAD_HEADER: usize = 8;

    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::PAYLOAD_HEADER {
            return None;
        }
        let count = read_u32(payload, 0) as usize;
        let strtab_offset = read_u32(payload, 4) as usize;

        let table_end = Self::PAYLOAD_HEADER + count.checked_mul(Self::RECORD_SIZE)?;
        if table_end > payload.len() || strtab_offset > payload.len() {
            return None;
        }

        Some(Self {
            data: payload.to_vec(),
            count,
            strtab_offset,
        })
    }

    pub fn symbol_count(&self) -> usize {
        self.count
    }

    fn record(&self, index: usize) -> (u32, u32) {
        let at = Self::PAYLOAD_HEADER + index * Self::RECORD_SIZE;
        (read_u32(&self.data, at), read_u32(&self.data, at + 4))
    }

    /// The symbol covering `address`: the nearest record at or below it,
    /// within [`SYMBOL_SPAN_LIMIT`].
    pub fn nearest_symbol(&self, address: u32) -> Option<(u32, u32)> {
        let mut nearest: Option<(u32, u32)> = None;
        let mut nearest_distance = u32::MAX;

        for index in 0..self.count {
            let (sym_addr, name_offset) = self.record(index);
            let distance = address.wrapping_sub(sym_addr);
            if distance < nearest_distance {
                nearest_distance = distance;
                nearest = Some((sym_addr, name_offset));
            }
        }

        if nearest_distance > SYMBOL_SPAN_LIMIT {
            return None;
        }
        nearest
    }

    /// Name of the symbol covering `address`.
    pub fn lookup_symbol(&self, address: u32) -> Option<&str> {
        let (_, name_offset) = self.nearest_symbol(address)?;
        let start = self.strtab_offset.checked_add(name_offset as usize)?;
        let strtab = self.data.get(start..)?;
        let end = strtab.iter().position(|&b| b == 0)?;
        core::str::from_utf8(&strtab[..end]).ok()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

enum ModulePayload {
    DebugSymbols(DebugSymbolsModule),
}

struct LoadedModule {
    name: [u8; 32],
    payload: ModulePayload,
}

static MODULES: Mutex<Vec<LoadedModule>> = Mutex::new(Vec::new());

/// Validate and register one module image.
pub fn load(bytes: &[u8]) -> Result<(), ModuleError> {
    if bytes.len() < HEADER_SIZE + CRC_SIZE {
        return Err(ModuleError::InvalidSize);
    }

    let (header, magic) = ModuleHeader::parse(bytes).ok_or(ModuleError::InvalidSize)?;

    if magic != MODULE_MAGIC {
        log::warn!("module rejected: bad magic {magic:#010x}");
        return Err(ModuleError::InvalidMagic);
    }
    if header.version != MODULE_VERSION {
        log::warn!("module rejected: unsupported version {}", header.version);
        return Err(ModuleError::UnsupportedVersion);
    }

    let data_size = header.data_size as usize;
    let expected_size = HEADER_SIZE + data_size + CRC_SIZE;
    if bytes.len() < expected_size {
        log::warn!(
            "module rejected: buffer holds {} bytes, container claims {}",
            bytes.len(),
            expected_size
        );
        return Err(ModuleError::InvalidSize);
    }

    let covered = &bytes[..HEADER_SIZE + data_size];
    let stored_crc = read_u32(bytes, HEADER_SIZE + data_size);
    let actual_crc = crc32(covered, 0xFFFF_FFFF);
    if stored_crc != actual_crc {
        log::warn!(
            "module rejected: CRC {actual_crc:#010x} does not match stored {stored_crc:#010x}"
        );
        return Err(ModuleError::InvalidCrc);
    }

    let payload_bytes = &bytes[HEADER_SIZE..HEADER_SIZE + data_size];
    let payload = match header.type_tag {
        t if t == ModuleType::DebugSymbols as u8 => DebugSymbolsModule::parse(payload_bytes)
            .map(ModulePayload::DebugSymbols)
            .ok_or(ModuleError::InvalidSize)?,
        other => {
            log::warn!("module rejected: no loader for type {other}");
            return Err(ModuleError::AllocationFailed);
        }
    };

    log::info!("module loaded: {}", header.name_str());
    MODULES.lock().push(LoadedModule {
        name: header.name,
        payload,
    });
    Ok(())
}

/// Load every Multiboot module the bootloader provided.
#[cfg(target_os = "none")]
pub fn load_boot_modules(boot: &crate::mm::bootloader::BootInfo) {
    let modules = boot.modules();
    if modules.is_empty() {
        log::info!("no boot modules");
        return;
    }

    for entry in modules {
        if let Err(err) = load(entry.bytes()) {
            log::warn!(
                "boot module at {:#010x} rejected: {err:?}",
                entry.mod_start
            );
        }
    }
}

fn name_matches(stored: &[u8; 32], wanted: &str) -> bool {
    let end = stored.iter().position(|&b| b == 0).unwrap_or(32);
    &stored[..end] == wanted.as_bytes()
}

/// Run `f` against the loaded debug-symbols module, if any.
///
/// The conventional module name is `"debug"`.
pub fn debug_symbols<R>(f: impl FnOnce(&DebugSymbolsModule) -> R) -> Option<R> {
    let modules = MODULES.lock();
    for module in modules.iter() {
        if name_matches(&module.name, "debug") {
            let ModulePayload::DebugSymbols(ref symbols) = module.payload;
            return Some(f(symbols));
        }
    }
    None
}

/// Number of modules accepted so far.
pub fn module_count() -> usize {
    MODULES.lock().len()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a well-formed module image around `payload`.
    pub(crate) fn build_module(name: &str, type_tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MODULE_MAGIC.to_le_bytes());
        let mut name_field = [0u8; 32];
        name_field[..name.len()].copy_from_slice(name.as_bytes());
        bytes.extend_from_slice(&name_field);
        bytes.push(MODULE_VERSION);
        bytes.push(type_tag);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(payload);

        let crc = crc32(&bytes, 0xFFFF_FFFF);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// A debug-symbols payload with the given (address, name) pairs.
    pub(crate) fn build_symbols(symbols: &[(u32, &str)]) -> Vec<u8> {
        let mut strtab = Vec::new();
        let mut records = Vec::new();
        for (address, name) in symbols {
            records.push((*address, strtab.len() as u32));
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }

        let strtab_offset = 8 + records.len() * 8;
        let mut payload = Vec::new();
        payload.extend_from_slice(&(records.len() as u32).to_le_bytes());
        payload.extend_from_slice(&(strtab_offset as u32).to_le_bytes());
        for (address, name_offset) in records {
            payload.extend_from_slice(&address.to_le_bytes());
            payload.extend_from_slice(&name_offset.to_le_bytes());
        }
        payload.extend_from_slice(&strtab);
        payload
    }

    #[test]
    fn valid_module_loads() {
        let image = build_module("selftest-ok", 0, &build_symbols(&[(0x10_0000, "start")]));
        assert_eq!(load(&image), Ok(()));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut image = build_module("m", 0, &build_symbols(&[]));
        image[0] ^= 0xFF;
        assert_eq!(load(&image), Err(ModuleError::InvalidMagic));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut image = build_module("m", 0, &build_symbols(&[]));
        image[36] = 9;
        // Recompute the CRC so only the version is wrong.
        let body_len = image.len() - 4;
        let crc = crc32(&image[..body_len], 0xFFFF_FFFF);
        image[body_len..].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(load(&image), Err(ModuleError::UnsupportedVersion));
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut image = build_module("m", 0, &build_symbols(&[(0x1000, "f")]));
        let tampered = image.len() - 8;
        image[tampered] ^= 0x01;
        assert_eq!(load(&image), Err(ModuleError::InvalidCrc));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let image = build_module("m", 0, &build_symbols(&[(0x1000, "f")]));
        assert_eq!(load(&image[..image.len() - 5]), Err(ModuleError::InvalidSize));
        assert_eq!(load(&image[..10]), Err(ModuleError::InvalidSize));
    }

    #[test]
    fn unknown_type_has_no_loader() {
        let image = build_module("m", 7, &[1, 2, 3]);
        assert_eq!(load(&image), Err(ModuleError::AllocationFailed));
    }

    #[test]
    fn symbol_lookup_nearest_below() {
        let payload = build_symbols(&[
            (0x10_0000, "kernel_early_main"),
            (0x10_0800, "idt_init"),
            (0x10_1000, "schedule"),
        ]);
        let symbols = DebugSymbolsModule::parse(&payload).unwrap();

        assert_eq!(symbols.symbol_count(), 3);
        assert_eq!(symbols.lookup_symbol(0x10_0000), Some("kernel_early_main"));
        assert_eq!(symbols.lookup_symbol(0x10_0810), Some("idt_init"));
        assert_eq!(symbols.lookup_symbol(0x10_1FFF), Some("schedule"));
        // Beyond the span limit of the last symbol.
        assert_eq!(symbols.lookup_symbol(0x10_3000), None);
        // Below every symbol.
        assert_eq!(symbols.lookup_symbol(0x0F_0000), None);
    }
}
