/// Interned Lua byte strings.
///
/// Lua strings are byte sequences, not UTF-8. Every string handed to the
/// interner is deduplicated, so two `StringId`s are equal exactly when their
/// bytes are equal. Constant-pool and identifier comparison elsewhere in the
/// compiler relies on this.
use std::collections::HashMap;
use std::fmt;

/// Seed for the string hash. PUC Lua derives this from the address of a
/// global at startup; a compile-only pipeline has no reason to randomize.
const HASH_SEED: u32 = 0x2c09_5175;

/// An opaque handle to an interned string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StringId(pub u32);

/// An interned byte string with its precomputed hash.
pub struct LuaStr {
    bytes: Box<[u8]>,
    hash: u32,
}

impl LuaStr {
    fn new(bytes: &[u8]) -> Self {
        LuaStr {
            bytes: bytes.into(),
            hash: lua_hash(bytes, HASH_SEED),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

impl fmt::Debug for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = std::str::from_utf8(&self.bytes) {
            write!(f, "\"{s}\"")
        } else {
            write!(f, "<binary string len={}>", self.bytes.len())
        }
    }
}

/// The `luaS_hash` algorithm from PUC Lua 5.3: seeded, and sampling at most
/// 32 bytes of long strings.
pub fn lua_hash(bytes: &[u8], seed: u32) -> u32 {
    let len = bytes.len();
    let mut h = seed ^ (len as u32);
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5)
            .wrapping_add(h >> 2)
            .wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

/// Owns every string seen by a compilation and deduplicates all of them.
pub struct StringInterner {
    strings: Vec<LuaStr>,
    /// hash → candidate ids (collisions resolved by byte comparison).
    lookup: HashMap<u32, Vec<u32>>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            strings: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Intern `bytes`, returning the existing id when the same bytes were
    /// seen before.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let hash = lua_hash(bytes, HASH_SEED);
        if let Some(ids) = self.lookup.get(&hash) {
            for &id in ids {
                if self.strings[id as usize].as_bytes() == bytes {
                    return StringId(id);
                }
            }
        }
        let id = self.strings.len() as u32;
        self.strings.push(LuaStr::new(bytes));
        self.lookup.entry(hash).or_default().push(id);
        StringId(id)
    }

    pub fn get(&self, id: StringId) -> &LuaStr {
        &self.strings[id.0 as usize]
    }

    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        self.strings[id.0 as usize].as_bytes()
    }

    /// Lossy UTF-8 view of a string, for error messages and disassembly.
    pub fn display(&self, id: StringId) -> String {
        String::from_utf8_lossy(self.get_bytes(id)).into_owned()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
