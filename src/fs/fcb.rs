//! FCB-style 8.3 names.
//!
//! An FCB name is exactly 11 bytes: 8 for the base name and 3 for the
//! extension, upper-cased and space-padded (`"FILE0001TXT"`). It is the
//! canonical form used to compare DOS names with host names and to match
//! search masks, where `?` stands for any character.

use std::fmt;

pub const FCB_NAME_LEN: usize = 11;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FcbName([u8; FCB_NAME_LEN]);

impl FcbName {
    pub const fn from_bytes(bytes: [u8; FCB_NAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Encode a file name (host or DOS) into its FCB form.
    ///
    /// Leading dots are kept verbatim so `.` and `..` survive. The base name
    /// takes up to 8 characters up to the first dot, skipping embedded
    /// spaces; the extension takes up to 3 characters after the last dot.
    pub fn encode(name: &[u8]) -> Self {
        let mut out = [b' '; FCB_NAME_LEN];

        let dots = name.iter().take(8).take_while(|&&c| c == b'.').count();
        out[..dots].fill(b'.');

        let mut i = dots;
        let mut j = dots;
        while i < 8 {
            while name.get(j) == Some(&b' ') {
                j += 1;
            }
            match name.get(j) {
                None | Some(b'.') => break,
                Some(&c) => out[i] = c.to_ascii_uppercase(),
            }
            i += 1;
            j += 1;
        }

        let rest = &name[dots..];
        if let Some(pos) = rest.iter().rposition(|&c| c == b'.') {
            let ext = rest[pos + 1..]
                .iter()
                .take_while(|&&c| c != b'.' && c != b' ')
                .take(3);
            for (slot, &c) in out[8..].iter_mut().zip(ext) {
                *slot = c.to_ascii_uppercase();
            }
        }

        Self(out)
    }

    /// Match `name` against this mask: case-insensitive, `?` matches anything.
    pub fn matches(&self, name: &FcbName) -> bool {
        self.0
            .iter()
            .zip(name.0.iter())
            .all(|(&m, &n)| m == b'?' || m.to_ascii_uppercase() == n.to_ascii_uppercase())
    }

    pub fn has_wildcards(&self) -> bool {
        self.0.contains(&b'?')
    }

    pub fn as_bytes(&self) -> &[u8; FCB_NAME_LEN] {
        &self.0
    }

    pub fn first(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Debug for FcbName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FcbName(\"{}\")", self)
    }
}

impl fmt::Display for FcbName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if (b' '..=b'~').contains(&b) { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
