//! File identifier table.
//!
//! DOS clients refer to open files and to directories being enumerated by a
//! 16-bit identifier. The server keeps no other per-file state: an
//! identifier is just a host path, a last-used timestamp and, for
//! directories, the listing captured by the current enumeration pass.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::attrs::{attr, item_attr, item_attr_named, FileProps};
use super::fcb::FcbName;

/// Sentinel for "no identifier". Never allocated.
pub const NO_ITEM: u16 = 0xFFFF;

/// Largest table the 16-bit identifier space allows.
pub const MAX_ITEMS: usize = 0xFFFF;

/// Identifiers idle for longer than this are reclaimed.
pub const ITEM_TTL_SECS: i64 = 3600;

#[derive(Debug)]
struct Item {
    path: PathBuf,
    last_used: DateTime<Utc>,
    listing: Option<Vec<FileProps>>,
}

pub struct ItemTable {
    slots: Vec<Option<Item>>,
    capacity: usize,
}

impl Default for ItemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ITEMS)
    }

    /// A table that never hands out more than `capacity` identifiers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity: capacity.clamp(1, MAX_ITEMS),
        }
    }

    /// Number of live identifiers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifier for `path`, allocating one if needed.
    pub fn get_id(&mut self, path: &Path) -> u16 {
        self.get_id_at(path, Utc::now())
    }

    /// [`get_id`](Self::get_id) with an explicit clock.
    pub fn get_id_at(&mut self, path: &Path, now: DateTime<Utc>) -> u16 {
        let ttl = Duration::seconds(ITEM_TTL_SECS);
        let mut free: Option<usize> = None;
        let mut oldest: Option<(usize, DateTime<Utc>)> = None;

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(item) = slot else {
                free.get_or_insert(idx);
                continue;
            };
            if item.path == path {
                item.last_used = now;
                return idx as u16;
            }
            if now - item.last_used > ttl {
                debug!("evict_item(id={}, path={})", idx, item.path.display());
                *slot = None;
                free.get_or_insert(idx);
                continue;
            }
            if oldest.map_or(true, |(_, t)| item.last_used < t) {
                oldest = Some((idx, item.last_used));
            }
        }

        let idx = match free {
            Some(idx) => idx,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => match oldest {
                Some((idx, _)) => {
                    warn!("Identifier table full, evicting id {}", idx);
                    idx
                }
                None => return NO_ITEM,
            },
        };

        self.slots[idx] = Some(Item {
            path: path.to_path_buf(),
            last_used: now,
            listing: None,
        });
        idx as u16
    }

    /// Host path behind `id`.
    pub fn path(&self, id: u16) -> Option<&Path> {
        self.item(id).map(|item| item.path.as_path())
    }

    /// Mark `id` as used now.
    pub fn touch(&mut self, id: u16) {
        if let Some(item) = self.item_mut(id) {
            item.last_used = Utc::now();
        }
    }

    /// Next entry of the directory behind `id` that matches `mask` and `max_attr`.
    ///
    /// `cursor` is the 1-based position of the previous match (0 restarts the
    /// enumeration and rebuilds the listing). On a match it is advanced to the
    /// position of the returned entry. `in_root` hides dot-entries, which do
    /// not exist in a DOS drive root.
    pub fn find(
        &mut self,
        id: u16,
        mask: &FcbName,
        max_attr: u8,
        cursor: &mut u16,
        in_root: bool,
        dos_attrs: bool,
    ) -> Option<FileProps> {
        let item = self.item_mut(id)?;
        item.last_used = Utc::now();

        if *cursor == 0 || item.listing.is_none() {
            item.listing = read_listing(&item.path, dos_attrs);
        }
        let listing = item.listing.as_deref()?;

        let start = *cursor as usize;
        for (pos, entry) in listing.iter().enumerate().skip(start) {
            if in_root && entry.name.first() == b'.' {
                continue;
            }
            if !mask.matches(&entry.name) || !attr_matches(max_attr, entry.attr) {
                continue;
            }
            *cursor = (pos + 1) as u16;
            return Some(*entry);
        }
        None
    }

    fn item(&self, id: u16) -> Option<&Item> {
        self.slots.get(id as usize)?.as_ref()
    }

    fn item_mut(&mut self, id: u16) -> Option<&mut Item> {
        self.slots.get_mut(id as usize)?.as_mut()
    }
}

/// Attribute filter of FINDFIRST/FINDNEXT.
///
/// A request for exactly VOLUME only returns volume labels. Otherwise the
/// hidden, system and directory bits of an entry must all be requested.
fn attr_matches(max_attr: u8, entry_attr: u8) -> bool {
    const FILTERED: u8 = attr::HIDDEN | attr::SYSTEM | attr::DIRECTORY;
    if max_attr == attr::VOLUME {
        return entry_attr & attr::VOLUME != 0;
    }
    max_attr | (entry_attr & FILTERED) == max_attr
}

/// `.` and `..` followed by everything the host reports, in host order.
/// `None` when `dir` cannot be listed.
fn read_listing(dir: &Path, dos_attrs: bool) -> Option<Vec<FileProps>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("read_listing(dir={}) failed: {}", dir.display(), e);
            return None;
        }
    };

    let mut listing = Vec::new();
    let parent = dir.parent().unwrap_or(dir);
    for (path, name) in [(dir, &b"."[..]), (parent, &b".."[..])] {
        if let Ok(props) = item_attr_named(path, name, dos_attrs) {
            listing.push(props);
        }
    }
    for entry in entries.flatten() {
        match item_attr(&entry.path(), dos_attrs) {
            Ok(props) => listing.push(props),
            Err(e) => debug!("skip {}: {}", entry.path().display(), e),
        }
    }
    debug!("read_listing(dir={}) -> {} entries", dir.display(), listing.len());
    Some(listing)
}
