//! Fixed-capacity connection table.
//!
//! Slot indices are stable for the lifetime of a connection and are reused
//! once vacated, lowest first. A slot may be *reserved*: empty, but not
//! handed out, so the device can come back to the same index.

use std::net::TcpStream;

use super::framer::LineFramer;

#[derive(Debug)]
enum Entry<T> {
    Vacant,
    Reserved,
    Occupied(T),
}

#[derive(Debug)]
pub struct SlotTable<T> {
    entries: Vec<Entry<T>>,
}

impl<T> SlotTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| Entry::Vacant).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Place `item` in the first vacant slot. Hands it back when the table is full.
    pub fn add(&mut self, item: T) -> Result<usize, T> {
        match self
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Vacant))
        {
            Some(idx) => {
                self.entries[idx] = Entry::Occupied(item);
                Ok(idx)
            }
            None => Err(item),
        }
    }

    pub fn remove(&mut self, idx: usize) -> Option<T> {
        self.take(idx, Entry::Vacant)
    }

    /// Empty the slot but keep the index out of circulation.
    pub fn reserve(&mut self, idx: usize) -> Option<T> {
        self.take(idx, Entry::Reserved)
    }

    /// Fill a reserved slot again.
    pub fn restore(&mut self, idx: usize, item: T) -> Result<(), T> {
        match self.entries.get_mut(idx) {
            Some(entry @ Entry::Reserved) => {
                *entry = Entry::Occupied(item);
                Ok(())
            }
            _ => Err(item),
        }
    }

    fn take(&mut self, idx: usize, replacement: Entry<T>) -> Option<T> {
        let entry = self.entries.get_mut(idx)?;
        if !matches!(entry, Entry::Occupied(_)) {
            return None;
        }
        match std::mem::replace(entry, replacement) {
            Entry::Occupied(item) => Some(item),
            _ => None,
        }
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        match self.entries.get(idx) {
            Some(Entry::Occupied(item)) => Some(item),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        match self.entries.get_mut(idx) {
            Some(Entry::Occupied(item)) => Some(item),
            _ => None,
        }
    }

    /// Occupied slots in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| match e {
            Entry::Occupied(item) => Some((i, item)),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| match e {
                Entry::Occupied(item) => Some((i, item)),
                _ => None,
            })
    }

    pub fn occupied(&self) -> usize {
        self.iter().count()
    }
}

/// A connected client or gateway.
pub struct Client {
    pub stream: TcpStream,
    pub peer: String,
    /// Client asked for `ACK:` echoes with `REQ: ACK`.
    pub ack: bool,
    pub framer: LineFramer,
}

impl Client {
    pub fn new(stream: TcpStream, peer: String) -> Self {
        Self {
            stream,
            peer,
            ack: false,
            framer: LineFramer::new(),
        }
    }
}
