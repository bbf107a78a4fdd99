use std::collections::{BTreeMap, HashMap};

use acq_types::Coords;

/// In-memory index from coordinates to where a backend keeps each plane.
///
/// `L` is the backend's location type (a file offset, a path). The index
/// also tracks the largest position seen per axis, which is all the
/// `Storage` shape queries need.
#[derive(Clone, Debug)]
pub struct PlaneIndex<L> {
    /// Keyed by position; the value keeps the caller's own `Coords` so
    /// terminal-axis markers survive.
    entries: HashMap<Coords, (Coords, L)>,
    max_indices: BTreeMap<String, u32>,
}

impl<L> PlaneIndex<L> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            max_indices: BTreeMap::new(),
        }
    }

    /// Record a plane. Returns `false` (and changes nothing) if the
    /// coordinate is already indexed.
    pub fn insert(&mut self, coords: Coords, location: L) -> bool {
        if self.entries.contains_key(&coords) {
            return false;
        }
        for (axis, pos) in coords.iter() {
            let max = self.max_indices.entry(axis.to_string()).or_insert(pos);
            *max = (*max).max(pos);
        }
        self.entries.insert(coords.clone(), (coords, location));
        true
    }

    pub fn get(&self, coords: &Coords) -> Option<&L> {
        self.entries.get(coords).map(|(_, loc)| loc)
    }

    pub fn contains(&self, coords: &Coords) -> bool {
        self.entries.contains_key(coords)
    }

    /// Any one location, if the index is non-empty.
    pub fn any(&self) -> Option<&L> {
        self.entries.values().next().map(|(_, loc)| loc)
    }

    /// Locations of every plane matching `partial`.
    pub fn matching(&self, partial: &Coords) -> Vec<&L> {
        self.entries
            .values()
            .filter(|(coords, _)| coords.matches(partial))
            .map(|(_, loc)| loc)
            .collect()
    }

    /// Every indexed coordinate, unordered.
    pub fn coords(&self) -> Vec<Coords> {
        self.entries.values().map(|(coords, _)| coords.clone()).collect()
    }

    pub fn max_index(&self, axis: &str) -> Option<u32> {
        self.max_indices.get(axis).copied()
    }

    pub fn max_indices(&self) -> Coords {
        self.max_indices
            .iter()
            .fold(Coords::builder(), |b, (axis, &max)| b.index(axis.clone(), max))
            .build()
    }

    pub fn axes(&self) -> Vec<String> {
        self.max_indices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L> Default for PlaneIndex<L> {
    fn default() -> Self {
        Self::new()
    }
}
