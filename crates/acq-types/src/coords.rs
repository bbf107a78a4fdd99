use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Axis for time points.
pub const TIME: &str = "time";
/// Axis for channels.
pub const CHANNEL: &str = "channel";
/// Axis for z-slices.
pub const Z: &str = "z";
/// Axis for stage positions.
pub const STAGE_POSITION: &str = "position";

/// Returned by [`Coords::index`] for an axis the coordinate does not define.
pub const UNDEFINED: i64 = -1;

/// Position of one image in the acquisition.
///
/// A `Coords` maps axis names (`"time"`, `"z"`, or any user-defined axis) to
/// non-negative positions, and separately records which axes this image is
/// the last one along (see [`Coords::is_axis_end`]).
///
/// Equality, hashing, and ordering look at positions only: two coordinates
/// with the same positions denote the same image slot, whatever their
/// terminal markers say. Ordering compares axes in name order, which gives a
/// total order suitable for sorting and tie-breaking.
///
/// `Coords` is a value type. Every "modifying" operation returns a new value
/// and leaves the receiver untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Coords {
    positions: BTreeMap<String, u32>,
    terminal: BTreeSet<String>,
}

impl Coords {
    /// The empty coordinate (defines no axes).
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a coordinate.
    pub fn builder() -> CoordsBuilder {
        CoordsBuilder::default()
    }

    /// Position along `axis`, or `None` if this coordinate has none.
    pub fn position(&self, axis: &str) -> Option<u32> {
        self.positions.get(axis).copied()
    }

    /// Position along `axis`, or [`UNDEFINED`] (`-1`) if this coordinate has
    /// none. Absence is a valid answer, not an error.
    pub fn index(&self, axis: &str) -> i64 {
        self.position(axis).map_or(UNDEFINED, i64::from)
    }

    /// Returns `true` if this coordinate defines a position along `axis`.
    pub fn has_axis(&self, axis: &str) -> bool {
        self.positions.contains_key(axis)
    }

    /// Copy of this coordinate with `axis` set to `value`, overriding any
    /// previous position.
    pub fn with_position(&self, axis: impl Into<String>, value: u32) -> Self {
        let mut copy = self.clone();
        copy.positions.insert(axis.into(), value);
        copy
    }

    /// Returns `true` if this image is the last one along `axis` in the
    /// current acquisition (for example the top slice of a z-stack).
    pub fn is_axis_end(&self, axis: &str) -> bool {
        self.terminal.contains(axis)
    }

    /// Copy of this coordinate marked as the end of `axis`.
    pub fn mark_axis_end(&self, axis: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.terminal.insert(axis.into());
        copy
    }

    /// All axes this coordinate is at the end of.
    pub fn terminal_axes(&self) -> &BTreeSet<String> {
        &self.terminal
    }

    /// All axes this coordinate defines, in name order.
    pub fn axes(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Iterate `(axis, position)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.positions.iter().map(|(axis, pos)| (axis.as_str(), *pos))
    }

    /// Number of axes defined.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if no axis is defined.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Copy with every shared axis shifted by its offset.
    ///
    /// Axes present only in `self` are copied unchanged; axes present only in
    /// `offsets` are ignored, so no axis is ever introduced. Results below
    /// zero saturate at zero.
    pub fn offset_copy(&self, offsets: &BTreeMap<String, i64>) -> Self {
        let positions = self
            .positions
            .iter()
            .map(|(axis, &pos)| {
                let shifted = match offsets.get(axis) {
                    Some(offset) => {
                        (i64::from(pos) + offset).clamp(0, i64::from(u32::MAX)) as u32
                    }
                    None => pos,
                };
                (axis.clone(), shifted)
            })
            .collect();
        Self {
            positions,
            terminal: self.terminal.clone(),
        }
    }

    /// Returns `true` if `self` agrees with `partial` on every axis that
    /// `partial` defines. Axes `partial` leaves out act as wildcards.
    pub fn matches(&self, partial: &Coords) -> bool {
        partial
            .positions
            .iter()
            .all(|(axis, pos)| self.positions.get(axis) == Some(pos))
    }
}

impl PartialEq for Coords {
    fn eq(&self, other: &Self) -> bool {
        self.positions == other.positions
    }
}

impl Eq for Coords {}

impl Hash for Coords {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.positions.hash(state);
    }
}

impl PartialOrd for Coords {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coords {
    fn cmp(&self, other: &Self) -> Ordering {
        self.positions.cmp(&other.positions)
    }
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, (axis, pos)) in self.positions.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{axis}={pos}")?;
        }
        write!(f, ">")
    }
}

impl FromStr for Coords {
    type Err = TypeError;

    /// Parse `time=1,z=2` (commas or whitespace between pairs; the
    /// `<...>` form produced by `Display` is accepted too).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| TypeError::InvalidCoords {
            input: s.to_string(),
            reason,
        };
        let body = s.trim().trim_start_matches('<').trim_end_matches('>');
        let mut builder = Coords::builder();
        for pair in body.split(|c: char| c == ',' || c.is_whitespace()) {
            if pair.is_empty() {
                continue;
            }
            let (axis, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected axis=position, got {pair:?}")))?;
            let axis = axis.trim();
            if axis.is_empty() {
                return Err(invalid("empty axis name".into()));
            }
            let value: u32 = value
                .trim()
                .parse()
                .map_err(|e| invalid(format!("bad position for {axis}: {e}")))?;
            builder = builder.index(axis, value);
        }
        Ok(builder.build())
    }
}

/// Builder for [`Coords`].
#[derive(Clone, Debug, Default)]
pub struct CoordsBuilder {
    coords: Coords,
}

impl CoordsBuilder {
    /// Set the position along an arbitrary axis.
    pub fn index(mut self, axis: impl Into<String>, value: u32) -> Self {
        self.coords.positions.insert(axis.into(), value);
        self
    }

    pub fn time(self, value: u32) -> Self {
        self.index(TIME, value)
    }

    pub fn channel(self, value: u32) -> Self {
        self.index(CHANNEL, value)
    }

    pub fn z(self, value: u32) -> Self {
        self.index(Z, value)
    }

    pub fn stage_position(self, value: u32) -> Self {
        self.index(STAGE_POSITION, value)
    }

    /// Mark the coordinate as the end of `axis`.
    pub fn axis_end(mut self, axis: impl Into<String>) -> Self {
        self.coords.terminal.insert(axis.into());
        self
    }

    pub fn build(self) -> Coords {
        self.coords
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn offsets(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(a, o)| (a.to_string(), *o)).collect()
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    #[test]
    fn missing_axis_is_undefined() {
        let c = Coords::builder().time(3).build();
        assert_eq!(c.index(TIME), 3);
        assert_eq!(c.index(Z), UNDEFINED);
        assert_eq!(c.position(Z), None);
        assert!(!c.has_axis(Z));
    }

    #[test]
    fn with_position_leaves_receiver_untouched() {
        let original = Coords::builder().time(1).build();
        let moved = original.with_position(Z, 4);
        assert_eq!(original.position(Z), None);
        assert_eq!(moved.position(Z), Some(4));
        assert_eq!(moved.position(TIME), Some(1));

        let overridden = moved.with_position(TIME, 9);
        assert_eq!(overridden.position(TIME), Some(9));
        assert_eq!(moved.position(TIME), Some(1));
    }

    #[test]
    fn axes_are_sorted_by_name() {
        let c = Coords::builder().z(0).channel(1).time(2).index("angle", 0).build();
        assert_eq!(c.axes(), vec!["angle", "channel", "time", "z"]);
        assert_eq!(c.len(), 4);
        assert!(Coords::new().is_empty());
    }

    // -----------------------------------------------------------------------
    // Terminal axes
    // -----------------------------------------------------------------------

    #[test]
    fn mark_axis_end_returns_marked_copy() {
        let c = Coords::builder().z(9).build();
        let end = c.mark_axis_end(Z);
        assert!(!c.is_axis_end(Z));
        assert!(end.is_axis_end(Z));
        assert_eq!(end.terminal_axes().len(), 1);
    }

    #[test]
    fn terminal_markers_do_not_affect_identity() {
        let plain = Coords::builder().z(9).build();
        let end = Coords::builder().z(9).axis_end(Z).build();
        assert_eq!(plain, end);

        let mut set = std::collections::HashSet::new();
        set.insert(plain);
        assert!(set.contains(&end));
    }

    // -----------------------------------------------------------------------
    // Offset copies
    // -----------------------------------------------------------------------

    #[test]
    fn offset_copy_ignores_unknown_axes() {
        let c = Coords::builder().index("x", 2).index("y", 3).build();
        let shifted = c.offset_copy(&offsets(&[("x", 5), ("q", 9)]));
        let expected = Coords::builder().index("x", 7).index("y", 3).build();
        assert_eq!(shifted, expected);
        assert!(!shifted.has_axis("q"));
        // Receiver unchanged.
        assert_eq!(c.position("x"), Some(2));
    }

    #[test]
    fn offset_copy_saturates_at_zero() {
        let c = Coords::builder().time(2).build();
        let shifted = c.offset_copy(&offsets(&[(TIME, -5)]));
        assert_eq!(shifted.position(TIME), Some(0));
    }

    #[test]
    fn offset_copy_keeps_terminal_markers() {
        let c = Coords::builder().z(1).axis_end(Z).build();
        let shifted = c.offset_copy(&offsets(&[(Z, 1)]));
        assert!(shifted.is_axis_end(Z));
    }

    // -----------------------------------------------------------------------
    // Partial matching
    // -----------------------------------------------------------------------

    #[test]
    fn matches_treats_missing_axes_as_wildcards() {
        let c = Coords::builder().time(1).z(2).channel(0).build();
        assert!(c.matches(&Coords::new()));
        assert!(c.matches(&Coords::builder().z(2).build()));
        assert!(c.matches(&Coords::builder().z(2).time(1).build()));
        assert!(!c.matches(&Coords::builder().z(3).build()));
        assert!(!c.matches(&Coords::builder().index("angle", 0).build()));
    }

    // -----------------------------------------------------------------------
    // Ordering, display, parsing
    // -----------------------------------------------------------------------

    #[test]
    fn ordering_is_total_over_positions() {
        let a = Coords::builder().time(0).z(1).build();
        let b = Coords::builder().time(1).z(0).build();
        assert!(a < b);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn display_format() {
        let c = Coords::builder().z(2).time(1).build();
        assert_eq!(c.to_string(), "<time=1 z=2>");
        assert_eq!(Coords::new().to_string(), "<>");
    }

    #[test]
    fn parse_accepts_commas_and_display_form() {
        let a: Coords = "time=1, z=2".parse().unwrap();
        let b: Coords = "<time=1 z=2>".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.position(Z), Some(2));
        assert!("".parse::<Coords>().unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "time".parse::<Coords>(),
            Err(TypeError::InvalidCoords { .. })
        ));
        assert!("time=-1".parse::<Coords>().is_err());
        assert!("=3".parse::<Coords>().is_err());
    }

    #[test]
    fn serde_keeps_terminal_axes() {
        let c = Coords::builder().time(4).axis_end(TIME).build();
        let json = serde_json::to_string(&c).unwrap();
        let parsed: Coords = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, c);
        assert!(parsed.is_axis_end(TIME));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn arb_coords() -> impl Strategy<Value = Coords> {
        prop::collection::btree_map("[a-z]{1,6}", 0u32..1000, 0..5).prop_map(|positions| {
            Coords {
                positions,
                terminal: BTreeSet::new(),
            }
        })
    }

    proptest! {
        #[test]
        fn offset_copy_never_adds_axes(
            c in arb_coords(),
            offs in prop::collection::btree_map("[a-z]{1,6}", -50i64..50, 0..5),
        ) {
            let shifted = c.offset_copy(&offs);
            prop_assert_eq!(shifted.axes(), c.axes());
        }

        #[test]
        fn zero_offsets_are_identity(c in arb_coords()) {
            let zeros: BTreeMap<String, i64> = c.axes().into_iter().map(|a| (a, 0)).collect();
            prop_assert_eq!(c.offset_copy(&zeros), c);
        }

        #[test]
        fn every_coordinate_matches_itself(c in arb_coords()) {
            prop_assert!(c.matches(&c));
        }

        #[test]
        fn display_parses_back(c in arb_coords()) {
            let parsed: Coords = c.to_string().parse().unwrap();
            prop_assert_eq!(parsed, c);
        }
    }
}
