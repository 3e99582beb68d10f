//! The lane model - bitmask priorities for scheduled work.
//!
//! A lane is a single bit in a 31-bit mask; a set of lanes is the union of
//! those bits. Bit position doubles as priority: the lower the bit, the more
//! urgent the work. Everything the scheduler decides - which update batch to
//! render next, what can be time-sliced, what has starved long enough to be
//! forced synchronous - is a handful of integer operations on these masks.

use std::fmt;

/// Milliseconds on the host scheduler's clock.
pub type Timestamp = u64;

/// "This lane has no deadline."
pub const NO_TIMESTAMP: Timestamp = Timestamp::MAX;

/// A set of priority lanes. A single lane is just a set with one bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Lanes(pub u32);

/// Alias used where exactly one bit is expected.
pub type Lane = Lanes;

/// Number of addressable lanes.
pub const TOTAL_LANES: usize = 31;

impl Lanes {
    pub const NONE: Lanes = Lanes(0);

    /// Must flush before returning to the host. Never time-sliced.
    pub const SYNC: Lanes = Lanes(1 << 0);
    /// Continuous input (drag, scroll) - urgent but interruptible.
    pub const INPUT_CONTINUOUS: Lanes = Lanes(1 << 1);
    /// Ordinary updates with no priority hint.
    pub const DEFAULT: Lanes = Lanes(1 << 2);
    /// Sixteen lanes handed out round-robin to transition scopes.
    pub const TRANSITION_MASK: Lanes = Lanes(0x0007_fff8);
    /// Four lanes for retries after a suspense boundary resolves.
    pub const RETRY_MASK: Lanes = Lanes(0x0078_0000);
    /// Work that only runs when nothing else is pending.
    pub const IDLE: Lanes = Lanes(1 << 29);
    /// Pre-rendering of hidden subtrees.
    pub const OFFSCREEN: Lanes = Lanes(1 << 30);

    pub const NON_IDLE: Lanes = Lanes(0x1fff_ffff);
    pub const ALL: Lanes = Lanes(0x7fff_ffff);

    const FIRST_TRANSITION: Lanes = Lanes(1 << 3);
    const FIRST_RETRY: Lanes = Lanes(1 << 19);

    pub const fn merge(self, other: Lanes) -> Lanes {
        Lanes(self.0 | other.0)
    }

    pub const fn remove(self, other: Lanes) -> Lanes {
        Lanes(self.0 & !other.0)
    }

    pub const fn intersect(self, other: Lanes) -> Lanes {
        Lanes(self.0 & other.0)
    }

    pub const fn intersects(self, other: Lanes) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_subset_of(self, other: Lanes) -> bool {
        self.0 & other.0 == self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Isolate the most urgent lane in the set: the lowest set bit.
    pub const fn highest_priority_lane(self) -> Lane {
        Lanes(self.0 & self.0.wrapping_neg())
    }

    /// Bit position of a single lane. Meaningless on multi-lane sets.
    pub const fn index(self) -> usize {
        self.0.trailing_zeros() as usize
    }

    pub const fn is_blocking(self) -> bool {
        self.intersects(Lanes(Self::SYNC.0 | Self::INPUT_CONTINUOUS.0))
    }

    pub const fn is_transition(self) -> bool {
        self.intersects(Self::TRANSITION_MASK)
    }

    /// Iterate over the individual lanes in the set, most urgent first.
    pub fn iter(self) -> impl Iterator<Item = Lane> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let lane = rest & rest.wrapping_neg();
            rest &= !lane;
            Some(Lanes(lane))
        })
    }

    /// How long a lane of this priority may stay pending before it is forced
    /// to render synchronously.
    pub(crate) fn expiration_budget(self) -> Option<Timestamp> {
        let lane = self.highest_priority_lane();
        if lane == Self::SYNC {
            Some(0)
        } else if lane == Self::INPUT_CONTINUOUS {
            Some(250)
        } else if lane == Self::DEFAULT || lane.is_transition() {
            Some(5_000)
        } else {
            // retry, idle, offscreen lanes never expire
            None
        }
    }

    /// Rotate through the transition lane range, wrapping back to the first.
    pub(crate) fn next_transition_lane(self) -> Lane {
        debug_assert!(self.is_empty() || self.is_transition());
        let next = if self.is_empty() {
            Self::FIRST_TRANSITION
        } else {
            Lanes(self.0 << 1)
        };
        if next.is_transition() {
            next
        } else {
            Self::FIRST_TRANSITION
        }
    }

    /// Rotate through the retry lane range, wrapping back to the first.
    pub(crate) fn next_retry_lane(self) -> Lane {
        let next = if self.is_empty() {
            Self::FIRST_RETRY
        } else {
            Lanes(self.0 << 1)
        };
        if next.intersects(Self::RETRY_MASK) {
            next
        } else {
            Self::FIRST_RETRY
        }
    }
}

impl std::ops::BitOr for Lanes {
    type Output = Lanes;
    fn bitor(self, rhs: Lanes) -> Lanes {
        self.merge(rhs)
    }
}

impl std::ops::BitOrAssign for Lanes {
    fn bitor_assign(&mut self, rhs: Lanes) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for Lanes {
    type Output = Lanes;
    fn bitand(self, rhs: Lanes) -> Lanes {
        self.intersect(rhs)
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#010x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_bit_wins() {
        let set = Lanes::DEFAULT | Lanes::SYNC | Lanes::IDLE;
        assert_eq!(set.highest_priority_lane(), Lanes::SYNC);
    }

    #[test]
    fn subset_and_remove() {
        let set = Lanes::SYNC | Lanes::DEFAULT;
        assert!(Lanes::SYNC.is_subset_of(set));
        assert!(!Lanes::IDLE.is_subset_of(set));
        assert_eq!(set.remove(Lanes::SYNC), Lanes::DEFAULT);
    }

    #[test]
    fn transition_rotation_wraps() {
        let mut lane = Lanes::NONE.next_transition_lane();
        let first = lane;
        for _ in 0..16 {
            lane = lane.next_transition_lane();
        }
        assert_eq!(lane, first);
        assert!(first.is_transition());
    }

    #[test]
    fn iter_yields_most_urgent_first() {
        let set = Lanes::IDLE | Lanes::SYNC | Lanes::DEFAULT;
        let order: Vec<_> = set.iter().collect();
        assert_eq!(order, vec![Lanes::SYNC, Lanes::DEFAULT, Lanes::IDLE]);
    }

    #[test]
    fn expiration_budgets_follow_priority_class() {
        assert_eq!(Lanes::SYNC.expiration_budget(), Some(0));
        assert_eq!(Lanes::INPUT_CONTINUOUS.expiration_budget(), Some(250));
        assert_eq!(Lanes::DEFAULT.expiration_budget(), Some(5_000));
        let transition = Lanes::NONE.next_transition_lane();
        assert_eq!(transition.expiration_budget(), Some(5_000));
        assert_eq!(Lanes::IDLE.expiration_budget(), None);
    }
}
