//! Shared query-planning for the indexers.
//!
//! Both indexers evaluate a conjunction the same way: height constraints
//! are pulled out first (an equality can short-circuit to a point probe,
//! a range filters every event match), numeric range conditions scan the
//! minimal key prefix, and everything else intersects candidates on
//! `(candidate, event sequence)` so separate constraints only combine
//! when they matched inside the same event.

use crate::query::{Condition, Op, Operand};
use num::bigint::BigInt;
use num::rational::BigRational;
use num::ToPrimitive;
use std::collections::HashSet;
use std::hash::Hash;

/// A numeric interval with optionally-inclusive bounds.
#[derive(Debug, Clone, Default)]
pub(crate) struct NumRange {
    pub lower: Option<(BigRational, bool)>,
    pub upper: Option<(BigRational, bool)>,
}

impl NumRange {
    fn add_bound(&mut self, op: Op, value: BigRational) {
        match op {
            Op::Gt => self.lower = Some((value, false)),
            Op::Geq => self.lower = Some((value, true)),
            Op::Lt => self.upper = Some((value, false)),
            Op::Leq => self.upper = Some((value, true)),
            _ => {}
        }
    }

    pub fn contains(&self, v: &BigRational) -> bool {
        if let Some((lower, inclusive)) = &self.lower {
            let ok = if *inclusive { v >= lower } else { v > lower };
            if !ok {
                return false;
            }
        }
        if let Some((upper, inclusive)) = &self.upper {
            let ok = if *inclusive { v <= upper } else { v < upper };
            if !ok {
                return false;
            }
        }
        true
    }

    pub fn contains_height(&self, height: i64) -> bool {
        self.contains(&BigRational::from_integer(BigInt::from(height)))
    }
}

/// The evaluation plan for one conjunction.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    /// Conditions consumed by height extraction or range grouping.
    pub skip: Vec<bool>,
    /// Non-height numeric ranges, in first-appearance order.
    pub ranges: Vec<(String, NumRange)>,
    /// Height equality (the last one wins, mirroring the original).
    pub height_eq: Option<i64>,
    /// Height equality on a non-integer can never match.
    pub height_impossible: bool,
    /// Height range filter applied to every event match.
    pub height_range: Option<NumRange>,
    /// Every condition is a height constraint.
    pub only_height: bool,
}

pub(crate) fn plan(conditions: &[Condition], height_tag: &str) -> Plan {
    let mut plan = Plan {
        skip: vec![false; conditions.len()],
        ..Default::default()
    };
    let mut height_range: Option<NumRange> = None;

    for (i, cond) in conditions.iter().enumerate() {
        let number = cond.operand.as_ref().and_then(Operand::as_number);
        match cond.op {
            Op::Eq if cond.tag == height_tag => {
                if let Some(value) = number {
                    plan.skip[i] = true;
                    if value.is_integer() {
                        match value.to_integer().to_i64() {
                            Some(h) => {
                                plan.height_eq = Some(h);
                                plan.height_impossible = false;
                            }
                            None => plan.height_impossible = true,
                        }
                    } else {
                        plan.height_eq = None;
                        plan.height_impossible = true;
                    }
                }
            }
            Op::Lt | Op::Leq | Op::Gt | Op::Geq => {
                if let Some(value) = number {
                    plan.skip[i] = true;
                    if cond.tag == height_tag {
                        height_range
                            .get_or_insert_with(NumRange::default)
                            .add_bound(cond.op, value.clone());
                    } else {
                        match plan.ranges.iter_mut().find(|(tag, _)| *tag == cond.tag) {
                            Some((_, range)) => range.add_bound(cond.op, value.clone()),
                            None => {
                                let mut range = NumRange::default();
                                range.add_bound(cond.op, value.clone());
                                plan.ranges.push((cond.tag.clone(), range));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    plan.height_range = height_range;
    plan.only_height = plan.skip.iter().all(|&s| s) && plan.ranges.is_empty();
    plan
}

impl Plan {
    /// Whether a key's height passes the extracted height constraints.
    pub fn height_allowed(&self, height: i64) -> bool {
        if self.height_impossible {
            return false;
        }
        if let Some(h) = self.height_eq {
            if height != h {
                return false;
            }
        }
        if let Some(range) = &self.height_range {
            if !range.contains_height(height) {
                return false;
            }
        }
        true
    }
}

/// The event type addressed by a composite tag: everything before the
/// last dot (`"transfer.amount"` → `"transfer"`), or the whole tag for a
/// type-only condition.
pub(crate) fn group_of(tag: &str) -> &str {
    match tag.rfind('.') {
        Some(i) => &tag[..i],
        None => tag,
    }
}

/// Candidate sets accumulated per event type.
///
/// Conditions addressing the same event type must be satisfied by the
/// same event, so their candidates intersect on `(candidate, event
/// sequence)`. Conditions on different types can never share an event;
/// they combine at candidate level in [`Self::into_result`].
pub(crate) struct GroupedCandidates<K> {
    groups: Vec<(String, HashSet<(K, i64)>)>,
}

impl<K: Eq + Hash + Clone> GroupedCandidates<K> {
    pub fn new() -> Self {
        GroupedCandidates { groups: Vec::new() }
    }

    /// Merge one condition's candidates into its group. Returns `false`
    /// when the group became empty, i.e. the conjunction cannot match.
    pub fn add(&mut self, group: &str, matches: HashSet<(K, i64)>) -> bool {
        match self.groups.iter_mut().find(|(g, _)| g == group) {
            Some((_, existing)) => {
                existing.retain(|entry| matches.contains(entry));
                !existing.is_empty()
            }
            None => {
                let empty = matches.is_empty();
                self.groups.push((group.to_string(), matches));
                !empty
            }
        }
    }

    /// Intersect the groups' candidates. Empty when no condition ran.
    pub fn into_result(self) -> HashSet<K> {
        let mut groups = self.groups.into_iter();
        let Some((_, first)) = groups.next() else {
            return HashSet::new();
        };
        let mut result: HashSet<K> = first.into_iter().map(|(k, _)| k).collect();
        for (_, set) in groups {
            let keys: HashSet<K> = set.into_iter().map(|(k, _)| k).collect();
            result.retain(|k| keys.contains(k));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;

    #[test]
    fn extracts_height_equality() {
        let q = Query::parse("block.height = 5").unwrap();
        let p = plan(q.conditions(), "block.height");
        assert_eq!(p.height_eq, Some(5));
        assert!(p.only_height);
        assert!(p.height_allowed(5));
        assert!(!p.height_allowed(6));
    }

    #[test]
    fn fractional_height_equality_is_impossible() {
        let q = Query::parse("block.height = 5.5").unwrap();
        let p = plan(q.conditions(), "block.height");
        assert!(p.height_impossible);
        assert!(!p.height_allowed(5));
    }

    #[test]
    fn groups_range_bounds_per_tag() {
        let q = Query::parse("a.x > 1 AND a.x <= 10 AND b.y < 3").unwrap();
        let p = plan(q.conditions(), "block.height");
        assert_eq!(p.ranges.len(), 2);
        let (_, ax) = &p.ranges[0];
        assert!(!ax.contains(&BigRational::from_integer(1.into())));
        assert!(ax.contains(&BigRational::from_integer(10.into())));
        assert!(!ax.contains(&BigRational::from_integer(11.into())));
    }

    #[test]
    fn height_range_becomes_a_filter() {
        let q = Query::parse("block.height >= 3 AND foo.bar EXISTS").unwrap();
        let p = plan(q.conditions(), "block.height");
        assert!(!p.only_height);
        assert!(p.height_range.is_some());
        assert!(p.height_allowed(3));
        assert!(!p.height_allowed(2));
        assert!(!p.skip[1], "the EXISTS condition still evaluates");
    }

    #[test]
    fn pure_height_range_is_only_height() {
        let q = Query::parse("block.height >= 3 AND block.height < 10").unwrap();
        let p = plan(q.conditions(), "block.height");
        assert!(p.only_height);
        assert!(p.height_eq.is_none());
    }

    #[test]
    fn group_of_strips_the_attribute_key() {
        assert_eq!(group_of("transfer.amount"), "transfer");
        assert_eq!(group_of("tm.events.type"), "tm.events");
        assert_eq!(group_of("reward"), "reward");
    }

    #[test]
    fn same_group_intersects_on_sequence() {
        let mut groups: GroupedCandidates<i64> = GroupedCandidates::new();
        // transfer.sender matched event seq 1, transfer.amount seq 2:
        // different events of the same type never combine.
        assert!(groups.add("transfer", [(3, 1)].into_iter().collect()));
        assert!(!groups.add("transfer", [(3, 2)].into_iter().collect()));
        assert!(groups.into_result().is_empty());
    }

    #[test]
    fn different_groups_intersect_on_candidate() {
        let mut groups: GroupedCandidates<i64> = GroupedCandidates::new();
        assert!(groups.add("type1", [(3, 1)].into_iter().collect()));
        assert!(groups.add("type2", [(3, 2), (4, 5)].into_iter().collect()));
        let result = groups.into_result();
        assert_eq!(result, [3].into_iter().collect());
    }
}
