//! Mapping from scanner identifiers to logical sides.
//!
//! Scanners are matched by exact identifier first, then by a suffix
//! convention (`dock-outer`, `ramp_LEFT`, ...). Identifiers that match
//! neither are not part of the engine and their samples are ignored.

use std::collections::HashMap;

use crate::types::Side;

const DUAL_GATE_SUFFIXES: &[(&str, Side)] = &[("outer", Side::Outer), ("inner", Side::Inner)];

const LEFT_RIGHT_SUFFIXES: &[(&str, Side)] = &[
    ("left", Side::Left),
    ("inner", Side::Left),
    ("right", Side::Right),
    ("outer", Side::Right),
];

/// Scanner → side resolution for one engine.
#[derive(Debug, Clone)]
pub struct SideBindings {
    exact: HashMap<String, Side>,
    suffixes: &'static [(&'static str, Side)],
    fallback: Option<Side>,
}

impl SideBindings {
    /// Outer/inner bindings for the dual-gate engine.
    #[must_use]
    pub fn dual_gate(exact: HashMap<String, Side>) -> Self {
        Self::restricted(exact, DUAL_GATE_SUFFIXES, &[Side::Outer, Side::Inner])
    }

    /// Left/right bindings for the lag classifier. `inner` scanners count
    /// as left and `outer` scanners as right.
    #[must_use]
    pub fn left_right(exact: HashMap<String, Side>) -> Self {
        Self::restricted(exact, LEFT_RIGHT_SUFFIXES, &[Side::Left, Side::Right])
    }

    /// Single-gate bindings. With no explicit scanners every scanner is the
    /// gate; otherwise only the listed ones are.
    #[must_use]
    pub fn single_gate(exact: HashMap<String, Side>) -> Self {
        let exact: HashMap<String, Side> = exact
            .into_iter()
            .filter(|(_, side)| *side == Side::Gate)
            .collect();
        let fallback = exact.is_empty().then_some(Side::Gate);
        Self {
            exact,
            suffixes: &[],
            fallback,
        }
    }

    fn restricted(
        exact: HashMap<String, Side>,
        suffixes: &'static [(&'static str, Side)],
        allowed: &[Side],
    ) -> Self {
        Self {
            exact: exact
                .into_iter()
                .filter(|(_, side)| allowed.contains(side))
                .collect(),
            suffixes,
            fallback: None,
        }
    }

    /// Resolve a scanner identifier to its side.
    #[must_use]
    pub fn resolve(&self, scanner_id: &str) -> Option<Side> {
        if let Some(side) = self.exact.get(scanner_id) {
            return Some(*side);
        }

        let lowered = scanner_id.to_ascii_lowercase();
        self.suffixes
            .iter()
            .find(|(suffix, _)| lowered.ends_with(suffix))
            .map(|(_, side)| *side)
            .or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(pairs: &[(&str, Side)]) -> HashMap<String, Side> {
        pairs.iter().map(|(id, side)| ((*id).to_string(), *side)).collect()
    }

    #[test]
    fn test_exact_match_wins_over_suffix() {
        let sides = SideBindings::dual_gate(exact(&[("scanner-inner", Side::Outer)]));
        assert_eq!(sides.resolve("scanner-inner"), Some(Side::Outer));
    }

    #[test]
    fn test_dual_gate_suffixes() {
        let sides = SideBindings::dual_gate(HashMap::new());
        assert_eq!(sides.resolve("dock-OUTER"), Some(Side::Outer));
        assert_eq!(sides.resolve("dock_inner"), Some(Side::Inner));
        assert_eq!(sides.resolve("dock-left"), None);
        assert_eq!(sides.resolve("kiosk"), None);
    }

    #[test]
    fn test_left_right_suffixes() {
        let sides = SideBindings::left_right(HashMap::new());
        assert_eq!(sides.resolve("ramp-left"), Some(Side::Left));
        assert_eq!(sides.resolve("ramp-inner"), Some(Side::Left));
        assert_eq!(sides.resolve("ramp-right"), Some(Side::Right));
        assert_eq!(sides.resolve("ramp-outer"), Some(Side::Right));
        assert_eq!(sides.resolve("ramp-top"), None);
    }

    #[test]
    fn test_bindings_for_foreign_sides_are_dropped() {
        let sides = SideBindings::left_right(exact(&[("a", Side::Outer), ("b", Side::Left)]));
        assert_eq!(sides.resolve("a"), None);
        assert_eq!(sides.resolve("b"), Some(Side::Left));
    }

    #[test]
    fn test_single_gate_accepts_any_scanner_when_unconfigured() {
        let sides = SideBindings::single_gate(HashMap::new());
        assert_eq!(sides.resolve("anything"), Some(Side::Gate));

        let sides = SideBindings::single_gate(exact(&[("dock", Side::Gate)]));
        assert_eq!(sides.resolve("dock"), Some(Side::Gate));
        assert_eq!(sides.resolve("other"), None);
    }
}
