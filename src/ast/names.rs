//! Anonymous name generation.
//!
//! Each decode session owns one [`NameGenerator`]; nothing is shared between
//! sessions, so two decoders running side by side hand out the same sequence.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct NameGenerator {
    counters: HashMap<String, usize>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `prefix_N`, with `N` counting up per prefix from 0.
    pub fn unique(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}_{counter}");
        *counter += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_prefix() {
        let mut names = NameGenerator::new();
        assert_eq!(names.unique("func"), "func_0");
        assert_eq!(names.unique("func"), "func_1");
        assert_eq!(names.unique("block"), "block_0");
        assert_eq!(names.unique("func"), "func_2");
    }

    #[test]
    fn sessions_are_independent() {
        let mut a = NameGenerator::new();
        let mut b = NameGenerator::new();
        a.unique("loop");
        a.unique("loop");
        assert_eq!(b.unique("loop"), "loop_0");
        assert_eq!(a.unique("loop"), "loop_2");
    }
}
