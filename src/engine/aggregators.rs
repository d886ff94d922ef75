use std::collections::BTreeMap;

/// Named global sums for one superstep.
///
/// Partial values from every vertex are merged with `merge`, which is
/// commutative and associative, so contributions may arrive in any order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    values: BTreeMap<&'static str, f64>,
}

impl Aggregates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &'static str, value: f64) {
        *self.values.entry(key).or_insert(0.0) += value;
    }

    /// Sum for `key`, zero when nothing was aggregated under it.
    pub fn get(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn merge(mut self, other: Aggregates) -> Aggregates {
        for (key, value) in other.values {
            self.add(key, value);
        }
        self
    }

    pub fn to_owned_map(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_per_key() {
        let mut a = Aggregates::new();
        a.add("err", 1.5);
        a.add("count", 2.0);
        let mut b = Aggregates::new();
        b.add("err", 0.5);

        let ab = a.clone().merge(b.clone());
        let ba = b.merge(a);
        assert_eq!(ab, ba);
        assert_eq!(ab.get("err"), 2.0);
        assert_eq!(ab.get("count"), 2.0);
        assert_eq!(ab.get("missing"), 0.0);
        assert!(!ab.contains("missing"));
    }
}
