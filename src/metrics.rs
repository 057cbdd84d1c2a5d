// Host metric table
//
// Static `[hosts]` config: hostname -> integer cost. Lower is cheaper. Loaded
// once when a worker starts and never modified afterwards.

use std::collections::BTreeMap;

use crate::constants::DEFAULT_HOST_METRIC;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMetrics {
    table: BTreeMap<String, i64>,
}

/// Location keys use `_` where hostnames have `.`
pub fn normalize_host(host: &str) -> String {
    host.replace('.', "_")
}

impl HostMetrics {
    /// Build from the raw `[hosts]` section. Entries that are not integers
    /// are logged and skipped.
    pub fn from_config(hosts: &BTreeMap<String, toml::Value>) -> Self {
        let mut table = BTreeMap::new();
        for (host, value) in hosts {
            let metric = match value {
                toml::Value::Integer(i) => Some(*i),
                toml::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            match metric {
                Some(m) => {
                    table.insert(normalize_host(host), m);
                }
                None => log::error!("Bad host metric line for {}: {}", host, value),
            }
        }
        log::debug!("Host metric list: {:?}", table);
        Self { table }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: AsRef<str>,
    {
        Self {
            table: pairs
                .into_iter()
                .map(|(h, m)| (normalize_host(h.as_ref()), m))
                .collect(),
        }
    }

    /// Cost of a host; unlisted hosts get the mid-range default
    pub fn metric(&self, host: &str) -> i64 {
        self.table
            .get(&normalize_host(host))
            .copied()
            .unwrap_or(DEFAULT_HOST_METRIC)
    }

    /// Cheapest host among `locations`. Equal costs go to the
    /// lexicographically smallest host key.
    pub fn select_best<'a, V>(&self, locations: &'a BTreeMap<String, V>) -> Option<(&'a str, i64)> {
        let mut best: Option<(&'a str, i64)> = None;
        for host in locations.keys() {
            let metric = self.metric(host);
            if best.map_or(true, |(_, m)| metric < m) {
                best = Some((host.as_str(), metric));
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
