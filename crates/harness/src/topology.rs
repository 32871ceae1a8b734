use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

use crate::error::HarnessError;
use crate::simulator::Adjacency;
use crate::state::{Directory, Topology};

/// Adjacency the simulator currently produces, in router addresses.
///
/// Nodes without neighbours have no entry, just like a router that has not
/// discovered any edge.
pub fn expected_topology(
    adjacency: &Adjacency,
    directory: &Directory,
) -> Result<Topology, HarnessError> {
    let mut topology = Topology::new();

    for (node, neighbours) in adjacency {
        let address = directory.address_of(node)?;

        for neighbour in neighbours {
            topology.insert_edge(address, directory.address_of(neighbour)?);
        }
    }

    Ok(topology)
}

/// Acceptable routers for every hop of a route, position by position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTemplate(Vec<BTreeSet<String>>);

impl RouteTemplate {
    #[must_use]
    pub const fn new(hops: Vec<BTreeSet<String>>) -> Self {
        Self(hops)
    }

    /// Parses `a, [b, c], d`.
    pub fn parse(template: &str) -> Result<Self, HarnessError> {
        let invalid = |reason: &str| HarnessError::InvalidRouteTemplate {
            template: template.to_owned(),
            reason: reason.to_owned(),
        };

        let identifiers = Regex::new("([A-Za-z0-9_]+)")?;
        let quoted = identifiers.replace_all(template, "\"$1\"");

        let Value::Array(hops) = serde_json::from_str(&format!("[{quoted}]"))
            .map_err(|err| invalid(&err.to_string()))?
        else {
            return Err(invalid("not a list"));
        };

        let hops = hops
            .into_iter()
            .map(|hop| match hop {
                Value::String(router) => Ok(BTreeSet::from([router])),
                Value::Array(routers) if !routers.is_empty() => routers
                    .into_iter()
                    .map(|router| match router {
                        Value::String(router) => Ok(router),
                        _ => Err(invalid("nested alternatives")),
                    })
                    .collect(),
                _ => Err(invalid("empty alternatives")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if hops.is_empty() {
            return Err(invalid("no hops"));
        }

        Ok(Self(hops))
    }

    /// Strict positional match: same length, every hop in its set.
    #[must_use]
    pub fn matches<S: AsRef<str>>(&self, hops: &[S]) -> bool {
        self.0.len() == hops.len()
            && self
                .0
                .iter()
                .zip(hops)
                .all(|(allowed, hop)| allowed.contains(hop.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(hops: &[&[&str]]) -> RouteTemplate {
        RouteTemplate::new(
            hops.iter()
                .map(|set| set.iter().map(|&s| s.to_owned()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_positional_match() {
        let route = template(&[&["a"], &["b", "c"]]);

        assert!(route.matches(&["a", "c"]));
        assert!(route.matches(&["a", "b"]));
        assert!(!route.matches(&["a", "d"]));
        assert!(!route.matches(&["c", "a"]));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(!template(&[&["a"]]).matches(&["a", "b"]));
        assert!(!template(&[&["a"], &["b"]]).matches(&["a"]));
    }

    #[test]
    fn test_parse_template() {
        assert_eq!(
            RouteTemplate::parse("a, [b, c], d_1").unwrap(),
            template(&[&["a"], &["b", "c"], &["d_1"]])
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for malformed in ["", "a, [b", "a, []", "a, [[b]]", "a,, b"] {
            assert!(
                matches!(
                    RouteTemplate::parse(malformed),
                    Err(HarnessError::InvalidRouteTemplate { .. })
                ),
                "{malformed:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_expected_topology_uses_addresses() {
        let mut directory = Directory::new();
        for name in ["a", "b", "c"] {
            let _entry = directory.register(name).unwrap();
        }

        let adjacency: Adjacency = [
            ("a", vec!["b", "c"]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
        ]
        .into_iter()
        .map(|(node, neighbours)| {
            (
                node.to_owned(),
                neighbours.into_iter().map(str::to_owned).collect(),
            )
        })
        .collect();

        let expected = expected_topology(&adjacency, &directory).unwrap();
        let discovered: Topology = [(1, 3), (2, 1)]
            .into_iter()
            .map(|(a, b)| {
                (
                    crate::address::Address::new(a).unwrap(),
                    crate::address::Address::new(b).unwrap(),
                )
            })
            .collect();

        assert_eq!(expected, discovered);
    }

    #[test]
    fn test_expected_topology_requires_spawned_routers() {
        let directory = Directory::new();
        let adjacency: Adjacency = [("a".to_owned(), BTreeSet::from(["b".to_owned()]))].into();

        assert!(matches!(
            expected_topology(&adjacency, &directory),
            Err(HarnessError::UnknownRouter(name)) if name == "a"
        ));
    }
}
