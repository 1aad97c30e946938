//! Capability negotiation with the engine.
//!
//! Optional engine features are named symbolically (`stateful_files`,
//! `has_lock`, ...) and resolved to the minimum engine API version that
//! provides them through a [`CapabilityGraph`]. Resolution is a worklist
//! fixed point: names expand to their graph entries until only version
//! numbers remain, and the answer is the largest one seen.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use regex::Regex;
use tracing::debug;

use crate::engine::EngineProbe;
use crate::error::{CapabilityError, ConfigError};
use crate::operation::Operation;

/// Version assumed for any `has_<op>` the graph does not list explicitly.
pub const BASELINE_VERSION: u32 = 21;

/// One node of a capability requirement.
#[derive(Debug, Clone)]
pub enum Feature {
    /// A literal minimum engine API version.
    Version(u32),
    /// A capability name, looked up in the graph.
    Name(String),
    /// Every known name matching (or, negated, not matching) the pattern.
    Pattern { regex: Regex, negated: bool },
    /// All of the listed features.
    List(Vec<Feature>),
}

impl Feature {
    pub fn name(name: impl Into<String>) -> Self {
        Feature::Name(name.into())
    }

    /// Parses the string form: `re:<regex>`, `!re:<regex>` or a name.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (negated, rest) = match s.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, s),
        };
        match rest.strip_prefix("re:") {
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
                Ok(Feature::Pattern { regex, negated })
            }
            None => Ok(Feature::Name(s.to_string())),
        }
    }

    fn for_each_name(&self, universe: &[String], f: &mut impl FnMut(&str)) {
        match self {
            Feature::Version(_) => {}
            Feature::Name(n) => f(n),
            Feature::Pattern { regex, negated } => {
                for name in universe {
                    if regex.is_match(name) != *negated {
                        f(name);
                    }
                }
            }
            Feature::List(items) => {
                for item in items {
                    item.for_each_name(universe, f);
                }
            }
        }
    }
}

impl From<u32> for Feature {
    fn from(v: u32) -> Self {
        Feature::Version(v)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Version(v) => write!(f, "{v}"),
            Feature::Name(n) => f.write_str(n),
            Feature::Pattern { regex, negated } => {
                write!(f, "{}re:{}", if *negated { "!" } else { "" }, regex.as_str())
            }
            Feature::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

fn op_capability(op: Operation) -> String {
    format!("has_{op}")
}

/// Version for a name outside the graph: only `has_<op>` is known.
fn baseline(name: &str) -> Result<u32, CapabilityError> {
    match name.strip_prefix("has_").map(str::parse::<Operation>) {
        Some(Ok(_)) => Ok(BASELINE_VERSION),
        _ => Err(CapabilityError::Unknown(name.to_string())),
    }
}

/// Static map from capability name to its requirement.
///
/// Construction validates the graph: every referenced name must exist and
/// no name may depend on itself, so resolution always terminates.
#[derive(Debug, Clone)]
pub struct CapabilityGraph {
    entries: BTreeMap<String, Feature>,
    /// Graph names plus `has_<op>` for every dispatchable operation; the
    /// candidates patterns are matched against.
    universe: Vec<String>,
}

impl CapabilityGraph {
    pub fn new<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, Feature)>,
        S: Into<String>,
    {
        let graph = Self::unchecked(entries.into_iter().map(|(k, v)| (k.into(), v)).collect());
        graph.validate()?;
        Ok(graph)
    }

    fn unchecked(entries: BTreeMap<String, Feature>) -> Self {
        let mut universe: BTreeSet<String> = entries.keys().cloned().collect();
        universe.extend(Operation::ALL.into_iter().map(op_capability));
        Self {
            entries,
            universe: universe.into_iter().collect(),
        }
    }

    /// The graph shipped with the library.
    pub fn builtin() -> Self {
        let v = Feature::Version;
        let list =
            |names: &[&str]| Feature::List(names.iter().map(|s| Feature::name(*s)).collect());
        let everything_else = Feature::Pattern {
            regex: Regex::new(r"^\*$").expect("literal pattern is valid"),
            negated: true,
        };

        let entries: BTreeMap<String, Feature> = [
            ("stateful_files", v(22)),
            ("stateful_dirs", v(23)),
            ("stateful_io", list(&["stateful_files", "stateful_dirs"])),
            ("stateful_files_keep_cache", v(23)),
            ("stateful_files_direct_io", v(23)),
            ("keep_cache", list(&["stateful_files_keep_cache"])),
            ("direct_io", list(&["stateful_files_direct_io"])),
            ("has_opendir", list(&["stateful_dirs"])),
            ("has_releasedir", list(&["stateful_dirs"])),
            ("has_fsyncdir", list(&["stateful_dirs"])),
            ("has_create", v(25)),
            ("has_access", v(25)),
            ("has_fgetattr", v(25)),
            ("has_ftruncate", v(25)),
            ("has_fsinit", Feature::name("has_init")),
            ("has_fsdestroy", Feature::name("has_destroy")),
            ("has_lock", v(26)),
            ("has_utimens", v(26)),
            ("has_bmap", v(26)),
            ("has_init", v(23)),
            ("has_destroy", v(23)),
            ("*", everything_else),
        ]
        .into_iter()
        .map(|(k, f)| (k.to_string(), f))
        .collect();
        Self::unchecked(entries)
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Feature)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn is_known(&self, name: &str) -> bool {
        self.universe.binary_search_by(|u| u.as_str().cmp(name)).is_ok()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, feature) in &self.entries {
            let mut missing = None;
            feature.for_each_name(&self.universe, &mut |name| {
                if missing.is_none() && !self.is_known(name) {
                    missing = Some(name.to_string());
                }
            });
            if let Some(reference) = missing {
                return Err(ConfigError::UnknownReference {
                    feature: key.clone(),
                    reference,
                });
            }
        }

        // Depth-first search for back edges.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }
        fn visit(
            graph: &CapabilityGraph,
            name: &str,
            marks: &mut BTreeMap<String, Mark>,
        ) -> Result<(), ConfigError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Active) => return Err(ConfigError::Cycle(name.to_string())),
                None => {}
            }
            let Some(feature) = graph.entries.get(name) else {
                return Ok(());
            };
            marks.insert(name.to_string(), Mark::Active);
            let mut next = Vec::new();
            feature.for_each_name(&graph.universe, &mut |n| next.push(n.to_string()));
            for n in next {
                visit(graph, &n, marks)?;
            }
            marks.insert(name.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        for key in self.entries.keys() {
            visit(self, key, &mut marks)?;
        }
        Ok(())
    }
}

impl Default for CapabilityGraph {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Resolves capabilities against a graph and checks them against an
/// engine's reported API version.
#[derive(Debug, Clone, Default)]
pub struct CapabilityResolver {
    graph: CapabilityGraph,
}

impl CapabilityResolver {
    pub fn new(graph: CapabilityGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &CapabilityGraph {
        &self.graph
    }

    /// Lists every capability the graph defines.
    pub fn builtins(&self) -> Vec<&str> {
        self.graph.entries.keys().map(String::as_str).collect()
    }

    /// The minimum engine API version providing all of `names`.
    ///
    /// Names use the string forms accepted by [`Feature::parse`]. Resolving
    /// nothing yields 0.
    pub fn resolve<I, S>(&self, names: I) -> Result<u32, CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let features = names
            .into_iter()
            .map(|n| Feature::parse(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.resolve_features(&features)
    }

    pub fn resolve_features(&self, features: &[Feature]) -> Result<u32, CapabilityError> {
        let mut required = 0;
        let mut seen: HashSet<String> = HashSet::new();
        let mut pending: Vec<&Feature> = features.iter().collect();

        while let Some(feature) = pending.pop() {
            match feature {
                Feature::Version(v) => required = required.max(*v),
                Feature::List(items) => pending.extend(items),
                Feature::Name(name) => {
                    if !seen.insert(name.clone()) {
                        continue;
                    }
                    match self.graph.get(name) {
                        Some(entry) => pending.push(entry),
                        None => required = required.max(baseline(name)?),
                    }
                }
                Feature::Pattern { .. } => {
                    let mut names = Vec::new();
                    feature.for_each_name(&self.graph.universe, &mut |n| names.push(n.to_string()));
                    for name in names {
                        if !seen.insert(name.clone()) {
                            continue;
                        }
                        match self.graph.get(&name) {
                            Some(entry) => pending.push(entry),
                            None => required = required.max(baseline(&name)?),
                        }
                    }
                }
            }
        }
        Ok(required)
    }

    /// Asks the engine for its API version.
    pub fn probe_engine_version(&self, probe: &dyn EngineProbe) -> Result<u32, CapabilityError> {
        Ok(probe.api_version()?)
    }

    /// Fails unless an engine at version `available` supports every name.
    pub fn check<I, S>(&self, available: u32, names: I) -> Result<(), CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut required = 0;
        let mut offenders = Vec::new();
        for name in names {
            let name = name.as_ref();
            let needed = self.resolve([name])?;
            if needed > available {
                offenders.push(name.to_string());
                required = required.max(needed);
            }
        }
        if offenders.is_empty() {
            return Ok(());
        }
        Err(CapabilityError::Unsupported {
            required,
            available,
            names: offenders,
        })
    }

    /// Probes the engine and checks `names` against its version.
    pub fn assert_supported<I, S>(&self, probe: &dyn EngineProbe, names: I) -> Result<(), CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let available = self.probe_engine_version(probe)?;
        debug!(available, "Checking engine capabilities");
        self.check(available, names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;

    struct FixedVersion(u32);

    impl EngineProbe for FixedVersion {
        fn api_version(&self) -> Result<u32, ProbeError> {
            Ok(self.0)
        }

        fn help_text(&self) -> Result<String, ProbeError> {
            Ok(String::new())
        }
    }

    fn resolver() -> CapabilityResolver {
        CapabilityResolver::default()
    }

    #[test]
    fn test_builtin_graph_is_valid() {
        let entries: Vec<(String, Feature)> = CapabilityGraph::builtin()
            .entries()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        assert!(CapabilityGraph::new(entries).is_ok());
    }

    #[test]
    fn test_resolve_literals_and_lists() {
        let r = resolver();
        assert_eq!(r.resolve(["stateful_files"]).unwrap(), 22);
        assert_eq!(r.resolve(["stateful_io"]).unwrap(), 23);
        assert_eq!(r.resolve(["has_fsinit"]).unwrap(), 23);
        assert_eq!(r.resolve(["has_create", "keep_cache"]).unwrap(), 25);
        assert_eq!(r.resolve(Vec::<&str>::new()).unwrap(), 0);
    }

    #[test]
    fn test_has_op_baseline() {
        let r = resolver();
        assert_eq!(r.resolve(["has_read"]).unwrap(), BASELINE_VERSION);
        assert_eq!(r.resolve(["has_lock"]).unwrap(), 26);
    }

    #[test]
    fn test_unknown_capability() {
        let r = resolver();
        assert!(matches!(
            r.resolve(["has_frobnicate"]),
            Err(CapabilityError::Unknown(name)) if name == "has_frobnicate"
        ));
        assert!(matches!(r.resolve(["warp_drive"]), Err(CapabilityError::Unknown(_))));
    }

    #[test]
    fn test_patterns() {
        let r = resolver();
        assert_eq!(r.resolve(["*"]).unwrap(), 26);
        assert_eq!(r.resolve(["re:^stateful_files$"]).unwrap(), 22);
        assert_eq!(r.resolve(["re:dir"]).unwrap(), 23);
        // Everything except the three version-26 operations.
        assert_eq!(
            r.resolve(["!re:^(\\*|has_lock|has_utimens|has_bmap)$"]).unwrap(),
            25
        );
        assert!(r.resolve(["re:("]).is_err());
    }

    #[test]
    fn test_graph_validation() {
        let unknown = CapabilityGraph::new([("a", Feature::name("nowhere"))]);
        assert!(matches!(unknown, Err(ConfigError::UnknownReference { .. })));

        let cycle = CapabilityGraph::new([
            ("a", Feature::name("b")),
            ("b", Feature::List(vec![Feature::Version(3), Feature::name("a")])),
        ]);
        assert!(matches!(cycle, Err(ConfigError::Cycle(_))));

        let graph = CapabilityGraph::new([
            ("a", Feature::name("b")),
            ("b", Feature::Version(30)),
            ("c", Feature::name("has_read")),
        ])
        .unwrap();
        let r = CapabilityResolver::new(graph);
        assert_eq!(r.resolve(["a", "c"]).unwrap(), 30);
        assert_eq!(r.builtins(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_assert_supported() {
        let r = resolver();
        assert!(r.assert_supported(&FixedVersion(26), ["stateful_io", "has_lock"]).is_ok());

        let err = r
            .assert_supported(&FixedVersion(24), ["stateful_io", "has_lock", "has_create"])
            .unwrap_err();
        match err {
            CapabilityError::Unsupported {
                required,
                available,
                names,
            } => {
                assert_eq!(required, 26);
                assert_eq!(available, 24);
                assert_eq!(names, vec!["has_lock", "has_create"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
