//! Plugin reconciliation.
//!
//! When several sources provide the same plugin id, one candidate wins. The
//! decision is an ordered list of comparators; the first one that expresses a
//! preference decides. Every decision is recorded in a [`Resolution`] so the
//! outcome can be explained later.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::plugin::{ManifestKind, PluginBrief, PluginSource};

/// Reconciliation knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupOptions {
    /// Prefer current-schema manifests over legacy ones.
    pub prefer_current: bool,
    /// Let a higher version from a less authoritative source win.
    pub allow_downgrade: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self { prefer_current: true, allow_downgrade: false }
    }
}

/// The comparator that decided between two candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupRule {
    SchemaKind,
    Version,
    SourcePriority,
    SourcePath,
}

impl DedupRule {
    /// Human-readable reason.
    pub fn describe(self) -> &'static str {
        match self {
            Self::SchemaKind => "current manifest schema preferred over legacy",
            Self::Version => "higher version",
            Self::SourcePriority => "more authoritative source",
            Self::SourcePath => "source path order",
        }
    }
}

type Comparator = fn(&PluginBrief, &PluginBrief, &DedupOptions) -> Ordering;

/// Comparators in precedence order. `Less` means the left candidate wins.
const COMPARATORS: [(DedupRule, Comparator); 4] = [
    (DedupRule::SchemaKind, by_kind),
    (DedupRule::Version, by_version),
    (DedupRule::SourcePriority, by_source_priority),
    (DedupRule::SourcePath, by_source_path),
];

fn kind_rank(kind: ManifestKind) -> u8 {
    match kind {
        ManifestKind::Current => 0,
        ManifestKind::Legacy => 1,
    }
}

fn by_kind(a: &PluginBrief, b: &PluginBrief, opts: &DedupOptions) -> Ordering {
    if !opts.prefer_current {
        return Ordering::Equal;
    }
    kind_rank(a.kind).cmp(&kind_rank(b.kind))
}

fn by_version(a: &PluginBrief, b: &PluginBrief, opts: &DedupOptions) -> Ordering {
    // Without downgrades the version only breaks ties within one source priority.
    if !opts.allow_downgrade && a.source.kind.priority() != b.source.kind.priority() {
        return Ordering::Equal;
    }
    match (semver::Version::parse(&a.version), semver::Version::parse(&b.version)) {
        (Ok(va), Ok(vb)) => vb.cmp(&va),
        _ => Ordering::Equal,
    }
}

fn by_source_priority(a: &PluginBrief, b: &PluginBrief, _opts: &DedupOptions) -> Ordering {
    a.source.kind.priority().cmp(&b.source.kind.priority())
}

fn by_source_path(a: &PluginBrief, b: &PluginBrief, _opts: &DedupOptions) -> Ordering {
    a.source.path.cmp(&b.source.path).then_with(|| a.version.cmp(&b.version))
}

/// Compare two candidates for the same id.
///
/// Returns `Less` when `a` should win, together with the rule that decided.
pub fn compare(
    a: &PluginBrief,
    b: &PluginBrief,
    opts: &DedupOptions,
) -> (Ordering, Option<DedupRule>) {
    for (rule, comparator) in COMPARATORS {
        let ordering = comparator(a, b, opts);
        if ordering != Ordering::Equal {
            return (ordering, Some(rule));
        }
    }
    (Ordering::Equal, None)
}

/// One candidate as recorded in a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub version: String,
    pub kind: ManifestKind,
    pub source: PluginSource,
}

impl From<&PluginBrief> for Candidate {
    fn from(brief: &PluginBrief) -> Self {
        Self { version: brief.version.clone(), kind: brief.kind, source: brief.source.clone() }
    }
}

/// Why a candidate lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub loser: Candidate,
    /// `None` when the candidates were indistinguishable.
    pub rule: Option<DedupRule>,
}

/// Reconciliation trace for one plugin id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub id: String,
    pub winner: Candidate,
    pub candidates: Vec<Candidate>,
    pub decisions: Vec<Decision>,
}

impl Resolution {
    /// Whether more than one source provided this plugin.
    pub fn is_contested(&self) -> bool {
        self.candidates.len() > 1
    }
}

/// Order candidates by a total key before folding.
///
/// The comparator list is not guaranteed transitive (unparseable versions make
/// the version rule a no-op), so the winner is found by folding over a
/// canonical order instead of sorting with it.
fn canonical_order(a: &PluginBrief, b: &PluginBrief) -> Ordering {
    a.source
        .kind
        .priority()
        .cmp(&b.source.kind.priority())
        .then_with(|| a.source.path.cmp(&b.source.path))
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
}

/// Keep one brief per id.
///
/// The output is ordered by id and depends only on the input multiset, not
/// on its order.
pub fn dedup(
    plugins: Vec<PluginBrief>,
    opts: &DedupOptions,
) -> (Vec<PluginBrief>, Vec<Resolution>) {
    let mut groups: BTreeMap<String, Vec<PluginBrief>> = BTreeMap::new();
    for brief in plugins {
        groups.entry(brief.id.clone()).or_default().push(brief);
    }

    let mut winners = Vec::with_capacity(groups.len());
    let mut resolutions = Vec::with_capacity(groups.len());

    for (id, mut candidates) in groups {
        candidates.sort_by(canonical_order);

        let mut winner_idx = 0;
        for (idx, candidate) in candidates.iter().enumerate().skip(1) {
            if compare(candidate, &candidates[winner_idx], opts).0 == Ordering::Less {
                winner_idx = idx;
            }
        }

        let winner = candidates.swap_remove(winner_idx);
        candidates.sort_by(canonical_order);

        let decisions: Vec<Decision> = candidates
            .iter()
            .map(|loser| {
                let (_, rule) = compare(&winner, loser, opts);
                tracing::debug!(
                    plugin = %id,
                    winner = %winner.source.path.display(),
                    loser = %loser.source.path.display(),
                    rule = rule.map_or("none", DedupRule::describe),
                    "Dedup decision"
                );
                Decision { loser: Candidate::from(loser), rule }
            })
            .collect();

        let mut all: Vec<Candidate> = Vec::with_capacity(candidates.len() + 1);
        all.push(Candidate::from(&winner));
        all.extend(candidates.iter().map(Candidate::from));

        let winner_candidate = Candidate::from(&winner);
        resolutions.push(Resolution { id, winner: winner_candidate, candidates: all, decisions });
        winners.push(winner);
    }

    (winners, resolutions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::tests::sample_manifest;
    use crate::plugin::SourceKind;

    fn brief(kind: ManifestKind, version: &str, source: SourceKind, path: &str) -> PluginBrief {
        let mut b = PluginBrief::new(sample_manifest("p", version, path), source);
        b.kind = kind;
        b
    }

    fn winner(plugins: Vec<PluginBrief>, opts: &DedupOptions) -> PluginBrief {
        let (winners, _) = dedup(plugins, opts);
        assert_eq!(winners.len(), 1);
        winners.into_iter().next().unwrap()
    }

    #[test]
    fn test_by_kind() {
        let current = brief(ManifestKind::Current, "1.0.0", SourceKind::File, "/a");
        let legacy = brief(ManifestKind::Legacy, "1.0.0", SourceKind::File, "/b");
        let opts = DedupOptions::default();
        assert_eq!(by_kind(&current, &legacy, &opts), Ordering::Less);

        let off = DedupOptions { prefer_current: false, ..opts };
        assert_eq!(by_kind(&current, &legacy, &off), Ordering::Equal);
    }

    #[test]
    fn test_by_version() {
        let opts = DedupOptions::default();
        let newer = brief(ManifestKind::Current, "1.2.0", SourceKind::Pkg, "/a");
        let older = brief(ManifestKind::Current, "1.1.0", SourceKind::Pkg, "/b");
        assert_eq!(by_version(&newer, &older, &opts), Ordering::Less);

        // Different source priorities: no opinion unless downgrades are allowed.
        let workspace = brief(ManifestKind::Current, "1.1.0", SourceKind::Workspace, "/c");
        assert_eq!(by_version(&newer, &workspace, &opts), Ordering::Equal);
        let allow = DedupOptions { allow_downgrade: true, ..opts };
        assert_eq!(by_version(&newer, &workspace, &allow), Ordering::Less);

        let junk = brief(ManifestKind::Current, "not-semver", SourceKind::Pkg, "/d");
        assert_eq!(by_version(&newer, &junk, &opts), Ordering::Equal);
    }

    #[test]
    fn test_by_source_priority_and_path() {
        let opts = DedupOptions::default();
        let workspace = brief(ManifestKind::Current, "1.0.0", SourceKind::Workspace, "/z");
        let file = brief(ManifestKind::Current, "1.0.0", SourceKind::File, "/a");
        assert_eq!(by_source_priority(&workspace, &file, &opts), Ordering::Less);
        assert_eq!(by_source_path(&file, &workspace, &opts), Ordering::Less);
    }

    #[test]
    fn test_current_beats_legacy_despite_version() {
        let current = brief(ManifestKind::Current, "1.0.0", SourceKind::Workspace, "/ws");
        let legacy = brief(ManifestKind::Legacy, "2.0.0", SourceKind::Pkg, "/pkg");

        let won = winner(vec![legacy, current], &DedupOptions::default());
        assert_eq!(won.kind, ManifestKind::Current);
        assert_eq!(won.version, "1.0.0");
    }

    #[test]
    fn test_source_priority_beats_version_without_downgrade() {
        let pkg = brief(ManifestKind::Current, "1.2.0", SourceKind::Pkg, "/pkg");
        let ws = brief(ManifestKind::Current, "1.1.0", SourceKind::Workspace, "/ws");

        let won = winner(vec![pkg.clone(), ws.clone()], &DedupOptions::default());
        assert_eq!(won.source.kind, SourceKind::Workspace);
        assert_eq!(won.version, "1.1.0");

        let allow = DedupOptions { allow_downgrade: true, ..DedupOptions::default() };
        let won = winner(vec![pkg, ws], &allow);
        assert_eq!(won.version, "1.2.0");
    }

    #[test]
    fn test_version_decides_within_same_source() {
        let a = brief(ManifestKind::Current, "1.2.0", SourceKind::Dir, "/b");
        let b = brief(ManifestKind::Current, "1.10.0", SourceKind::Dir, "/a");
        let won = winner(vec![a, b], &DedupOptions::default());
        assert_eq!(won.version, "1.10.0");
    }

    #[test]
    fn test_dedup_invariant_under_reordering() {
        let candidates = vec![
            brief(ManifestKind::Legacy, "3.0.0", SourceKind::Workspace, "/w"),
            brief(ManifestKind::Current, "1.0.0", SourceKind::Dir, "/d1"),
            brief(ManifestKind::Current, "garbage", SourceKind::Dir, "/d2"),
            brief(ManifestKind::Current, "2.0.0", SourceKind::Dir, "/d3"),
            brief(ManifestKind::Current, "0.5.0", SourceKind::File, "/f"),
        ];
        let opts = DedupOptions::default();
        let expected = winner(candidates.clone(), &opts);

        let mut rotated = candidates.clone();
        for _ in 0..candidates.len() {
            rotated.rotate_left(1);
            let won = winner(rotated.clone(), &opts);
            assert_eq!(won.source, expected.source);
            assert_eq!(won.version, expected.version);
        }
        let mut reversed = candidates;
        reversed.reverse();
        assert_eq!(winner(reversed, &opts).source, expected.source);
    }

    #[test]
    fn test_resolution_records_rules() {
        let ws = brief(ManifestKind::Current, "1.0.0", SourceKind::Workspace, "/ws");
        let legacy = brief(ManifestKind::Legacy, "9.0.0", SourceKind::Workspace, "/old");
        let file = brief(ManifestKind::Current, "1.0.0", SourceKind::File, "/f");

        let (winners, resolutions) = dedup(vec![file, legacy, ws], &DedupOptions::default());
        assert_eq!(winners.len(), 1);
        assert_eq!(resolutions.len(), 1);

        let resolution = &resolutions[0];
        assert!(resolution.is_contested());
        assert_eq!(resolution.candidates.len(), 3);
        assert_eq!(resolution.winner.source.path, std::path::PathBuf::from("/ws"));

        let rules: Vec<Option<DedupRule>> = resolution.decisions.iter().map(|d| d.rule).collect();
        assert!(rules.contains(&Some(DedupRule::SchemaKind)));
        assert!(rules.contains(&Some(DedupRule::SourcePriority)));
    }

    #[test]
    fn test_distinct_ids_untouched() {
        let a = PluginBrief::new(sample_manifest("b", "1.0.0", "/b"), SourceKind::Dir);
        let b = PluginBrief::new(sample_manifest("a", "1.0.0", "/a"), SourceKind::Dir);
        let (winners, resolutions) = dedup(vec![a, b], &DedupOptions::default());

        let ids: Vec<&str> = winners.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(resolutions.iter().all(|r| !r.is_contested()));
    }
}
