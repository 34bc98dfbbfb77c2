//! Transaction ordering.
//!
//! Install/update entries are sorted so every run-dependency provider
//! that is also in the transaction comes first. Strongly connected
//! components are collapsed and ordered internally by pkgname, with a
//! diagnostic. Removes attached to a replacement are emitted just
//! before their replacement; pure removes go last; hold toggles first.

use crate::transaction::{TransactionAction, TransactionEntry};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::BTreeMap;
use tracing::warn;
use valise_core::pattern_match;

pub(crate) fn order_entries(entries: Vec<TransactionEntry>) -> Vec<TransactionEntry> {
    let mut holds = Vec::new();
    let mut main = Vec::new();
    let mut attached_removes: BTreeMap<String, Vec<TransactionEntry>> = BTreeMap::new();
    let mut pure_removes = Vec::new();

    for entry in entries {
        match entry.action {
            TransactionAction::Hold => holds.push(entry),
            TransactionAction::Remove => match entry.replaced_by.clone() {
                Some(replacement) => {
                    attached_removes.entry(replacement).or_default().push(entry);
                }
                None => pure_removes.push(entry),
            },
            _ => main.push(entry),
        }
    }

    // Deterministic node order keeps the output stable across runs.
    main.sort_by(|a, b| a.record.pkgname.cmp(&b.record.pkgname));
    pure_removes.sort_by(|a, b| a.record.pkgname.cmp(&b.record.pkgname));

    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<_> = (0..main.len()).map(|i| graph.add_node(i)).collect();
    for (dependent_idx, dependent) in main.iter().enumerate() {
        for pattern in &dependent.record.run_depends {
            for (provider_idx, provider) in main.iter().enumerate() {
                if provider_idx == dependent_idx {
                    continue;
                }
                if pattern_match(&provider.record.pkgver, pattern)
                    || provider.record.provides_match(pattern)
                {
                    graph.add_edge(nodes[provider_idx], nodes[dependent_idx], ());
                }
            }
        }
    }

    // Tarjan yields components in reverse topological order; within a
    // component (a dependency cycle) fall back to pkgname order.
    let mut component_order: Vec<Vec<usize>> = tarjan_scc(&graph)
        .into_iter()
        .map(|component| component.into_iter().map(|n| graph[n]).collect::<Vec<_>>())
        .collect();
    component_order.reverse();

    let mut ordered = Vec::with_capacity(main.len());
    for mut component in component_order {
        if component.len() > 1 {
            let members: Vec<&str> =
                component.iter().map(|&i| main[i].record.pkgver.as_str()).collect();
            warn!(cycle = %members.join(" <-> "), "dependency cycle, ordering by name");
        }
        component.sort_by(|&a, &b| main[a].record.pkgname.cmp(&main[b].record.pkgname));
        ordered.extend(component);
    }

    let mut out = Vec::with_capacity(ordered.len() + pure_removes.len() + holds.len());
    out.extend(holds);
    for idx in ordered {
        let entry = main[idx].clone();
        if let Some(removes) = attached_removes.remove(&entry.record.pkgver) {
            out.extend(removes);
        }
        out.push(entry);
    }
    // Replacement removes whose replacement vanished still run, ahead
    // of the pure removes.
    for (_, removes) in attached_removes {
        out.extend(removes);
    }
    out.extend(pure_removes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use valise_core::PackageRecord;

    fn entry(pkgver: &str, depends: &[&str], action: TransactionAction) -> TransactionEntry {
        let mut record = PackageRecord::from_pkgver(pkgver).unwrap();
        record.run_depends = depends.iter().map(ToString::to_string).collect();
        TransactionEntry::new(record, action)
    }

    fn names(entries: &[TransactionEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.record.pkgname.as_str()).collect()
    }

    #[test]
    fn providers_come_first() {
        let out = order_entries(vec![
            entry("app-1.0_1", &["libb>=1.0", "libz>=1.0"], TransactionAction::Install),
            entry("libz-1.0_1", &[], TransactionAction::Install),
            entry("libb-1.0_1", &["libz>=1.0"], TransactionAction::Install),
        ]);
        assert_eq!(names(&out), ["libz", "libb", "app"]);
    }

    #[test]
    fn cycles_order_by_name() {
        let out = order_entries(vec![
            entry("pkgb-1.0_1", &["pkga>=1.0"], TransactionAction::Install),
            entry("pkga-1.0_1", &["pkgb>=1.0"], TransactionAction::Install),
            entry("base-1.0_1", &[], TransactionAction::Install),
        ]);
        // The cycle members stay adjacent, name-ordered.
        let ordered = names(&out);
        let a = ordered.iter().position(|n| *n == "pkga").unwrap();
        let b = ordered.iter().position(|n| *n == "pkgb").unwrap();
        assert_eq!(a + 1, b);
    }

    #[test]
    fn replacement_removes_precede_their_replacement() {
        let mut replaced = entry("old-1.0_1", &[], TransactionAction::Remove);
        replaced.replaced_by = Some("new-1.0_1".into());
        let out = order_entries(vec![
            entry("new-1.0_1", &[], TransactionAction::Install),
            replaced,
            entry("dead-2.0_1", &[], TransactionAction::Remove),
        ]);
        assert_eq!(names(&out), ["old", "new", "dead"]);
        assert_eq!(out[0].action, TransactionAction::Remove);
        assert_eq!(out[2].action, TransactionAction::Remove);
    }
}
