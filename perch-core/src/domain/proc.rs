//! Process domain types and tree reconstruction

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::status::Status;

/// One schedulable unit of a build
///
/// `pid` is the proc's sequence number inside its build and `ppid` the pid
/// of its parent (`0` for root procs, which are the only ones queued).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Proc {
    pub id: i64,
    pub build_id: i64,
    pub pid: i64,
    pub ppid: i64,
    pub pgid: i64,
    pub name: String,
    pub state: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub exit_code: i32,
    pub started: i64,
    pub stopped: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environ: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Proc>,
}

impl Proc {
    pub fn is_root(&self) -> bool {
        self.ppid == 0
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// Arrange a flat proc list into a forest.
///
/// Roots keep their input order, as do siblings. A proc whose parent is not
/// in the list is promoted to a root so that nothing is silently dropped.
pub fn tree(procs: Vec<Proc>) -> Vec<Proc> {
    let pids: HashSet<i64> = procs.iter().map(|p| p.pid).collect();

    let mut roots = Vec::new();
    let mut children: HashMap<i64, Vec<Proc>> = HashMap::new();
    for proc in procs {
        if proc.is_root() || !pids.contains(&proc.ppid) {
            roots.push(proc);
        } else {
            children.entry(proc.ppid).or_default().push(proc);
        }
    }

    let mut forest: Vec<Proc> = roots
        .into_iter()
        .map(|root| attach(root, &mut children))
        .collect();

    // Whatever is left is only reachable through a parent cycle.
    let mut leftovers: Vec<Proc> = children.into_values().flatten().collect();
    leftovers.sort_by_key(|p| p.pid);
    forest.extend(leftovers);
    forest
}

fn attach(mut node: Proc, children: &mut HashMap<i64, Vec<Proc>>) -> Proc {
    if let Some(kids) = children.remove(&node.pid) {
        node.children = kids.into_iter().map(|k| attach(k, children)).collect();
    }
    node
}

/// Find a proc by pid in a flat list.
pub fn find(procs: &[Proc], pid: i64) -> Option<&Proc> {
    procs.iter().find(|p| p.pid == pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: i64, ppid: i64, name: &str) -> Proc {
        Proc {
            id: pid,
            pid,
            ppid,
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tree_nests_children_under_parent() {
        let procs = vec![
            proc(1, 0, "build"),
            proc(2, 1, "clone"),
            proc(3, 1, "test"),
            proc(4, 0, "deploy"),
            proc(5, 4, "publish"),
        ];

        let forest = tree(procs);

        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].name, "build");
        let names: Vec<&str> = forest[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["clone", "test"]);
        assert_eq!(forest[1].children[0].name, "publish");
    }

    #[test]
    fn test_tree_handles_children_listed_before_parent() {
        let forest = tree(vec![proc(2, 1, "step"), proc(1, 0, "root")]);

        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].pid, 2);
    }

    #[test]
    fn test_tree_promotes_orphans_to_roots() {
        let forest = tree(vec![proc(1, 0, "root"), proc(7, 42, "orphan")]);

        let pids: Vec<i64> = forest.iter().map(|p| p.pid).collect();
        assert_eq!(pids, [1, 7]);
    }

    #[test]
    fn test_tree_keeps_cycles() {
        let forest = tree(vec![proc(1, 2, "a"), proc(2, 1, "b")]);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn test_find() {
        let procs = vec![proc(1, 0, "a"), proc(2, 1, "b")];
        assert_eq!(find(&procs, 2).map(|p| p.name.as_str()), Some("b"));
        assert!(find(&procs, 9).is_none());
    }
}
