//! The decree tree: construction from a parsed policy document, the
//! prepare/provision/apply walks, and summary rendering.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use fleet_domain::{Error, Result, Value};
use fleet_repository::Repo;

use crate::decree::delete::DeleteDecree;
use crate::decree::directory::DirectoryDecree;
use crate::decree::file::{FileDecree, RecursiveFilesDecree};
use crate::decree::packages::PackagesDecree;
use crate::decree::permissions::PermissionsDecree;
use crate::decree::run::RunDecree;
use crate::decree::service::ServiceDecree;
use crate::decree::symlink::SymlinkDecree;
use crate::decree::Decree;
use crate::policy::{ActivateIf, DecreeSpec, NamedDecree, SiblingFlag};

pub enum NodeKind {
    Leaf(Box<dyn Decree>),
    Group(Vec<DecreeNode>),
}

pub struct DecreeNode {
    pub name: String,
    pub activate_if: ActivateIf,
    pub kind: NodeKind,
    pub applied: bool,
    pub updated: bool,
    pub activated: bool,
}

fn build_node(named: NamedDecree) -> Result<DecreeNode> {
    let NamedDecree { name, spec } = named;
    let (activate_if, kind) = build_kind(&name, spec)?;
    Ok(DecreeNode {
        name,
        activate_if,
        kind,
        applied: false,
        updated: false,
        activated: false,
    })
}

fn build_kind(name: &str, spec: DecreeSpec) -> Result<(ActivateIf, NodeKind)> {
    match spec {
        DecreeSpec::File {
            target,
            contents,
            source,
            owner,
            mode,
            makedirs,
            activate_if,
        } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(FileDecree::new(
                PathBuf::from(target),
                contents.map(|s| s.into_bytes()),
                source,
                owner,
                mode,
                makedirs,
            ))),
        )),
        DecreeSpec::RecursiveFiles {
            target,
            source,
            owner,
            mode,
            activate_if,
        } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(RecursiveFilesDecree::new(PathBuf::from(target), source, owner, mode))),
        )),
        DecreeSpec::Symlink {
            target,
            contents,
            owner,
            force,
            activate_if,
        } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(SymlinkDecree::new(PathBuf::from(target), contents, owner, force))),
        )),
        DecreeSpec::Directory {
            target,
            owner,
            mode,
            activate_if,
        } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(DirectoryDecree::new(PathBuf::from(target), owner, mode))),
        )),
        DecreeSpec::Permissions {
            target,
            owner,
            mode,
            missing_ok,
            activate_if,
        } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(PermissionsDecree::new(PathBuf::from(target), owner, mode, missing_ok))),
        )),
        DecreeSpec::Delete { target, force, activate_if } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(DeleteDecree::new(PathBuf::from(target), force))),
        )),
        DecreeSpec::Packages {
            install,
            purge,
            recommends,
            update,
            clean,
            gentle,
            activate_if,
        } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(PackagesDecree::new(install, purge, recommends, update, clean, gentle))),
        )),
        DecreeSpec::Service {
            unit,
            reload,
            restart,
            enable,
            active,
            mask,
            activate_if,
        } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(ServiceDecree::new(unit, reload, restart, enable, active, mask)?)),
        )),
        DecreeSpec::Run { command, activate_if } => Ok((
            activate_if,
            NodeKind::Leaf(Box::new(RunDecree::new(name.to_string(), command))),
        )),
        DecreeSpec::Group { decrees, activate_if } => {
            let children = decrees.into_iter().map(build_node).collect::<Result<Vec<_>>>()?;
            Ok((activate_if, NodeKind::Group(children)))
        }
    }
}

/// Builds the root `Policy` group from a loaded document's top-level
/// decrees, in declaration order.
pub fn build_tree(decrees: Vec<NamedDecree>) -> Result<DecreeNode> {
    let children = decrees.into_iter().map(build_node).collect::<Result<Vec<_>>>()?;
    Ok(DecreeNode {
        name: "policy".to_string(),
        activate_if: ActivateIf::Bool(true),
        kind: NodeKind::Group(children),
        applied: false,
        updated: false,
        activated: false,
    })
}

/// Depth-first: each file-backed leaf reads its `source` through the
/// repository view.
pub fn provision_tree(node: &mut DecreeNode, repo: &mut dyn Repo) -> Result<()> {
    match &mut node.kind {
        NodeKind::Leaf(decree) => decree.provision(repo),
        NodeKind::Group(children) => {
            for child in children {
                provision_tree(child, repo)?;
            }
            Ok(())
        }
    }
}

fn eval_activate_if(pred: &ActivateIf, siblings: &HashMap<String, (bool, bool, bool)>) -> bool {
    match pred {
        ActivateIf::Bool(b) => *b,
        ActivateIf::After { after, when } => siblings
            .get(after)
            .map(|(updated, activated, applied)| match when {
                SiblingFlag::Updated => *updated,
                SiblingFlag::Activated => *activated,
                SiblingFlag::Applied => *applied,
            })
            .unwrap_or(false),
        ActivateIf::AnyOf { any_of } => any_of.iter().any(|p| eval_activate_if(p, siblings)),
        ActivateIf::AllOf { all_of } => all_of.iter().all(|p| eval_activate_if(p, siblings)),
    }
}

fn apply_leaf(decree: &mut dyn Decree, activate_if: &ActivateIf, dry_run: bool, siblings: &HashMap<String, (bool, bool, bool)>) -> Result<(bool, bool, Value)> {
    let mut summary = BTreeMap::new();

    let needs_update = decree.needs_update()?;
    let mut updated = false;
    if needs_update {
        if !dry_run {
            decree.update(false)?;
        }
        updated = true;
        summary.insert("updated".to_string(), decree.update_detail());
    }

    let should_activate = eval_activate_if(activate_if, siblings);
    let mut activated = false;
    if should_activate {
        if !dry_run {
            decree.activate(false)?;
        }
        activated = true;
        summary.insert("activated".to_string(), decree.activate_detail());
    }

    Ok((updated, activated, Value::Map(summary)))
}

fn apply_group(children: &mut [DecreeNode], dry_run: bool) -> Result<(bool, bool, Value)> {
    let mut siblings: HashMap<String, (bool, bool, bool)> = HashMap::new();
    let mut summary = BTreeMap::new();
    let mut any_updated = false;
    let mut any_activated = false;

    for child in children.iter_mut() {
        let child_summary = apply_node(child, dry_run, &siblings)?;
        siblings.insert(child.name.clone(), (child.updated, child.activated, child.applied));
        any_updated |= child.updated;
        any_activated |= child.activated;
        if let Value::Map(m) = &child_summary {
            if !m.is_empty() {
                summary.insert(child.name.clone(), child_summary);
            }
        }
    }

    Ok((any_updated, any_activated, Value::Map(summary)))
}

fn apply_node(node: &mut DecreeNode, dry_run: bool, siblings: &HashMap<String, (bool, bool, bool)>) -> Result<Value> {
    if node.applied {
        return Err(Error::Decree(format!("{}: refused attempt to run twice", node.name)));
    }

    let (updated, activated, summary) = match &mut node.kind {
        NodeKind::Leaf(decree) => apply_leaf(decree.as_mut(), &node.activate_if, dry_run, siblings)?,
        NodeKind::Group(children) => apply_group(children, dry_run)?,
    };

    node.updated = updated;
    node.activated = activated;
    node.applied = true;
    Ok(summary)
}

/// Applies the whole tree once, returning `Ok` with the summary or `Err`
/// if any decree (including a reapply of an already-applied one) failed.
pub fn apply_checked(root: &mut DecreeNode, dry_run: bool) -> Result<Value> {
    apply_node(root, dry_run, &HashMap::new())
}

/// Applies the whole tree, collapsing any failure into `{error: "<msg>"}`
/// rather than propagating it — a single failing decree aborts the whole
/// policy for this agent without taking down the controller's fan-out to
/// other agents.
pub fn apply(root: &mut DecreeNode, dry_run: bool) -> Value {
    match apply_checked(root, dry_run) {
        Ok(v) => v,
        Err(e) => {
            let mut m = BTreeMap::new();
            m.insert("error".to_string(), Value::Str(e.to_string()));
            Value::Map(m)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{load_policy_tree, NamedDecree};
    use fleet_repository::Repo;
    use std::collections::HashMap as Map;

    struct MemRepo(Map<String, Vec<u8>>);

    impl Repo for MemRepo {
        fn get_file(&mut self, path: &str) -> std::io::Result<Vec<u8>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        }
        fn get_files(&mut self, _path: &str) -> std::io::Result<Map<String, Vec<u8>>> {
            Ok(Map::new())
        }
    }

    fn build(toml_src: &str) -> DecreeNode {
        let mut repo = MemRepo(Map::from([("policy".to_string(), toml_src.as_bytes().to_vec())]));
        let doc = load_policy_tree(&mut repo, "policy").unwrap();
        build_tree(doc.decrees).unwrap()
    }

    #[test]
    fn reapply_is_rejected() {
        let mut root = build(
            r#"
            [[decrees]]
            name = "noop"
            kind = "run"
            command = "true"
            "#,
        );
        apply_checked(&mut root, false).unwrap();
        let err = apply_checked(&mut root, false).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn predicate_observes_earlier_sibling_updated_flag() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("marker");
        let mut root = build(&format!(
            r#"
            [[decrees]]
            name = "touch"
            kind = "file"
            target = "{}"
            contents = "x"

            [[decrees]]
            name = "gated"
            kind = "run"
            command = "true"
            activate_if = {{ after = "touch", when = "updated" }}
            "#,
            target.display()
        ));
        apply_checked(&mut root, false).unwrap();
        if let NodeKind::Group(children) = &root.kind {
            assert!(children[0].updated);
            assert!(children[1].activated);
        } else {
            panic!("expected group");
        }
    }

    #[test]
    fn dry_run_reports_update_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("app.cfg");
        let mut root = build(&format!(
            r#"
            [[decrees]]
            name = "cfg"
            kind = "file"
            target = "{}"
            contents = "hello"
            "#,
            target.display()
        ));
        let summary = apply(&mut root, true);
        assert!(!target.exists());
        if let Value::Map(m) = &summary {
            if let Some(Value::Map(child)) = m.get("cfg") {
                assert!(child.contains_key("updated"));
            } else {
                panic!("missing cfg summary");
            }
        }
    }
}
