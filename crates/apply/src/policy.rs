//! Policy and tags documents: structured TOML in place of an embedded
//! scripting language (see DESIGN.md for why). A document's `decrees` array
//! preserves declaration order, which the apply phase and sibling
//! predicates depend on.

use std::collections::BTreeSet;

use std::collections::BTreeMap;

use serde::Deserialize;

use fleet_domain::Error;
use fleet_domain::Result;
use fleet_repository::{normalize_path, Repo};

use crate::facts::Facts;

#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum ModeValue {
    Int(i64),
    Str(String),
}

pub fn default_file_mode() -> ModeValue {
    ModeValue::Str("0644".into())
}

pub fn default_dir_mode() -> ModeValue {
    ModeValue::Str("0755".into())
}

fn default_true() -> bool {
    true
}

/// Which flag a sibling predicate observes.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SiblingFlag {
    #[default]
    Updated,
    Activated,
    Applied,
}

/// A decree's activation predicate. Evaluated strictly after earlier
/// siblings have applied, so `After` can observe their output flags.
#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum ActivateIf {
    Bool(bool),
    After {
        after: String,
        #[serde(default)]
        when: SiblingFlag,
    },
    AnyOf {
        any_of: Vec<ActivateIf>,
    },
    AllOf {
        all_of: Vec<ActivateIf>,
    },
}

impl Default for ActivateIf {
    fn default() -> Self {
        ActivateIf::Bool(true)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum RunCommand {
    Shell(String),
    Argv(Vec<String>),
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecreeSpec {
    File {
        target: String,
        #[serde(default)]
        contents: Option<String>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default = "default_file_mode")]
        mode: ModeValue,
        #[serde(default)]
        makedirs: bool,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    RecursiveFiles {
        target: String,
        source: String,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default = "default_file_mode")]
        mode: ModeValue,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Symlink {
        target: String,
        contents: String,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Directory {
        target: String,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default = "default_dir_mode")]
        mode: ModeValue,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Permissions {
        target: String,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default)]
        mode: Option<ModeValue>,
        #[serde(default)]
        missing_ok: bool,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Delete {
        target: String,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Packages {
        #[serde(default)]
        install: std::collections::BTreeMap<String, Option<bool>>,
        #[serde(default)]
        purge: Option<bool>,
        #[serde(default)]
        recommends: Option<bool>,
        #[serde(default = "default_true")]
        update: bool,
        #[serde(default)]
        clean: bool,
        #[serde(default)]
        gentle: bool,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Service {
        unit: String,
        #[serde(default)]
        reload: bool,
        #[serde(default)]
        restart: bool,
        #[serde(default)]
        enable: Option<bool>,
        #[serde(default)]
        active: Option<bool>,
        #[serde(default)]
        mask: Option<bool>,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Run {
        command: RunCommand,
        #[serde(default)]
        activate_if: ActivateIf,
    },
    Group {
        #[serde(default)]
        decrees: Vec<NamedDecree>,
        #[serde(default)]
        activate_if: ActivateIf,
    },
}

#[derive(Deserialize, Clone, Debug)]
pub struct NamedDecree {
    pub name: String,
    #[serde(flatten)]
    pub spec: DecreeSpec,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct PolicyDocument {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub decrees: Vec<NamedDecree>,
}

/// Loads `root_path` and recursively resolves `include`/`require`,
/// accumulating every decree into one document in declaration order.
/// `include` of an already-visited normalized path is an error; `require`
/// of one is silently skipped.
pub fn load_policy_tree(repo: &mut dyn Repo, root_path: &str) -> Result<PolicyDocument> {
    let mut included = BTreeSet::new();
    let mut required = BTreeSet::new();
    let mut names = BTreeSet::new();
    let mut merged = PolicyDocument::default();
    load_into(repo, root_path, &mut included, &mut required, &mut names, &mut merged)?;
    Ok(merged)
}

fn load_document(repo: &mut dyn Repo, normalized: &str) -> Result<PolicyDocument> {
    let bytes = repo
        .get_file(normalized)
        .map_err(|e| Error::policy_load(normalized, 0, e))?;
    let text = String::from_utf8(bytes).map_err(|e| Error::policy_load(normalized, 0, e))?;
    toml::from_str(&text).map_err(|e| Error::policy_load(normalized, 0, e))
}

fn load_into(
    repo: &mut dyn Repo,
    path: &str,
    included: &mut BTreeSet<String>,
    required: &mut BTreeSet<String>,
    names: &mut BTreeSet<String>,
    merged: &mut PolicyDocument,
) -> Result<()> {
    let normalized = normalize_path(path);
    let doc = load_document(repo, &normalized)?;

    for inc in &doc.include {
        let inc_norm = normalize_path(inc);
        if !included.insert(inc_norm.clone()) {
            return Err(Error::PolicyLoad(format!(
                "{normalized}: duplicate include of {inc_norm:?}"
            )));
        }
        load_into(repo, &inc_norm, included, required, names, merged)?;
    }
    for req in &doc.require {
        let req_norm = normalize_path(req);
        if !required.insert(req_norm.clone()) {
            continue;
        }
        load_into(repo, &req_norm, included, required, names, merged)?;
    }
    for named in doc.decrees {
        if !names.insert(named.name.clone()) {
            return Err(Error::PolicyLoad(format!(
                "{normalized}: duplicate decree name {:?}",
                named.name
            )));
        }
        merged.decrees.push(named);
    }
    Ok(())
}

/// Reads the tags document (`tag name -> member CN list`) and compiles it
/// into per-tag booleans for one subject CN.
pub fn compile_tags(repo: &mut dyn Repo, path: &str, cn: &str) -> Result<std::collections::BTreeMap<String, bool>> {
    let doc = load_tags_document(repo, path)?;
    Ok(doc
        .into_iter()
        .map(|(tag, members)| (tag, members.iter().any(|m| m == cn)))
        .collect())
}

/// Reads the raw tags document without compiling it for any one subject;
/// used by the controller to resolve `@tag` targets against connected CNs.
pub fn load_tags_document(
    repo: &mut dyn Repo,
    path: &str,
) -> Result<std::collections::BTreeMap<String, Vec<String>>> {
    let normalized = normalize_path(path);
    let bytes = repo
        .get_file(&normalized)
        .map_err(|e| Error::policy_load(&normalized, 0, e))?;
    let text = String::from_utf8(bytes).map_err(|e| Error::policy_load(&normalized, 0, e))?;
    toml::from_str(&text).map_err(|e| Error::policy_load(&normalized, 0, e))
}

/// Resolves `${cn}`, `${tags.<name>}`, and `${facts.<dotted.path>}`
/// placeholders in a decree field. The evaluator itself stays out of scope
/// (no embedded scripting language, see DESIGN.md); this is the minimal
/// mechanism through which the three namespace bindings a policy is meant
/// to see — subject CN, tag booleans, the facts proxy — actually reach a
/// decree's arguments.
fn render(input: &str, cn: &str, facts: &Facts, tags: &BTreeMap<String, bool>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve_placeholder(&after[..end], cn, facts, tags));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_placeholder(key: &str, cn: &str, facts: &Facts, tags: &BTreeMap<String, bool>) -> String {
    if key == "cn" {
        return cn.to_string();
    }
    if let Some(path) = key.strip_prefix("facts.") {
        return facts.get_path(path).to_string();
    }
    if let Some(name) = key.strip_prefix("tags.") {
        return tags.get(name).copied().unwrap_or(false).to_string();
    }
    String::new()
}

/// Renders every decree's string-valued fields against one subject's
/// namespace bindings, in declaration order, recursing into `Group`.
pub fn render_decrees(decrees: Vec<NamedDecree>, cn: &str, facts: &Facts, tags: &BTreeMap<String, bool>) -> Vec<NamedDecree> {
    decrees.into_iter().map(|d| render_named(d, cn, facts, tags)).collect()
}

fn render_named(named: NamedDecree, cn: &str, facts: &Facts, tags: &BTreeMap<String, bool>) -> NamedDecree {
    let NamedDecree { name, spec } = named;
    NamedDecree {
        name,
        spec: render_spec(spec, cn, facts, tags),
    }
}

fn render_spec(spec: DecreeSpec, cn: &str, facts: &Facts, tags: &BTreeMap<String, bool>) -> DecreeSpec {
    let r = |s: String| render(&s, cn, facts, tags);
    let ro = |s: Option<String>| s.map(|s| render(&s, cn, facts, tags));
    match spec {
        DecreeSpec::File {
            target,
            contents,
            source,
            owner,
            mode,
            makedirs,
            activate_if,
        } => DecreeSpec::File {
            target: r(target),
            contents: ro(contents),
            source: ro(source),
            owner: ro(owner),
            mode,
            makedirs,
            activate_if,
        },
        DecreeSpec::RecursiveFiles {
            target,
            source,
            owner,
            mode,
            activate_if,
        } => DecreeSpec::RecursiveFiles {
            target: r(target),
            source: r(source),
            owner: ro(owner),
            mode,
            activate_if,
        },
        DecreeSpec::Symlink {
            target,
            contents,
            owner,
            force,
            activate_if,
        } => DecreeSpec::Symlink {
            target: r(target),
            contents: r(contents),
            owner: ro(owner),
            force,
            activate_if,
        },
        DecreeSpec::Directory { target, owner, mode, activate_if } => DecreeSpec::Directory {
            target: r(target),
            owner: ro(owner),
            mode,
            activate_if,
        },
        DecreeSpec::Permissions {
            target,
            owner,
            mode,
            missing_ok,
            activate_if,
        } => DecreeSpec::Permissions {
            target: r(target),
            owner: ro(owner),
            mode,
            missing_ok,
            activate_if,
        },
        DecreeSpec::Delete { target, force, activate_if } => DecreeSpec::Delete {
            target: r(target),
            force,
            activate_if,
        },
        DecreeSpec::Packages { .. } => spec,
        DecreeSpec::Service {
            unit,
            reload,
            restart,
            enable,
            active,
            mask,
            activate_if,
        } => DecreeSpec::Service {
            unit: r(unit),
            reload,
            restart,
            enable,
            active,
            mask,
            activate_if,
        },
        DecreeSpec::Run { command, activate_if } => DecreeSpec::Run {
            command: match command {
                RunCommand::Shell(s) => RunCommand::Shell(r(s)),
                RunCommand::Argv(argv) => RunCommand::Argv(argv.into_iter().map(r).collect()),
            },
            activate_if,
        },
        DecreeSpec::Group { decrees, activate_if } => DecreeSpec::Group {
            decrees: decrees.into_iter().map(|d| render_named(d, cn, facts, tags)).collect(),
            activate_if,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemRepo(HashMap<String, Vec<u8>>);

    impl Repo for MemRepo {
        fn get_file(&mut self, path: &str) -> std::io::Result<Vec<u8>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        }
        fn get_files(&mut self, _path: &str) -> std::io::Result<HashMap<String, Vec<u8>>> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn duplicate_include_is_rejected() {
        let mut repo = MemRepo(HashMap::from([(
            "policy".into(),
            br#"include = ["x", "x"]"#.to_vec(),
        )]));
        let err = load_policy_tree(&mut repo, "policy").unwrap_err();
        assert!(err.to_string().contains("duplicate include"));
    }

    #[test]
    fn duplicate_require_is_silently_skipped() {
        let mut files = HashMap::new();
        files.insert("policy".into(), br#"require = ["x", "x"]"#.to_vec());
        files.insert(
            "x".into(),
            br#"
            [[decrees]]
            name = "a"
            kind = "run"
            command = "true"
            "#
            .to_vec(),
        );
        let mut repo = MemRepo(files);
        let doc = load_policy_tree(&mut repo, "policy").unwrap();
        assert_eq!(doc.decrees.len(), 1);
    }

    #[test]
    fn decree_order_is_preserved() {
        let mut files = HashMap::new();
        files.insert(
            "policy".into(),
            br#"
            [[decrees]]
            name = "first"
            kind = "run"
            command = "true"

            [[decrees]]
            name = "second"
            kind = "run"
            command = "true"
            "#
            .to_vec(),
        );
        let mut repo = MemRepo(files);
        let doc = load_policy_tree(&mut repo, "policy").unwrap();
        let names: Vec<_> = doc.decrees.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn tags_compile_to_membership_booleans() {
        let mut repo = MemRepo(HashMap::from([(
            "tags".into(),
            br#"role_web = ["h1", "h2"]"#.to_vec(),
        )]));
        let tags = compile_tags(&mut repo, "tags", "h1").unwrap();
        assert_eq!(tags.get("role_web"), Some(&true));
        let tags = compile_tags(&mut repo, "tags", "h3").unwrap();
        assert_eq!(tags.get("role_web"), Some(&false));
    }
}
