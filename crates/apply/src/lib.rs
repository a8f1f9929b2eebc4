//! The declarative apply engine: policy/tags loading, the facts proxy, the
//! decree tree, and the decree library (§4.6 of the fleet spec).

pub mod decree;
pub mod facts;
pub mod ownermode;
pub mod policy;
pub mod tree;

pub use facts::Facts;
pub use policy::{
    compile_tags, load_policy_tree, load_tags_document, render_decrees, ActivateIf, DecreeSpec, PolicyDocument,
};
pub use tree::{apply, apply_checked, build_tree, provision_tree, DecreeNode};

use fleet_domain::{Result, Value};
use fleet_repository::Repo;

/// Compiles the tags document for `cn`, tolerating an absent tags file (a
/// fleet with no tags defined is not an error; every tag is simply false).
fn load_tags_for(repo: &mut dyn Repo, cn: &str) -> Result<std::collections::BTreeMap<String, bool>> {
    match compile_tags(repo, "tags", cn) {
        Ok(tags) => Ok(tags),
        Err(fleet_domain::Error::PolicyLoad(_)) => Ok(std::collections::BTreeMap::new()),
        Err(e) => Err(e),
    }
}

/// Loads the policy for `cn`, renders its decrees against `cn`'s namespace
/// bindings (subject CN, tag booleans, facts proxy — spec §4.5), builds the
/// tree, provisions it from the repository, and returns it ready for
/// `apply`/`apply_checked`.
pub fn load_and_provision(repo: &mut dyn Repo, cn: &str, facts: Value) -> Result<DecreeNode> {
    let facts = Facts::new(facts);
    let tags = load_tags_for(repo, cn)?;
    let doc = load_policy_tree(repo, "policy")?;
    let decrees = render_decrees(doc.decrees, cn, &facts, &tags);
    let mut root = build_tree(decrees)?;
    provision_tree(&mut root, repo)?;
    Ok(root)
}
