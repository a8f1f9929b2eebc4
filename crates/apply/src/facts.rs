//! The facts proxy policies read host information through. Unknown keys
//! return `Value::Absent`, which is falsy and absorptive, so a policy
//! written against a fact that some hosts lack never crashes.

use std::cell::RefCell;
use std::collections::BTreeSet;

use fleet_domain::Value;

pub struct Facts {
    data: Value,
    accessed: RefCell<BTreeSet<String>>,
}

impl Facts {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            accessed: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn get(&self, key: &str) -> Value {
        self.accessed.borrow_mut().insert(key.to_string());
        self.data.get(key)
    }

    /// Dotted-path lookup, e.g. `"interfaces.eth0.mac"`.
    pub fn get_path(&self, path: &str) -> Value {
        let mut cur = self.data.clone();
        for segment in path.split('.') {
            self.accessed.borrow_mut().insert(segment.to_string());
            cur = cur.get(segment);
        }
        cur
    }

    /// Every key looked up so far, for a future refresh-request trace.
    pub fn accessed_keys(&self) -> Vec<String> {
        self.accessed.borrow().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_key_is_absent_and_falsy() {
        let facts = Facts::new(Value::Map(BTreeMap::new()));
        let v = facts.get("sys_vendor");
        assert!(matches!(v, Value::Absent));
        assert!(!v.is_truthy());
    }

    #[test]
    fn present_key_round_trips() {
        let mut m = BTreeMap::new();
        m.insert("hostname".to_string(), Value::Str("h1".into()));
        let facts = Facts::new(Value::Map(m));
        assert_eq!(facts.get("hostname"), Value::Str("h1".into()));
        assert!(facts.accessed_keys().contains(&"hostname".to_string()));
    }

    #[test]
    fn dotted_path_chains_through_maps() {
        let mut iface = BTreeMap::new();
        iface.insert("mac".to_string(), Value::Str("aa:bb".into()));
        let mut ifaces = BTreeMap::new();
        ifaces.insert("eth0".to_string(), Value::Map(iface));
        let mut root = BTreeMap::new();
        root.insert("interfaces".to_string(), Value::Map(ifaces));
        let facts = Facts::new(Value::Map(root));
        assert_eq!(facts.get_path("interfaces.eth0.mac"), Value::Str("aa:bb".into()));
        assert!(matches!(facts.get_path("interfaces.eth1.mac"), Value::Absent));
    }
}
