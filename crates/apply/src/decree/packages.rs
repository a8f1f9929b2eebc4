//! `apt-get`-based package management. Faithful to the upstream tool's
//! invocation shape: `dpkg-query` to enumerate installed packages,
//! `apt-get install <name>... <removed>-...` in one invocation unless
//! `gentle`, which marks removals auto and lets `--auto-remove` take them.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;

use fleet_domain::{Error, Result, Value};

use super::Decree;

pub struct PackagesDecree {
    pub install: BTreeMap<String, Option<bool>>,
    pub purge: Option<bool>,
    pub recommends: Option<bool>,
    pub update: bool,
    pub clean: bool,
    pub gentle: bool,

    to_install: BTreeSet<String>,
    to_remove: BTreeSet<String>,
}

impl PackagesDecree {
    pub fn new(
        install: BTreeMap<String, Option<bool>>,
        purge: Option<bool>,
        recommends: Option<bool>,
        update: bool,
        clean: bool,
        gentle: bool,
    ) -> Self {
        Self {
            install,
            purge,
            recommends,
            update,
            clean,
            gentle,
            to_install: BTreeSet::new(),
            to_remove: BTreeSet::new(),
        }
    }

    fn installed_packages(gentle: bool) -> Result<BTreeSet<String>> {
        let arch_out = run_captured(&["dpkg", "--print-architecture"])?;
        let native_arch = arch_out.trim().to_string();
        let default_archs = [native_arch.as_str(), "all"];

        let mut installed = BTreeSet::new();

        if gentle {
            let manual_out = run_captured(&["apt-mark", "showmanual"])?;
            for fullname in manual_out.lines() {
                match fullname.split_once(':') {
                    Some((name, arch)) => {
                        installed.insert(fullname.to_string());
                        if default_archs.contains(&arch) {
                            installed.insert(name.to_string());
                        }
                    }
                    None => {
                        installed.insert(fullname.to_string());
                        for arch in default_archs {
                            installed.insert(format!("{fullname}:{arch}"));
                        }
                    }
                }
            }
        } else {
            let query_out = run_captured(&[
                "dpkg-query",
                "-f",
                "${Package} ${Architecture} ${Version} ${Status}\n",
                "-W",
            ])?;
            for line in query_out.lines() {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 6 {
                    continue;
                }
                let name = fields[0];
                let arch = fields[1];
                let status = fields[5];
                if status == "installed" {
                    installed.insert(format!("{name}:{arch}"));
                    if default_archs.contains(&arch) {
                        installed.insert(name.to_string());
                    }
                }
            }
        }
        Ok(installed)
    }
}

fn run_captured(argv: &[&str]) -> Result<String> {
    let output = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(std::process::Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(Error::Decree(format!(
            "command '{}' failed: {}",
            argv.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn run_checked(argv: &[String], env: &[(&str, &str)]) -> Result<()> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]).stdin(std::process::Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(Error::Decree(format!(
            "command '{}' failed: {}",
            argv.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

impl Decree for PackagesDecree {
    fn needs_update(&mut self) -> Result<bool> {
        let installed = Self::installed_packages(self.gentle)?;
        let mut install = BTreeSet::new();
        let mut remove = BTreeSet::new();
        for (package, action) in &self.install {
            match action {
                None => continue,
                Some(true) => {
                    if !installed.contains(package) {
                        install.insert(package.clone());
                    }
                }
                Some(false) => {
                    if installed.contains(package) {
                        remove.insert(package.clone());
                    }
                }
            }
        }
        self.to_install = install;
        self.to_remove = remove;
        Ok(!self.to_install.is_empty() || !self.to_remove.is_empty())
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        if self.clean {
            run_checked(&["apt-get".into(), "clean".into()], &[])?;
        }

        if !self.to_install.is_empty() && self.update {
            run_checked(&["apt-get".into(), "-qq".into(), "update".into()], &[])?;
        }

        let env = [("UCF_FORCE_CONFFOLD", "1"), ("DEBIAN_FRONTEND", "noninteractive")];

        let mut options = vec!["--option=Dpkg::Options::=--force-confold".to_string(), "-qy".to_string()];
        if !self.to_remove.is_empty() {
            match self.purge {
                Some(true) => options.push("--purge".to_string()),
                Some(false) => options.push("--no-purge".to_string()),
                None => {}
            }
        }
        match self.recommends {
            Some(true) => options.push("--install-recommends".to_string()),
            Some(false) => options.push("--no-install-recommends".to_string()),
            None => {}
        }

        if self.gentle {
            if !self.to_remove.is_empty() {
                let mut argv = vec!["apt-mark".to_string(), "auto".to_string()];
                argv.extend(self.to_remove.iter().cloned());
                run_checked(&argv, &[])?;
                options.push("--auto-remove".to_string());
            }
            let mut argv = vec!["apt-get".to_string()];
            argv.extend(options.clone());
            argv.push("install".to_string());
            argv.extend(self.to_install.iter().cloned());
            run_checked(&argv, &env)?;
        } else {
            let mut argv = vec!["apt-get".to_string()];
            argv.extend(options.clone());
            argv.push("install".to_string());
            argv.extend(self.to_install.iter().cloned());
            argv.extend(self.to_remove.iter().map(|p| format!("{p}-")));
            run_checked(&argv, &env)?;
        }

        if !self.to_install.is_empty() && self.clean {
            run_checked(&["apt-get".into(), "clean".into()], &[])?;
        }

        Ok(())
    }

    fn update_detail(&self) -> Value {
        let mut m = BTreeMap::new();
        m.insert(
            "install".to_string(),
            Value::List(self.to_install.iter().map(|p| Value::Str(p.clone())).collect()),
        );
        m.insert(
            "remove".to_string(),
            Value::List(self.to_remove.iter().map(|p| Value::Str(p.clone())).collect()),
        );
        Value::Map(m)
    }
}
