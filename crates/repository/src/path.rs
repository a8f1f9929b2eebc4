/// Normalizes a repository-relative path: drops `.` segments, consumes
/// leading `/` and any `..` segments pairwise against earlier components,
/// and silently discards excess `..` climbs above the root rather than
/// erroring. The result never starts with `/` and never contains `..`.
pub fn normalize_path(p: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                out.pop();
            }
            seg => out.push(seg),
        }
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn collapses_dot_and_dotdot_segments() {
        assert_eq!(normalize_path("a/./b/../c"), "a/c");
    }

    #[test]
    fn strips_leading_slash() {
        assert_eq!(normalize_path("/x/y"), "x/y");
    }

    #[test]
    fn discards_excess_climbs_above_root() {
        assert_eq!(normalize_path("../../a"), "a");
    }

    #[test]
    fn is_idempotent() {
        for p in ["a/./b/../c", "/x/y", "../../a", "a/b/c", ""] {
            let once = normalize_path(p);
            let twice = normalize_path(&once);
            assert_eq!(once, twice, "not idempotent for {p:?}");
        }
    }
}
