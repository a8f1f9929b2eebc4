//! Owner and mode parsing shared by every file-handling decree.

use std::ffi::CString;
use std::mem::MaybeUninit;

use fleet_domain::{Error, Result};

/// `(uid, gid)`, each `None` meaning "leave unchanged".
pub type Owner = (Option<u32>, Option<u32>);

/// Parses `"user"`, `"user:group"`, `":group"`, `"uid"`, `"uid:gid"`, or
/// `None`. The unspecified side of a pair is left as `None` (do not change).
pub fn parse_owner(owner: Option<&str>) -> Result<Owner> {
    let Some(owner) = owner else {
        return Ok((None, None));
    };
    let (user_part, group_part) = match owner.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (owner, None),
    };

    let uid = if user_part.is_empty() {
        None
    } else if let Ok(n) = user_part.parse::<u32>() {
        Some(n)
    } else {
        Some(lookup_uid(user_part)?)
    };

    let gid = match group_part {
        None => None,
        Some("") => {
            if let Some(uid) = uid {
                Some(primary_gid(uid)?)
            } else {
                None
            }
        }
        Some(g) => {
            if let Ok(n) = g.parse::<u32>() {
                Some(n)
            } else {
                Some(lookup_gid(g)?)
            }
        }
    };

    Ok((uid, gid))
}

/// Parses an octal string or integer mode; keeps only the low 12 bits
/// (permission and setuid/setgid/sticky bits).
pub fn parse_mode(mode: Option<&crate::policy::ModeValue>) -> Result<Option<u32>> {
    let Some(mode) = mode else {
        return Ok(None);
    };
    let raw = match mode {
        crate::policy::ModeValue::Int(n) => *n as u32,
        crate::policy::ModeValue::Str(s) => u32::from_str_radix(s.trim_start_matches("0o"), 8)
            .map_err(|e| Error::Decree(format!("invalid mode {s:?}: {e}")))?,
    };
    Ok(Some(raw & 0o7777))
}

fn lookup_uid(name: &str) -> Result<u32> {
    let cname = CString::new(name).map_err(|_| Error::Decree(format!("invalid user name {name:?}")))?;
    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0i8; 16384];
    let rc = unsafe {
        libc::getpwnam_r(
            cname.as_ptr(),
            pwd.as_mut_ptr(),
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return Err(Error::Decree(format!("no such user: {name}")));
    }
    Ok(unsafe { (*result).pw_uid })
}

fn lookup_gid(name: &str) -> Result<u32> {
    let cname = CString::new(name).map_err(|_| Error::Decree(format!("invalid group name {name:?}")))?;
    let mut grp = MaybeUninit::<libc::group>::uninit();
    let mut result: *mut libc::group = std::ptr::null_mut();
    let mut buf = vec![0i8; 16384];
    let rc = unsafe {
        libc::getgrnam_r(
            cname.as_ptr(),
            grp.as_mut_ptr(),
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return Err(Error::Decree(format!("no such group: {name}")));
    }
    Ok(unsafe { (*result).gr_gid })
}

fn primary_gid(uid: u32) -> Result<u32> {
    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0i8; 16384];
    let rc = unsafe { libc::getpwuid_r(uid, pwd.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc != 0 || result.is_null() {
        return Err(Error::Decree(format!("no such uid: {uid}")));
    }
    Ok(unsafe { (*result).pw_gid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ModeValue;

    #[test]
    fn none_owner_changes_nothing() {
        assert_eq!(parse_owner(None).unwrap(), (None, None));
    }

    #[test]
    fn numeric_uid_and_gid() {
        assert_eq!(parse_owner(Some("1000:1000")).unwrap(), (Some(1000), Some(1000)));
    }

    #[test]
    fn group_only() {
        assert_eq!(parse_owner(Some(":1000")).unwrap(), (None, Some(1000)));
    }

    #[test]
    fn uid_only_leaves_gid_unset() {
        assert_eq!(parse_owner(Some("1000")).unwrap(), (Some(1000), None));
    }

    #[test]
    fn mode_keeps_low_twelve_bits() {
        assert_eq!(parse_mode(Some(&ModeValue::Str("0644".into()))).unwrap(), Some(0o644));
        assert_eq!(parse_mode(Some(&ModeValue::Int(0o10644))).unwrap(), Some(0o644));
        assert_eq!(parse_mode(None).unwrap(), None);
    }
}
