//! Unix ownership helpers for sockets and output files

use std::ffi::CString;
use std::io;
use std::path::Path;

/// Resolve a user name (or numeric uid) to `(uid, gid)`
pub fn lookup_user(user: &str) -> io::Result<(u32, u32)> {
    if let Ok(uid) = user.parse::<u32>() {
        return passwd_by_uid(uid).map(|gid| (uid, gid.unwrap_or(uid)));
    }

    let name = CString::new(user)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "user name contains NUL"))?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0 as libc::c_char; passwd_buf_len()];

    // SAFETY: every pointer refers to a live local for the duration of the call
    let rc = unsafe {
        libc::getpwnam_r(
            name.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    if result.is_null() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("unknown user '{user}'"),
        ));
    }
    Ok((pwd.pw_uid, pwd.pw_gid))
}

/// Primary gid of `uid`, if the account exists
fn passwd_by_uid(uid: u32) -> io::Result<Option<u32>> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0 as libc::c_char; passwd_buf_len()];

    // SAFETY: as in `lookup_user`
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok((!result.is_null()).then_some(pwd.pw_gid))
}

fn passwd_buf_len() -> usize {
    // SAFETY: sysconf has no memory preconditions
    let len = unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) };
    if len > 0 {
        len as usize
    } else {
        16 * 1024
    }
}

/// Hand `path` over to `user` (name or numeric uid)
pub fn chown_to_user(path: &Path, user: &str) -> io::Result<()> {
    let (uid, gid) = lookup_user(user)?;
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_uid_is_accepted() {
        let (uid, _) = lookup_user("0").unwrap();
        assert_eq!(uid, 0);
    }

    #[test]
    fn test_root_by_name() {
        let (uid, gid) = lookup_user("root").unwrap();
        assert_eq!((uid, gid), (0, 0));
    }

    #[test]
    fn test_unknown_user() {
        let err = lookup_user("no-such-user-dnstap-relay").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_chown_to_current_uid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fstrm");
        std::fs::write(&path, b"").unwrap();

        let uid = unsafe { libc::getuid() };
        chown_to_user(&path, &uid.to_string()).unwrap();
    }
}
