//! Parses `/etc/passwd` and `/etc/group` text, the only channel the shell
//! fallback has for `Lookup`/`LookupGroup` (§4.5).

use tether::traits::{GroupRecord, UserRecord};

/// Finds `username`'s line in `/etc/passwd` content (`name:passwd:uid:gid:gecos:home:shell`).
pub(crate) fn find_user(content: &str, username: &str) -> Option<UserRecord> {
    content.lines().find_map(|line| {
        let mut fields = line.splitn(7, ':');
        let name = fields.next()?;
        let _passwd = fields.next()?;
        let uid = fields.next()?;
        let gid = fields.next()?;
        let gecos = fields.next()?;
        let home_dir = fields.next()?;
        let shell = fields.next()?;
        if name != username {
            return None;
        }
        Some(UserRecord {
            uid: uid.parse().ok()?,
            gid: gid.parse().ok()?,
            username: name.to_owned(),
            name: gecos.to_owned(),
            home_dir: home_dir.to_owned(),
            shell: shell.to_owned(),
        })
    })
}

/// Finds `name`'s line in `/etc/group` content (`name:passwd:gid:members`).
pub(crate) fn find_group(content: &str, name: &str) -> Option<GroupRecord> {
    content.lines().find_map(|line| {
        let mut fields = line.splitn(4, ':');
        let group_name = fields.next()?;
        let _passwd = fields.next()?;
        let gid = fields.next()?;
        if group_name != name {
            return None;
        }
        Some(GroupRecord { gid: gid.parse().ok()?, name: group_name.to_owned() })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_matching_passwd_entry() {
        let content = "root:x:0:0:root:/root:/bin/bash\nalice:x:1000:1000:Alice Example:/home/alice:/bin/zsh\n";
        let user = find_user(content, "alice").unwrap();
        assert_eq!(user.uid, 1000);
        assert_eq!(user.gid, 1000);
        assert_eq!(user.home_dir, "/home/alice");
        assert_eq!(user.shell, "/bin/zsh");
    }

    #[test]
    fn missing_user_returns_none() {
        assert!(find_user("root:x:0:0:root:/root:/bin/bash\n", "nobody").is_none());
    }

    #[test]
    fn finds_a_matching_group_entry() {
        let content = "wheel:x:10:alice,bob\ndocker:x:999:\n";
        let group = find_group(content, "docker").unwrap();
        assert_eq!(group.gid, 999);
    }
}
