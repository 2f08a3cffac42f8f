//! User and group database lookups, backed by `nix`'s bindings to
//! `getpwnam_r`/`getgrnam_r`.

use tonic::Status;

use tether_proto::pb::{GroupReply, UserReply};

/// Looks up a user by name, returning [`Status::not_found`] (with the query
/// string attached) if no such user exists.
pub fn lookup_user(username: &str) -> Result<UserReply, Status> {
    let user = nix::unistd::User::from_name(username)
        .map_err(|e| crate::errno::nix_status("Lookup", username, e))?
        .ok_or_else(|| tether_proto::status_for_unknown("Lookup", username))?;

    Ok(UserReply {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        username: user.name,
        name: user.gecos,
        home_dir: user.dir.to_string_lossy().into_owned(),
        shell: user.shell.to_string_lossy().into_owned(),
    })
}

/// Looks up a group by name, returning [`Status::not_found`] (with the query
/// string attached) if no such group exists.
pub fn lookup_group(name: &str) -> Result<GroupReply, Status> {
    let group = nix::unistd::Group::from_name(name)
        .map_err(|e| crate::errno::nix_status("LookupGroup", name, e))?
        .ok_or_else(|| tether_proto::status_for_unknown("LookupGroup", name))?;

    Ok(GroupReply { gid: group.gid.as_raw(), name: group.name })
}
