//! Filesystem primitives backed directly by POSIX syscalls via `nix` and
//! `std::fs`, one function per RPC.

use std::os::unix::fs::{DirEntryExt, FileTypeExt, PermissionsExt};

use nix::sys::stat::{FchmodatFlags, Mode, SFlag};
use nix::unistd::{FchownatFlags, Gid, Uid};
use tonic::Status;

use tether_proto::{DirEnt, FileType, StatT, Timespec};

use crate::errno::{io_status, nix_status};

fn timespec_of(sec: i64, nsec: i64) -> Timespec {
    Timespec { sec, nsec }
}

/// `lstat(2)`: never follows the final symlink component.
pub fn lstat(path: &str) -> Result<StatT, Status> {
    let st = nix::sys::stat::lstat(path).map_err(|e| nix_status("Lstat", path, e))?;
    Ok(StatT {
        dev: st.st_dev as u64,
        ino: st.st_ino,
        nlink: st.st_nlink as u64,
        mode: st.st_mode,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u64,
        size: st.st_size,
        blksize: st.st_blksize,
        blocks: st.st_blocks,
        atim: timespec_of(st.st_atime, st.st_atime_nsec),
        mtim: timespec_of(st.st_mtime, st.st_mtime_nsec),
        ctim: timespec_of(st.st_ctime, st.st_ctime_nsec),
    })
}

/// Opens a directory for the streaming `ReadDir` RPC; the caller drives the
/// returned iterator entry-by-entry so each one can be sent as soon as it is
/// read, rather than collecting the whole listing up front.
pub fn open_dir(path: &str) -> Result<std::fs::ReadDir, Status> {
    std::fs::read_dir(path).map_err(|e| io_status("ReadDir", path, &e))
}

/// Converts one `std::fs::DirEntry` into the wire [`DirEnt`] shape.
pub fn dirent_of(entry: std::fs::DirEntry) -> Result<DirEnt, Status> {
    let ino = entry.ino();
    let ft = entry.file_type().map_err(|e| io_status("ReadDir", &entry.path().to_string_lossy(), &e))?;
    let file_type = if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_file() {
        FileType::Regular
    } else if ft.is_fifo() {
        FileType::Fifo
    } else if ft.is_socket() {
        FileType::Socket
    } else if ft.is_char_device() {
        FileType::Char
    } else if ft.is_block_device() {
        FileType::Block
    } else {
        FileType::Unknown
    };
    Ok(DirEnt { ino, file_type, name: entry.file_name().to_string_lossy().into_owned() })
}

/// `chmod(2)`: follows symlinks, matching `std::fs::set_permissions`.
pub fn chmod(path: &str, mode: u32) -> Result<(), Status> {
    nix::sys::stat::fchmodat(None, path, mode_of(mode), FchmodatFlags::FollowSymlink)
        .map_err(|e| nix_status("Chmod", path, e))
}

/// `lchown(2)`: does not follow the final symlink component.
pub fn lchown(path: &str, uid: u32, gid: u32) -> Result<(), Status> {
    nix::unistd::fchownat(None, path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)), FchownatFlags::NoFollowSymlink)
        .map_err(|e| nix_status("Lchown", path, e))
}

/// `mkdir(2)` followed by an explicit `chmod(2)`, since `mkdir`'s mode
/// argument is masked by the process umask and the caller's mode must be
/// applied exactly.
pub fn mkdir(path: &str, mode: u32) -> Result<(), Status> {
    nix::unistd::mkdir(path, mode_of(mode)).map_err(|e| nix_status("Mkdir", path, e))?;
    chmod(path, mode)
}

/// `symlink(2)`.
pub fn symlink(target: &str, link_path: &str) -> Result<(), Status> {
    std::os::unix::fs::symlink(target, link_path).map_err(|e| io_status("Symlink", link_path, &e))
}

/// `readlink(2)`.
pub fn readlink(path: &str) -> Result<String, Status> {
    let dest = std::fs::read_link(path).map_err(|e| io_status("Readlink", path, &e))?;
    Ok(dest.to_string_lossy().into_owned())
}

/// Removes a single file or empty directory, dispatching on `lstat`'s
/// reported type rather than probing both `unlink` and `rmdir`.
pub fn remove(path: &str) -> Result<(), Status> {
    let st = nix::sys::stat::lstat(path).map_err(|e| nix_status("Remove", path, e))?;
    let result = if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
        std::fs::remove_dir(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|e| io_status("Remove", path, &e))
}

/// `mknod(2)`: creates a device, FIFO, or regular file node.
pub fn mknod(path: &str, mode: u32, dev: u64) -> Result<(), Status> {
    let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
    let perm = mode_of(mode & !libc::S_IFMT);
    nix::sys::stat::mknod(path, kind, perm, dev).map_err(|e| nix_status("Mknod", path, e))
}

/// Opens a file for the streaming `ReadFile` RPC.
pub async fn open_for_read(path: &str) -> Result<tokio::fs::File, Status> {
    tokio::fs::File::open(path).await.map_err(|e| io_status("ReadFile", path, &e))
}

/// Creates (or truncates) a file for the streaming `WriteFile`/`AppendFile`
/// RPCs, applying `mode` regardless of umask exactly as [`mkdir`] does.
pub async fn open_for_write(path: &str, mode: u32, append: bool) -> Result<tokio::fs::File, Status> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await
        .map_err(|e| io_status("WriteFile", path, &e))?;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| io_status("WriteFile", path, &e))?;
    Ok(file)
}

fn mode_of(mode: u32) -> Mode {
    Mode::from_bits_truncate(mode)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn path_str(p: &std::path::Path) -> String {
        p.to_str().unwrap().to_owned()
    }

    #[test]
    fn mkdir_applies_mode_exactly_despite_umask() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub");
        mkdir(&path_str(&target), 0o705).unwrap();
        let st = lstat(&path_str(&target)).unwrap();
        assert_eq!(st.mode & 0o777, 0o705);
    }

    #[test]
    fn lstat_does_not_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"hi").unwrap();
        let link = dir.path().join("link");
        symlink(&path_str(&target), &path_str(&link)).unwrap();

        let st = lstat(&path_str(&link)).unwrap();
        assert_eq!(st.mode & libc::S_IFMT as u32, libc::S_IFLNK as u32);
    }

    #[test]
    fn readlink_returns_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = path_str(&dir.path().join("target"));
        let link = path_str(&dir.path().join("link"));
        symlink(&target, &link).unwrap();
        assert_eq!(readlink(&link).unwrap(), target);
    }

    #[test]
    fn remove_dispatches_between_unlink_and_rmdir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let subdir = dir.path().join("d");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir(&subdir).unwrap();

        remove(&path_str(&file)).unwrap();
        remove(&path_str(&subdir)).unwrap();
        assert!(!file.exists());
        assert!(!subdir.exists());
    }

    #[test]
    fn read_dir_lists_entries_with_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut entries: Vec<DirEnt> = open_dir(&path_str(dir.path())).unwrap().map(|e| dirent_of(e.unwrap()).unwrap()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].file_type, FileType::Regular);
        assert_eq!(entries[1].name, "sub");
        assert_eq!(entries[1].file_type, FileType::Directory);
    }

    #[test]
    fn lstat_on_missing_path_reports_not_found() {
        let status = lstat("/nonexistent/definitely/not/here").unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
