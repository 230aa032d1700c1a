//! Installing and merging files on disk.
//!
//! These are the primitives checkout and the merge drivers build on:
//! `install_blob` and `install_symlink` place repository content into
//! the work tree, `merge_file` and `merge_symlink` fold incoming
//! changes into locally modified files. All of them finish with either
//! an atomic rename or a refusal; none leaves a partially written file
//! at the target path.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use tracing::debug;

use grove_index::IndexFileType;
use grove_merge::{merge3, CONFLICT_MARKER_BEGIN, CONFLICT_MARKER_END, CONFLICT_MARKER_SEP};

use crate::error::{oserr, WorktreeError, WtResult};
use crate::meta::{Worktree, GROVE_DIR};
use crate::path;
use crate::status::FileStatus;
use crate::ProgressFn;

/// Longest symlink target installable as a symlink; targets at or over
/// this length are demoted to bad-symlink regular files.
pub const SYMLINK_TARGET_MAX: usize = 4096;

/// Default permission bits for installed files.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Create a directory (and its missing parents) inside the work tree.
///
/// An existing directory is fine; anything else on the path is an
/// obstruction.
pub fn add_dir_on_disk(wt: &Worktree, relpath: &str) -> WtResult<()> {
    let abspath = wt.ondisk_path(relpath);
    match fs::create_dir_all(&abspath) {
        Ok(()) => Ok(()),
        Err(e) if oserr::exists(&e) => {
            let meta = fs::symlink_metadata(&abspath)?;
            if meta.is_dir() {
                Ok(())
            } else {
                Err(WorktreeError::Obstructed(relpath.to_string()))
            }
        }
        Err(e) => {
            // create_dir_all reports an obstructed ancestor as NotADirectory.
            if e.raw_os_error() == Some(20) {
                Err(WorktreeError::Obstructed(relpath.to_string()))
            } else {
                Err(e.into())
            }
        }
    }
}

/// Unlink a work-tree file and prune now-empty parent directories up to
/// the root.
pub fn remove_ondisk_file(root: &Path, relpath: &str) -> WtResult<()> {
    let ondisk = path::ondisk_path(root, relpath);
    match fs::remove_file(&ondisk) {
        Ok(()) => {}
        Err(e) if oserr::missing(&e) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let mut parent = ondisk.parent();
    while let Some(dir) = parent {
        if dir == root {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        parent = dir.parent();
    }
    Ok(())
}

fn apply_exec_bit(abspath: &Path, executable: bool) -> WtResult<()> {
    let meta = fs::symlink_metadata(abspath)?;
    let mode = meta.permissions().mode();
    let new_mode = if executable { mode | 0o100 } else { mode & !0o100 };
    if new_mode != mode {
        fs::set_permissions(abspath, fs::Permissions::from_mode(new_mode))?;
    }
    Ok(())
}

/// Install blob content at `ondisk`.
///
/// Creation is exclusive; an existing regular file is replaced through
/// a sibling temp file and rename, and a non-regular obstruction is
/// refused. The executable bit follows the tree entry mode.
pub fn install_blob(
    wt: &Worktree,
    ondisk: &Path,
    relpath: &str,
    executable: bool,
    content: &[u8],
    restoring_missing: bool,
    reverting: bool,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    let mut update = false;
    let file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(DEFAULT_FILE_MODE)
        .open(ondisk)
    {
        Ok(f) => Some(f),
        Err(e) if oserr::missing(&e) => {
            add_dir_on_disk(wt, path::dirname(relpath))?;
            Some(
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(DEFAULT_FILE_MODE)
                    .open(ondisk)?,
            )
        }
        Err(e) if oserr::exists(&e) => {
            let meta = fs::symlink_metadata(ondisk)?;
            if !meta.file_type().is_file() {
                return Err(WorktreeError::Obstructed(relpath.to_string()));
            }
            update = true;
            None
        }
        Err(e) => return Err(e.into()),
    };

    let status = if restoring_missing {
        FileStatus::Missing
    } else if reverting {
        FileStatus::Revert
    } else if update {
        FileStatus::Update
    } else {
        FileStatus::Add
    };
    progress(status, relpath)?;

    if let Some(mut file) = file {
        file.write_all(content)?;
        file.sync_all()?;
    } else {
        let parent = ondisk.parent().unwrap_or(wt.root());
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(ondisk).map_err(|e| WorktreeError::Io(e.error))?;
    }
    apply_exec_bit(ondisk, executable)?;
    Ok(())
}

fn symlink_via_temp(parent: &Path, target: &str, ondisk: &Path) -> WtResult<()> {
    // Reserve a unique sibling name, then drop the placeholder and put
    // the symlink there before renaming it over the destination.
    let placeholder = tempfile::NamedTempFile::new_in(parent)?;
    let tmp_path = placeholder.path().to_path_buf();
    drop(placeholder);
    std::os::unix::fs::symlink(target, &tmp_path)?;
    fs::rename(&tmp_path, ondisk)?;
    Ok(())
}

/// Install a symlink at `ondisk`.
///
/// Targets that escape the work tree, point into the metadata
/// directory, or exceed [`SYMLINK_TARGET_MAX`] are written as regular
/// files carrying the target bytes; the returned file type says which
/// representation was installed.
pub fn install_symlink(
    wt: &Worktree,
    ondisk: &Path,
    relpath: &str,
    target: &str,
    restoring_missing: bool,
    reverting: bool,
    progress: &mut ProgressFn<'_>,
) -> WtResult<IndexFileType> {
    if target.len() >= SYMLINK_TARGET_MAX
        || path::is_bad_symlink_target(target, ondisk, wt.root(), GROVE_DIR)
    {
        debug!(path = relpath, "unsafe symlink target, installing as file");
        install_blob(
            wt,
            ondisk,
            relpath,
            false,
            target.as_bytes(),
            restoring_missing,
            reverting,
            progress,
        )?;
        return Ok(IndexFileType::BadSymlink);
    }

    let mut update = false;
    match std::os::unix::fs::symlink(target, ondisk) {
        Ok(()) => {}
        Err(e) if oserr::missing(&e) => {
            add_dir_on_disk(wt, path::dirname(relpath))?;
            std::os::unix::fs::symlink(target, ondisk)?;
        }
        Err(e) if oserr::exists(&e) => {
            let parent = ondisk.parent().unwrap_or(wt.root());
            symlink_via_temp(parent, target, ondisk)?;
            update = true;
        }
        Err(e) => return Err(e.into()),
    }

    let status = if restoring_missing {
        FileStatus::Missing
    } else if reverting {
        FileStatus::Revert
    } else if update {
        FileStatus::Update
    } else {
        FileStatus::Add
    };
    progress(status, relpath)?;
    Ok(IndexFileType::Symlink)
}

fn write_merged(ondisk: &Path, wtroot: &Path, content: &[u8], mode: u32) -> WtResult<()> {
    let parent = ondisk.parent().unwrap_or(wtroot);
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode & 0o7777))?;
    tmp.as_file().sync_all()?;
    tmp.persist(ondisk).map_err(|e| WorktreeError::Io(e.error))?;
    Ok(())
}

fn binary_merge(base: Option<&[u8]>, deriv: &[u8], local: &[u8], label_deriv: &str, label_local: &str) -> (Vec<u8>, usize) {
    let base = base.unwrap_or(b"");
    if local == deriv || local == base {
        return (deriv.to_vec(), 0);
    }
    if deriv == base {
        return (local.to_vec(), 0);
    }
    let mut out = Vec::new();
    out.extend_from_slice(format!("{CONFLICT_MARKER_BEGIN} {label_deriv}\n").as_bytes());
    out.extend_from_slice(deriv);
    if !deriv.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(format!("{CONFLICT_MARKER_SEP}\n").as_bytes());
    out.extend_from_slice(local);
    if !local.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(format!("{CONFLICT_MARKER_END} {label_local}\n").as_bytes());
    (out, 1)
}

/// Three-way merge of an incoming blob into the on-disk file.
///
/// `base` is the common ancestor (`None` means both sides added the
/// path, so an empty ancestor makes both contents appear in full),
/// `deriv` is the incoming side, and the on-disk file is the local
/// side. The merged result replaces the on-disk file atomically with
/// its permission bits preserved.
///
/// Returns `true` when the merge was clean and the result equals the
/// incoming side byte for byte: the local changes were subsumed and the
/// entry's timestamps may be refreshed.
pub fn merge_file(
    wt: &Worktree,
    base: Option<&[u8]>,
    ondisk: &Path,
    relpath: &str,
    mode: u32,
    deriv: &[u8],
    label_deriv: &str,
    progress: &mut ProgressFn<'_>,
) -> WtResult<bool> {
    // A symlink's "content" is its target, captured before the merge
    // result replaces the link with a regular file.
    let meta = fs::symlink_metadata(ondisk)?;
    let local: Vec<u8> = if meta.file_type().is_symlink() {
        fs::read_link(ondisk)?.to_string_lossy().into_owned().into_bytes()
    } else {
        fs::read(ondisk)?
    };

    let (merged, conflicts) = match (
        base.map(std::str::from_utf8).transpose(),
        std::str::from_utf8(deriv),
        std::str::from_utf8(&local),
    ) {
        (Ok(base_s), Ok(deriv_s), Ok(local_s)) => {
            let result = merge3(base_s.unwrap_or(""), deriv_s, local_s, label_deriv, relpath);
            (result.text.into_bytes(), result.conflicts)
        }
        _ => binary_merge(base, deriv, &local, label_deriv, relpath),
    };

    progress(
        if conflicts > 0 {
            FileStatus::MergeConflict
        } else {
            FileStatus::Merge
        },
        relpath,
    )?;

    let subsumed = conflicts == 0 && merged == deriv;
    write_merged(ondisk, wt.root(), &merged, mode)?;
    Ok(subsumed)
}

/// Three-way merge of symlink targets.
///
/// Clean cases adjust the link in place; disagreement replaces the link
/// with a regular conflict file spelling out all three targets.
/// Returns `true` when local changes were subsumed by the incoming
/// side.
pub fn merge_symlink(
    wt: &Worktree,
    base_target: Option<&str>,
    ondisk: &Path,
    relpath: &str,
    deriv_target: Option<&str>,
    label_deriv: &str,
    label_base: &str,
    progress: &mut ProgressFn<'_>,
) -> WtResult<bool> {
    let meta = fs::symlink_metadata(ondisk)?;
    if !meta.file_type().is_symlink() {
        // The link was replaced locally by a regular file; merge the
        // targets as file content.
        let deriv_bytes = deriv_target.unwrap_or("").as_bytes().to_vec();
        let base_bytes = base_target.map(|t| t.as_bytes().to_vec());
        return merge_file(
            wt,
            base_bytes.as_deref(),
            ondisk,
            relpath,
            meta.permissions().mode(),
            &deriv_bytes,
            label_deriv,
            progress,
        );
    }

    let local = fs::read_link(ondisk)?.to_string_lossy().into_owned();

    if deriv_target == Some(local.as_str()) {
        // Both sides agree.
        progress(FileStatus::Merge, relpath)?;
        return Ok(true);
    }
    if base_target == Some(local.as_str()) {
        // Local side unchanged; take the incoming target.
        match deriv_target {
            Some(target) => {
                install_symlink(wt, ondisk, relpath, target, false, false, progress)?;
            }
            None => {
                remove_ondisk_file(wt.root(), relpath)?;
                progress(FileStatus::Delete, relpath)?;
            }
        }
        return Ok(true);
    }
    if base_target == deriv_target {
        // Incoming side unchanged; keep the local target.
        return Ok(false);
    }

    // Both sides changed the target to different strings: a regular
    // file spelling out the disagreement replaces the link.
    let mut content = String::new();
    content.push_str(&format!("{CONFLICT_MARKER_BEGIN} {label_deriv}\n"));
    content.push_str(deriv_target.unwrap_or("(symlink was deleted)"));
    content.push('\n');
    if let Some(base) = base_target {
        content.push_str(&format!("{label_base}\n{base}\n"));
    }
    content.push_str(&format!("{CONFLICT_MARKER_SEP}\n"));
    content.push_str(&local);
    content.push('\n');
    content.push_str(&format!("{CONFLICT_MARKER_END}\n"));

    progress(FileStatus::MergeConflict, relpath)?;
    write_merged(ondisk, wt.root(), content.as_bytes(), DEFAULT_FILE_MODE)?;
    Ok(false)
}
