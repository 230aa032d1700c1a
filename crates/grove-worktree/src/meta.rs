//! The work-tree metadata store.
//!
//! A work tree is an absolute filesystem path whose `.grove/` directory
//! holds the control files: format version, uuid, repository path,
//! in-repository path prefix, head reference, base commit, the binary
//! file index, and the zero-length lock file carrying the advisory
//! lock. Every meta file is a single line ending in `\n`; updates go
//! through a temp file in the metadata directory, an fsync, and a
//! rename.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;
use uuid::Uuid;

use grove_store::lookup;
use grove_types::ObjectId;

use crate::error::{oserr, WorktreeError, WtResult};
use crate::lock::WorktreeLock;
use crate::path;
use crate::repo::Repository;

/// Name of the metadata directory inside a work tree.
pub const GROVE_DIR: &str = ".grove";

/// Current work-tree format version.
pub const FORMAT_VERSION: u32 = 1;

const META_FORMAT: &str = "format";
const META_UUID: &str = "uuid";
const META_REPOSITORY: &str = "repository";
const META_PATH_PREFIX: &str = "path-prefix";
const META_HEAD_REF: &str = "head-ref";
const META_BASE_COMMIT: &str = "base-commit";
const META_FILE_INDEX: &str = "file-index";
const META_LOCK: &str = "lock";
const META_HISTEDIT_SCRIPT: &str = "histedit-script";

/// An open work tree.
///
/// Holds the advisory lock for its whole lifetime; `open` leaves the
/// lock shared, mutating operations upgrade to exclusive and downgrade
/// back on completion.
pub struct Worktree {
    root: PathBuf,
    repo_path: PathBuf,
    path_prefix: String,
    head_ref: String,
    base_commit: ObjectId,
    uuid: String,
    lock: WorktreeLock,
}

fn create_meta_file(meta_dir: &Path, name: &str, content: Option<&str>) -> WtResult<()> {
    let path = meta_dir.join(name);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    if let Some(content) = content {
        file.write_all(content.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok(())
}

fn update_meta_file(meta_dir: &Path, name: &str, content: &str) -> WtResult<()> {
    let path = meta_dir.join(name);
    let mut tmp = tempfile::NamedTempFile::new_in(meta_dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| WorktreeError::Io(e.error))?;
    Ok(())
}

fn read_meta_file(meta_dir: &Path, name: &str) -> WtResult<String> {
    let path = meta_dir.join(name);
    let mut file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if oserr::missing(&e) => {
            return Err(WorktreeError::MetaCorrupt(format!("missing {name}")))
        }
        Err(e) => return Err(e.into()),
    };
    if file.try_lock_shared().is_err() {
        return Err(WorktreeError::Busy);
    }
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    match content.strip_suffix('\n') {
        Some(stripped) => Ok(stripped.to_string()),
        None => Err(WorktreeError::MetaCorrupt(format!("truncated {name}"))),
    }
}

impl Worktree {
    /// Initialize a new work tree at `wtpath` tracking `head_ref` of the
    /// repository, mirroring the in-repository path `prefix`.
    ///
    /// Every control file is created exactly once; initializing a path
    /// twice fails.
    pub fn init(wtpath: &Path, repo: &Repository, head_ref: &str, prefix: &str) -> WtResult<()> {
        if wtpath == repo.path() {
            return Err(WorktreeError::BadPath(
                "work tree cannot share the repository path".into(),
            ));
        }

        let commit_id = repo.refs().resolve_name(head_ref)?;
        // The head must name a commit object.
        lookup::read_commit(repo.store(), &commit_id)?;

        let absprefix = if prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{prefix}")
        };

        match fs::create_dir(wtpath) {
            Ok(()) => {}
            Err(e) if oserr::exists(&e) => {}
            Err(e) => return Err(e.into()),
        }
        let meta_dir = wtpath.join(GROVE_DIR);
        match fs::create_dir(&meta_dir) {
            Ok(()) => {}
            Err(e) if oserr::exists(&e) => {}
            Err(e) => return Err(e.into()),
        }

        create_meta_file(&meta_dir, META_LOCK, None)?;
        create_meta_file(&meta_dir, META_FILE_INDEX, None)?;
        create_meta_file(&meta_dir, META_HEAD_REF, Some(head_ref))?;
        create_meta_file(&meta_dir, META_BASE_COMMIT, Some(&commit_id.to_hex()))?;
        create_meta_file(
            &meta_dir,
            META_REPOSITORY,
            Some(&repo.path().display().to_string()),
        )?;
        create_meta_file(&meta_dir, META_PATH_PREFIX, Some(&absprefix))?;
        create_meta_file(&meta_dir, META_UUID, Some(&Uuid::new_v4().to_string()))?;
        create_meta_file(&meta_dir, META_FORMAT, Some(&FORMAT_VERSION.to_string()))?;

        debug!(path = %wtpath.display(), head = head_ref, "initialized work tree");
        Ok(())
    }

    fn open_at(root: &Path) -> WtResult<Self> {
        let meta_dir = root.join(GROVE_DIR);
        let lock = WorktreeLock::acquire_exclusive(&meta_dir.join(META_LOCK))?;

        let formatstr = read_meta_file(&meta_dir, META_FORMAT)?;
        let version: u32 = formatstr
            .parse()
            .map_err(|_| WorktreeError::MetaCorrupt("unparsable format".into()))?;
        if version != FORMAT_VERSION {
            return Err(WorktreeError::WrongVersion {
                expected: FORMAT_VERSION,
                actual: version,
            });
        }

        let repo_path = PathBuf::from(read_meta_file(&meta_dir, META_REPOSITORY)?);
        let path_prefix = read_meta_file(&meta_dir, META_PATH_PREFIX)?;
        let base_commit = ObjectId::from_hex(&read_meta_file(&meta_dir, META_BASE_COMMIT)?)
            .map_err(|e| WorktreeError::MetaCorrupt(e.to_string()))?;
        let uuid = read_meta_file(&meta_dir, META_UUID)?;
        let head_ref = read_meta_file(&meta_dir, META_HEAD_REF)?;

        let wt = Self {
            root: root.to_path_buf(),
            repo_path,
            path_prefix,
            head_ref,
            base_commit,
            uuid,
            lock,
        };
        // Open leaves the lock shared; mutations upgrade as needed.
        wt.lock.lock_shared()?;
        Ok(wt)
    }

    /// Open the work tree containing `path`, walking parent directories
    /// until the metadata directory is found.
    pub fn open(path: &Path) -> WtResult<Self> {
        // Subsequent path comparisons rely on the canonical root.
        let start = fs::canonicalize(path)?;
        let mut current: &Path = &start;
        loop {
            match Self::open_at(current) {
                Err(WorktreeError::NotAWorktree(_)) => match current.parent() {
                    Some(parent) => current = parent,
                    None => {
                        return Err(WorktreeError::NotAWorktree(start.display().to_string()))
                    }
                },
                other => return other,
            }
        }
    }

    /// The work tree's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The associated repository path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// The in-repository path this work tree mirrors.
    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// The reference the work tree tracks.
    pub fn head_ref(&self) -> &str {
        &self.head_ref
    }

    /// The commit the work tree was last fully synced to.
    pub fn base_commit(&self) -> ObjectId {
        self.base_commit
    }

    /// The work tree's stable identity.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The metadata directory.
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(GROVE_DIR)
    }

    /// On-disk path of the file index.
    pub fn fileindex_path(&self) -> PathBuf {
        self.meta_dir().join(META_FILE_INDEX)
    }

    /// On-disk path of the histedit script.
    pub fn histedit_script_path(&self) -> PathBuf {
        self.meta_dir().join(META_HISTEDIT_SCRIPT)
    }

    /// Point the work tree at a different head reference.
    pub fn set_head_ref(&mut self, name: &str) -> WtResult<()> {
        update_meta_file(&self.meta_dir(), META_HEAD_REF, name)?;
        self.head_ref = name.to_string();
        Ok(())
    }

    /// Record a new base commit. The id must name a commit object.
    pub fn set_base_commit(&mut self, repo: &Repository, id: ObjectId) -> WtResult<()> {
        lookup::read_commit(repo.store(), &id)?;
        update_meta_file(&self.meta_dir(), META_BASE_COMMIT, &id.to_hex())?;
        self.base_commit = id;
        Ok(())
    }

    /// Upgrade to the exclusive work-tree lock, non-blocking.
    pub fn lock_exclusive(&self) -> WtResult<()> {
        self.lock.lock_exclusive()
    }

    /// Downgrade to the shared work-tree lock, non-blocking.
    pub fn lock_shared(&self) -> WtResult<()> {
        self.lock.lock_shared()
    }

    /// Map a work-tree-relative path to its on-disk location.
    pub fn ondisk_path(&self, relpath: &str) -> PathBuf {
        path::ondisk_path(&self.root, relpath)
    }

    /// Map a work-tree-relative path to its in-repository path.
    pub fn in_repo_path(&self, relpath: &str) -> String {
        if relpath.is_empty() {
            self.path_prefix.clone()
        } else if path::is_root_dir(&self.path_prefix) {
            format!("/{relpath}")
        } else {
            format!("{}/{relpath}", self.path_prefix)
        }
    }

    /// Resolve a user-supplied path to a work-tree-relative path.
    ///
    /// Absolute arguments must lie inside the work tree; relative
    /// arguments are taken as already work-tree-relative. Trailing
    /// slashes are stripped because the status walk cannot handle them.
    pub fn resolve_path(&self, arg: &str) -> WtResult<String> {
        let resolved = if arg.starts_with('/') {
            let canonical = path::canonicalize(arg)?;
            let root = self.root.to_string_lossy().into_owned();
            if !path::is_child(&canonical, &root) {
                return Err(WorktreeError::BadPath(arg.to_string()));
            }
            path::skip_common_ancestor(&root, &canonical)?
        } else {
            path::canonicalize(arg)?
        };
        Ok(resolved.trim_end_matches('/').to_string())
    }
}

impl std::fmt::Debug for Worktree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worktree")
            .field("root", &self.root)
            .field("head_ref", &self.head_ref)
            .field("base_commit", &self.base_commit)
            .finish()
    }
}
