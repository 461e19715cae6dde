//! Read-only file trees over module contents
//!
//! Every source hands back a [`FileTree`]: a flat listing of slash-separated,
//! module-root-relative paths plus on-demand reads. Listing is cheap for every
//! backend; contents are only materialised when a file is actually read.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use walkdir::WalkDir;
use zip::ZipArchive;

/// Largest module zip the Go toolchain accepts, compressed or not.
pub const MAX_MODULE_ZIP_SIZE: u64 = 500 << 20;

/// Upper bound on the buffer reserved before reading one zip entry.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// A read-only view of one module's files at one version.
pub trait FileTree: Send + Sync {
    /// All file paths in the tree, slash-separated and relative to the module root.
    fn paths(&self) -> Vec<String>;

    /// Reads one file.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Reads a file as UTF-8 text.
pub fn read_to_string(tree: &dyn FileTree, path: &str) -> io::Result<String> {
    let bytes = tree.read(path)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("file not found: {path}"))
}

/// In-memory file tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.add_file(path, content);
        self
    }
}

impl FileTree for MemoryTree {
    fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| not_found(path))
    }
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileTree for DirTree {
    fn paths(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let rel = entry.path().strip_prefix(&self.root).ok()?;
                let parts: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .collect()
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        if path.split('/').any(|elem| elem == "..") {
            return Err(not_found(path));
        }
        std::fs::read(self.root.join(path))
    }
}

/// A module zip as served by a module proxy or kept in the module cache.
///
/// Entries live under a `{module}@{version}/` prefix; paths are reported with
/// the prefix stripped. Entries are decompressed only when read.
pub struct ZipTree {
    archive: Mutex<ZipArchive<Cursor<Vec<u8>>>>,
    prefix: String,
    paths: Vec<String>,
}

impl ZipTree {
    pub fn from_bytes(bytes: Vec<u8>, prefix: impl Into<String>) -> zip::result::ZipResult<Self> {
        let prefix = prefix.into();
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        let paths = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect();

        Ok(Self {
            archive: Mutex::new(archive),
            prefix,
            paths,
        })
    }
}

impl FileTree for ZipTree {
    fn paths(&self) -> Vec<String> {
        self.paths.clone()
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut archive = self
            .archive
            .lock()
            .map_err(|_| io::Error::other("zip archive lock poisoned"))?;
        let name = format!("{}{}", self.prefix, path);
        let file = match archive.by_name(&name) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => return Err(not_found(path)),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };
        if file.size() > MAX_MODULE_ZIP_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{path} is larger than a module zip may be"),
            ));
        }
        // The declared size is untrusted until the entry is inflated.
        let mut content = Vec::with_capacity(file.size().min(MAX_PREALLOCATION) as usize);
        file.take(MAX_MODULE_ZIP_SIZE).read_to_end(&mut content)?;
        Ok(content)
    }
}

/// A subtree of one git commit; blobs are looked up on demand.
pub struct GitTree {
    repo: Mutex<git2::Repository>,
    tree: git2::Oid,
    paths: Vec<String>,
}

impl GitTree {
    /// Opens the tree of `commit` rooted at `subdir` ("" for the whole commit).
    pub fn new(repo: git2::Repository, commit: git2::Oid, subdir: &str) -> Result<Self, git2::Error> {
        let (tree, paths) = {
            let commit = repo.find_commit(commit)?;
            let mut tree = commit.tree()?;
            if !subdir.is_empty() {
                tree = tree.get_path(Path::new(subdir))?.to_object(&repo)?.peel_to_tree()?;
            }

            let mut paths = Vec::new();
            tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
                if entry.kind() == Some(git2::ObjectType::Blob)
                    && let Some(name) = entry.name()
                {
                    paths.push(format!("{dir}{name}"));
                }
                git2::TreeWalkResult::Ok
            })?;
            (tree.id(), paths)
        };

        Ok(Self {
            repo: Mutex::new(repo),
            tree,
            paths,
        })
    }
}

impl FileTree for GitTree {
    fn paths(&self) -> Vec<String> {
        self.paths.clone()
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let repo = self
            .repo
            .lock()
            .map_err(|_| io::Error::other("git repository lock poisoned"))?;
        let tree = repo.find_tree(self.tree).map_err(io::Error::other)?;
        let entry = tree.get_path(Path::new(path)).map_err(|_| not_found(path))?;
        let blob = entry
            .to_object(&repo)
            .and_then(|object| object.peel_to_blob())
            .map_err(io::Error::other)?;
        Ok(blob.content().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn memory_tree_lists_and_reads_files() {
        let tree = MemoryTree::new()
            .with_file("go.mod", "module example.com/foo\n")
            .with_file("bar/bar.go", "package bar\n");

        assert_eq!(tree.paths(), vec!["bar/bar.go", "go.mod"]);
        assert_eq!(read_to_string(&tree, "bar/bar.go").unwrap(), "package bar\n");
        assert_eq!(
            tree.read("missing.go").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn dir_tree_walks_nested_directories_and_skips_git() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("go.mod"), "module example.com/foo\n").unwrap();
        std::fs::write(root.join("sub/deeper/x.go"), "package deeper\n").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        let tree = DirTree::new(root);
        let mut paths = tree.paths();
        paths.sort();

        assert_eq!(paths, vec!["go.mod", "sub/deeper/x.go"]);
        assert_eq!(
            read_to_string(&tree, "sub/deeper/x.go").unwrap(),
            "package deeper\n"
        );
    }

    #[test]
    fn dir_tree_rejects_parent_references() {
        let temp_dir = TempDir::new().unwrap();
        let tree = DirTree::new(temp_dir.path());

        assert!(tree.read("../etc/passwd").is_err());
    }

    #[test]
    fn zip_tree_strips_module_prefix() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("example.com/foo@v1.0.0/go.mod", options)
                .unwrap();
            zip.write_all(b"module example.com/foo\n").unwrap();
            zip.start_file("example.com/foo@v1.0.0/bar/bar.go", options)
                .unwrap();
            zip.write_all(b"package bar\n").unwrap();
            zip.finish().unwrap();
        }

        let tree = ZipTree::from_bytes(buffer.into_inner(), "example.com/foo@v1.0.0/").unwrap();
        let mut paths = tree.paths();
        paths.sort();

        assert_eq!(paths, vec!["bar/bar.go", "go.mod"]);
        assert_eq!(read_to_string(&tree, "bar/bar.go").unwrap(), "package bar\n");
        assert_eq!(
            tree.read("nope.go").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn zip_tree_reads_entries_beyond_preallocation() {
        let content = "// filler\n".repeat((MAX_PREALLOCATION as usize / 10) + 100);
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("example.com/big@v1.0.0/big.go", options)
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
            zip.finish().unwrap();
        }

        let tree = ZipTree::from_bytes(buffer.into_inner(), "example.com/big@v1.0.0/").unwrap();
        let read = tree.read("big.go").unwrap();

        assert!(read.len() as u64 > MAX_PREALLOCATION);
        assert_eq!(read, content.as_bytes());
    }

    #[test]
    fn git_tree_reads_blobs_from_subdirectory() {
        let temp_dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(temp_dir.path()).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("src/fmt")).unwrap();
        std::fs::write(temp_dir.path().join("src/fmt/print.go"), "package fmt\n").unwrap();
        std::fs::write(temp_dir.path().join("README"), "readme\n").unwrap();

        let commit = {
            let mut index = repo.index().unwrap();
            index
                .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = git2::Signature::now("test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap()
        };

        let tree = GitTree::new(repo, commit, "src").unwrap();

        assert_eq!(tree.paths(), vec!["fmt/print.go"]);
        assert_eq!(read_to_string(&tree, "fmt/print.go").unwrap(), "package fmt\n");
    }
}
