// Filesystem handlers (spec §4.H, §8 scenario 6): admin-authenticated
// object storage rooted at `<root>/Folders`. Every request path is
// resolved and checked against the canonical root before any I/O
// happens; a path that would escape the sandbox is reported as
// `ADMIN_AUTH` so the detail never reaches the wire (spec §7).

use crate::error::NodeError;
use crate::handlers::{check_admin, Cursor};
use crate::protocol::dispatch::HandlerContext;
use crate::status::Status;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolves `relative` against `ctx.config.folders_dir()` and rejects
/// anything whose canonical form does not stay under that root (spec
/// §8: "rejects any target whose real path does not start with
/// `<root>/Folders/`"). The sandbox root itself is canonicalized once
/// per call rather than cached, since the directory can be created
/// lazily by `put_object`.
fn resolve_in_sandbox(ctx: &HandlerContext, relative: &str) -> Result<PathBuf, NodeError> {
    let root = ctx.config.folders_dir();
    std::fs::create_dir_all(&root).map_err(|e| NodeError::FilesystemIo(e.to_string()))?;
    let canonical_root = root.canonicalize().map_err(|e| NodeError::FilesystemIo(e.to_string()))?;

    let candidate = root.join(relative.trim_start_matches(['/', '\\']));
    let resolved = lexically_normalize(&candidate);
    if !resolved.starts_with(&canonical_root) {
        return Err(NodeError::SandboxEscape);
    }
    Ok(resolved)
}

/// Collapses `.`/`..` components without touching the filesystem, so a
/// path into a not-yet-created file can still be validated before
/// `put_object` creates it.
fn lexically_normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Request: `admin_key: [u8; 16]`, `path_len: u16`, `path` (UTF-8
/// bytes). Response: the object's raw bytes.
pub fn get_object(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let admin_key = cur.an()?;
            let len = cur.u16()?;
            let path_bytes = cur.bytes(len as usize)?;
            Ok((admin_key, path_bytes.to_vec()))
        })();
        let (admin_key, path_bytes) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if !check_admin(&ctx, &admin_key) {
            return (Status::AdminAuth, Vec::new());
        }
        let relative = String::from_utf8_lossy(&path_bytes).into_owned();

        let resolved = match resolve_in_sandbox(&ctx, &relative) {
            Ok(p) => p,
            Err(e) => return (e.status(), Vec::new()),
        };
        match std::fs::read(&resolved) {
            Ok(bytes) => (Status::Success, bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Status::FileNotExist, Vec::new()),
            Err(e) => (NodeError::FilesystemIo(e.to_string()).status(), Vec::new()),
        }
    })
}

/// Request: `admin_key: [u8; 16]`, `path_len: u16`, `path`, `data_len:
/// u32`, `data`. Writes (overwriting) the object; parent directories
/// are created as needed.
pub fn put_object(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let admin_key = cur.an()?;
            let path_len = cur.u16()?;
            let path_bytes = cur.bytes(path_len as usize)?.to_vec();
            let data_len = cur.u32()?;
            let data = cur.bytes(data_len as usize)?.to_vec();
            Ok((admin_key, path_bytes, data))
        })();
        let (admin_key, path_bytes, data) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if !check_admin(&ctx, &admin_key) {
            return (Status::AdminAuth, Vec::new());
        }
        let relative = String::from_utf8_lossy(&path_bytes).into_owned();

        let resolved = match resolve_in_sandbox(&ctx, &relative) {
            Ok(p) => p,
            Err(e) => return (e.status(), Vec::new()),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return (NodeError::FilesystemIo(e.to_string()).status(), Vec::new());
            }
        }
        match std::fs::write(&resolved, &data) {
            Ok(()) => (Status::Success, Vec::new()),
            Err(e) => (NodeError::FilesystemIo(e.to_string()).status(), Vec::new()),
        }
    })
}

/// Request: `admin_key: [u8; 16]`, `path_len: u16`, `path`. Removes the
/// object.
pub fn rm_object(ctx: Arc<HandlerContext>, payload: Vec<u8>) -> BoxFuture<'static, (Status, Vec<u8>)> {
    Box::pin(async move {
        let mut cur = Cursor::new(&payload);
        let parsed = (|| -> Result<_, NodeError> {
            let admin_key = cur.an()?;
            let len = cur.u16()?;
            let path_bytes = cur.bytes(len as usize)?;
            Ok((admin_key, path_bytes.to_vec()))
        })();
        let (admin_key, path_bytes) = match parsed {
            Ok(v) => v,
            Err(e) => return (e.status(), Vec::new()),
        };
        if !check_admin(&ctx, &admin_key) {
            return (Status::AdminAuth, Vec::new());
        }
        let relative = String::from_utf8_lossy(&path_bytes).into_owned();

        let resolved = match resolve_in_sandbox(&ctx, &relative) {
            Ok(p) => p,
            Err(e) => return (e.status(), Vec::new()),
        };
        match std::fs::remove_file(&resolved) {
            Ok(()) => (Status::Success, Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Status::FileNotExist, Vec::new()),
            Err(e) => (NodeError::FilesystemIo(e.to_string()).status(), Vec::new()),
        }
    })
}
