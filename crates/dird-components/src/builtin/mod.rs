//! Built-in components

mod cache_args;
mod cacheevict;
mod cachefile;
mod file_transfer;
mod job_wait;
mod query;
mod query_wait;
mod run;
mod workdir;

pub use cache_args::CacheSet;
pub use cacheevict::CacheEvict;
pub use cachefile::CacheFile;
pub use file_transfer::FileTransfer;
pub use job_wait::JobWait;
pub use query::Query;
pub use query_wait::QueryWait;
pub use run::Run;
pub use workdir::Workdir;

use std::path::Path;

use crate::error::ComponentError;

/// Apply a `user[:group]` ownership spec to a path.
#[cfg(target_family = "unix")]
pub(crate) fn apply_chown(path: &Path, spec: &str) -> Result<(), ComponentError> {
    use nix::unistd::{chown, Group, User};

    let (user_name, group_name) = match spec.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (spec, None),
    };

    let uid = if user_name.is_empty() {
        None
    } else {
        let user = User::from_name(user_name)
            .map_err(|e| ComponentError::Execution(format!("user lookup failed: {}", e)))?
            .ok_or_else(|| ComponentError::Execution(format!("unknown user: {}", user_name)))?;
        Some(user.uid)
    };

    let gid = match group_name {
        None | Some("") => None,
        Some(name) => {
            let group = Group::from_name(name)
                .map_err(|e| ComponentError::Execution(format!("group lookup failed: {}", e)))?
                .ok_or_else(|| ComponentError::Execution(format!("unknown group: {}", name)))?;
            Some(group.gid)
        }
    };

    chown(path, uid, gid)
        .map_err(|e| ComponentError::Execution(format!("chown {} failed: {}", path.display(), e)))
}

#[cfg(not(target_family = "unix"))]
pub(crate) fn apply_chown(_path: &Path, _spec: &str) -> Result<(), ComponentError> {
    Err(ComponentError::Execution(
        "ownership changes are unsupported on this platform".to_string(),
    ))
}
