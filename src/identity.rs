//! Non-privileged execution identity

use serde::Serialize;
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Refusing to run as root (uid 0); the image must switch to the '{expected}' user")]
    Privileged { expected: String },

    #[error("Running as uid {actual}, expected '{expected}' (uid {expected_uid})")]
    WrongUser {
        actual: u32,
        expected: String,
        expected_uid: u32,
    },

    #[error("Failed to inspect {path}: {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "{path} is owned by {actual_uid}:{actual_gid}, expected {expected_uid}:{expected_gid}"
    )]
    OwnershipMismatch {
        path: PathBuf,
        actual_uid: u32,
        actual_gid: u32,
        expected_uid: u32,
        expected_gid: u32,
    },
}

/// User/group pair the server runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionIdentity {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
}

impl ExecutionIdentity {
    /// `chown` argument for COPY instructions
    pub fn chown(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }

    /// Shell creating the system group and user with a home directory
    pub fn useradd_command(&self) -> String {
        format!(
            "groupadd --system --gid {gid} {group} && \
             useradd --system --uid {uid} --gid {group} --create-home --shell /usr/sbin/nologin {user}",
            gid = self.gid,
            group = self.group,
            uid = self.uid,
            user = self.user
        )
    }

    /// Fails unless `uid` is this identity's uid
    pub fn ensure_running_as(&self, uid: u32) -> Result<(), IdentityError> {
        if uid == 0 {
            return Err(IdentityError::Privileged {
                expected: self.user.clone(),
            });
        }
        if uid != self.uid {
            return Err(IdentityError::WrongUser {
                actual: uid,
                expected: self.user.clone(),
                expected_uid: self.uid,
            });
        }
        Ok(())
    }

    /// Fails when `path` is not owned by this identity
    pub fn check_ownership(&self, path: &Path) -> Result<(), IdentityError> {
        let metadata = std::fs::metadata(path).map_err(|source| IdentityError::Inspect {
            path: path.to_path_buf(),
            source,
        })?;

        if metadata.uid() != self.uid || metadata.gid() != self.gid {
            return Err(IdentityError::OwnershipMismatch {
                path: path.to_path_buf(),
                actual_uid: metadata.uid(),
                actual_gid: metadata.gid(),
                expected_uid: self.uid,
                expected_gid: self.gid,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ExecutionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({}:{})", self.user, self.group, self.uid, self.gid)
    }
}

/// Effective uid of this process (owner of `/proc/self`)
pub fn current_uid() -> Result<u32, IdentityError> {
    proc_self().map(|m| m.uid())
}

pub fn current_gid() -> Result<u32, IdentityError> {
    proc_self().map(|m| m.gid())
}

fn proc_self() -> Result<std::fs::Metadata, IdentityError> {
    let path = Path::new("/proc/self");
    std::fs::metadata(path).map_err(|source| IdentityError::Inspect {
        path: path.to_path_buf(),
        source,
    })
}
