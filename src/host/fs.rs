// Filesystem helpers behind the host environments

use crate::error::{ConfigureError, StepResult};
use crate::host::Ownership;
use std::fs::File;
use std::path::Path;

/// Set Unix permission bits on `path`
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> StepResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| ConfigureError::permission(path, format!("chmod {:o}: {}", mode, e)))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> StepResult<()> {
    Ok(())
}

/// Current permission bits of `path` (lower 12 bits)
#[cfg(unix)]
pub fn mode_of(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;

    Ok(std::fs::metadata(path)?.permissions().mode() & 0o7777)
}

/// chown `path` to `account` and its group.
///
/// A missing account is not an error: the file keeps its creator as owner.
/// The group falls back to the account's primary group when no group of the
/// same name exists.
#[cfg(unix)]
pub fn chown_to_account(path: &Path, account: &str) -> StepResult<Ownership> {
    use nix::unistd::{chown, Group, User};

    let user = match User::from_name(account) {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(Ownership::Unchanged(format!(
                "account '{}' does not exist",
                account
            )))
        }
        Err(e) => {
            return Ok(Ownership::Unchanged(format!(
                "could not resolve account '{}': {}",
                account, e
            )))
        }
    };

    let gid = match Group::from_name(account) {
        Ok(Some(group)) => group.gid,
        _ => user.gid,
    };

    chown(path, Some(user.uid), Some(gid))
        .map_err(|e| ConfigureError::permission(path, format!("chown {}: {}", account, e)))?;

    Ok(Ownership::Changed {
        uid: user.uid.as_raw(),
        gid: gid.as_raw(),
    })
}

#[cfg(not(unix))]
pub fn chown_to_account(_path: &Path, _account: &str) -> StepResult<Ownership> {
    Ok(Ownership::Unchanged("ownership is not managed on this platform".to_string()))
}

/// Unpack a gzip-compressed tarball into `target`
pub fn extract_tar_gz(bundle: &Path, target: &Path) -> StepResult<()> {
    let install_error = |message: String| ConfigureError::Install {
        bundle: bundle.to_path_buf(),
        message,
    };

    std::fs::create_dir_all(target)
        .map_err(|e| install_error(format!("create {}: {}", target.display(), e)))?;

    let file = File::open(bundle).map_err(|e| install_error(format!("open: {}", e)))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive
        .unpack(target)
        .map_err(|e| install_error(format!("unpack into {}: {}", target.display(), e)))
}

/// Unpack a zip archive into `target`
pub fn extract_zip(bundle: &Path, target: &Path) -> StepResult<()> {
    let install_error = |message: String| ConfigureError::Install {
        bundle: bundle.to_path_buf(),
        message,
    };

    std::fs::create_dir_all(target)
        .map_err(|e| install_error(format!("create {}: {}", target.display(), e)))?;

    let file = File::open(bundle).map_err(|e| install_error(format!("open: {}", e)))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| install_error(format!("read zip: {}", e)))?;
    archive
        .extract(target)
        .map_err(|e| install_error(format!("unpack into {}: {}", target.display(), e)))
}
