//! Utilities for configuration and build.
#![warn(missing_docs)]

#[cfg(feature = "node")]
use crate::error::Error;

/// build_version of program
pub fn build_version() -> String {
    let mut infos = vec![];
    if let Some(version) = option_env!("CARGO_PKG_VERSION") {
        infos.push(version);
    };
    if let Some(git_hash) = option_env!("GIT_SHORT_HASH") {
        if !git_hash.is_empty() {
            infos.push(git_hash);
        }
    }
    infos.join("-")
}

/// Expand path with "~" to absolute path.
#[cfg(feature = "node")]
pub fn expand_home<P>(path: P) -> Result<std::path::PathBuf, Error>
where P: AsRef<std::path::Path> {
    let Ok(stripped) = path.as_ref().strip_prefix("~") else {
        return Ok(path.as_ref().to_path_buf());
    };

    let Some(mut p) = home::home_dir() else {
        return Err(Error::HomeDirError);
    };

    p.push(stripped);

    Ok(p)
}

/// Create parent directory of a path if not exists.
#[cfg(feature = "node")]
pub fn ensure_parent_dir<P>(path: P) -> Result<(), Error>
where P: AsRef<std::path::Path> {
    let path = expand_home(path)?;
    let parent = path.parent().ok_or(Error::ParentDirError)?;
    if !parent.is_dir() {
        std::fs::create_dir_all(parent).map_err(|e| Error::CreateFileError(e.to_string()))?;
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_version() {
        assert!(build_version().starts_with(env!("CARGO_PKG_VERSION")));
    }

    #[cfg(feature = "node")]
    #[test]
    fn test_expand_home() {
        let p = expand_home("/tmp/chordring.yaml").unwrap();
        assert_eq!(p, std::path::PathBuf::from("/tmp/chordring.yaml"));
        if let Some(home) = home::home_dir() {
            assert_eq!(expand_home("~/x.yaml").unwrap(), home.join("x.yaml"));
        }
    }
}
