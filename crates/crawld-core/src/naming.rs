use crawld_model::JobId;

use crate::error::{CoreError, CoreResult};

const MAX_JOB_ID_LEN: usize = 128;

/// Project and version names end up as file names, so they must be
/// non-empty, not `.`/`..`, and free of path separators and NUL.
pub fn check_name(name: &str) -> CoreResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(CoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Job ids name log files, so they are limited to ASCII letters, digits,
/// `-` and `_`.
pub fn check_job_id(id: &JobId) -> CoreResult<()> {
    let s = id.as_str();
    let ok = !s.is_empty()
        && s.len() <= MAX_JOB_ID_LEN
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !ok {
        return Err(CoreError::InvalidName(s.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["shop", "Shop", "shop-2024", "news.v2", "caf\u{e9}"] {
            assert!(check_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_path_like_names() {
        for name in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert!(matches!(check_name(name), Err(CoreError::InvalidName(_))), "{name:?}");
        }
    }

    #[test]
    fn job_ids_are_plain_tokens() {
        assert!(check_job_id(&JobId::generate()).is_ok());
        assert!(check_job_id(&JobId::from("nightly_run-7")).is_ok());
        for id in ["", "../../../escaped", "a/b", "a.b", "with space", "caf\u{e9}"] {
            assert!(
                matches!(check_job_id(&JobId::from(id)), Err(CoreError::InvalidName(_))),
                "{id:?}"
            );
        }
        assert!(check_job_id(&JobId::from("x".repeat(MAX_JOB_ID_LEN + 1))).is_err());
    }
}
