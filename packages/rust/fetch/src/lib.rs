//! Project acquisition for Dossier.
//!
//! A [`ProjectSnapshot`](dossier_shared::ProjectSnapshot) comes either from a
//! JSON file ([`load_snapshot`]) or from the OSF API ([`OsfClient`]). Asset
//! bytes are downloaded on demand by [`HttpAssetFetcher`].

mod assets;
mod jsonapi;
mod osf;
mod snapshot;

use dossier_shared::{DossierError, Result};
use url::Url;

pub use assets::HttpAssetFetcher;
pub use osf::{OsfClient, OsfClientOptions, parse_api_base};
pub use snapshot::{load_snapshot, save_snapshot};

/// Extract a project id from an OSF URL or accept a bare id.
///
/// `https://osf.io/kzc68/`, `https://test.osf.io/kzc68/files/` and `kzc68`
/// all yield `kzc68`.
pub fn parse_project_id(input: &str) -> Result<String> {
    let input = input.trim();

    let candidate = match Url::parse(input) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            if !(host == "osf.io" || host.ends_with(".osf.io")) {
                return Err(DossierError::parse(format!(
                    "not an OSF URL: {input}"
                )));
            }
            url.path_segments()
                .and_then(|mut segments| segments.find(|s| !s.is_empty()))
                .map(str::to_string)
                .ok_or_else(|| DossierError::parse(format!("no project id in URL: {input}")))?
        }
        Err(_) => input.trim_matches('/').to_string(),
    };

    if candidate.is_empty() || !candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DossierError::parse(format!(
            "invalid OSF project id: '{candidate}'"
        )));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_from_url() {
        assert_eq!(parse_project_id("https://osf.io/kzc68/").unwrap(), "kzc68");
        assert_eq!(parse_project_id("https://osf.io/kzc68").unwrap(), "kzc68");
        assert_eq!(
            parse_project_id("https://test.osf.io/abc12/files/osfstorage").unwrap(),
            "abc12"
        );
    }

    #[test]
    fn bare_project_id() {
        assert_eq!(parse_project_id(" kzc68 ").unwrap(), "kzc68");
    }

    #[test]
    fn rejects_other_hosts_and_junk() {
        assert!(parse_project_id("https://example.com/kzc68/").is_err());
        assert!(parse_project_id("https://osf.io/").is_err());
        assert!(parse_project_id("kzc 68").is_err());
        assert!(parse_project_id("").is_err());
    }
}
