use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use reqwest::{
    blocking::Client,
    header::{ACCEPT, USER_AGENT},
    StatusCode,
};

use super::error::IngestError;

/// Prefix of the temporary directories created for each download.
pub const TMP_PREFIX: &str = "disponibilidade_";

/// Download `url` into a freshly created temporary directory as `<basename>.csv`.
/// The body is written verbatim.  The directory is left in place, the caller
/// owns it (and its removal) from here on.
///
/// If `tmp_root` is `None`, the directory is created under the system temp dir.
pub fn download_file(
    url: &str,
    basename: &str,
    timeout: Duration,
    tmp_root: Option<&Path>,
) -> Result<PathBuf, IngestError> {
    let transport = |source| IngestError::Transport {
        url: url.to_string(),
        source,
    };
    let client = Client::builder().timeout(timeout).build().map_err(transport)?;
    let mut response = client
        .get(url)
        .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
        .header(ACCEPT, "text/csv,*/*")
        .send()
        .map_err(transport)?;
    if response.status() != StatusCode::OK {
        return Err(IngestError::DownloadStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix(TMP_PREFIX);
    let tmp_dir = match tmp_root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(|e| IngestError::io(tmp_root.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir), e))?;
    let file_path = tmp_dir.path().join(format!("{}.csv", basename));

    let mut out = File::create(&file_path).map_err(|e| IngestError::io(&file_path, e))?;
    let bytes = response.copy_to(&mut out).map_err(transport)?;
    // the directory outlives this function only once the body is on disk
    let dir = tmp_dir.keep();
    debug!("temporary directory {} kept", dir.display());
    info!("downloaded {} bytes from {} to {}", bytes, url, file_path.display());

    Ok(file_path)
}

/// Best-effort removal of a file, logs instead of failing.
pub(crate) fn remove_file_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
