use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Result, anyhow};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
    },
};

use crate::config::Ssl;

/// Where the certificate of a secure endpoint is looked up when no folder is
/// configured.
pub fn default_certificate_folder() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("wshost")
}

/// The certificate files for a port: `{folder}/{port}.cer` and
/// `{folder}/{port}.key`, when both exist.
pub fn find_certificate(folder: &Path, port: u16) -> Option<Ssl> {
    let certificate_chain = folder.join(format!("{port}.cer"));
    let private_key = folder.join(format!("{port}.key"));

    (certificate_chain.is_file() && private_key.is_file()).then(|| Ssl {
        certificate_chain: certificate_chain.to_string_lossy().into_owned(),
        private_key: private_key.to_string_lossy().into_owned(),
    })
}

/// Builds the acceptor of a secure endpoint.
///
/// The per port files win over the default certificate. A secure endpoint
/// without any certificate cannot start.
pub fn acceptor(folder: Option<&Path>, port: u16, default: Option<&Ssl>) -> Result<TlsAcceptor> {
    let folder = folder
        .map(Path::to_path_buf)
        .unwrap_or_else(default_certificate_folder);

    let ssl = match find_certificate(&folder, port) {
        Some(ssl) => ssl,
        None => default
            .cloned()
            .ok_or_else(|| anyhow!("no certificate for secure port: port={port}, folder={folder:?}"))?,
    };

    load(&ssl)
}

pub fn load(ssl: &Ssl) -> Result<TlsAcceptor> {
    Ok(TlsAcceptor::from(Arc::new(
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                CertificateDer::pem_file_iter(&ssl.certificate_chain)?
                    .collect::<Result<Vec<_>, _>>()?,
                PrivateKeyDer::from_pem_file(&ssl.private_key)?,
            )?,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certificate_fails_fast() {
        let folder = std::env::temp_dir().join("wshost-no-certificates");
        assert!(find_certificate(&folder, 443).is_none());
        assert!(acceptor(Some(&folder), 443, None).is_err());
    }
}
