//! Process-wide TLS setup for `wss` endpoints.

use std::sync::Once;

static INSTALL: Once = Once::new();

/// Install `ring` as the rustls crypto provider, once per process.
///
/// An application that already installed its own provider keeps it.
pub(crate) fn install_crypto_provider() {
    INSTALL.call_once(|| {
        if rustls::crypto::CryptoProvider::get_default().is_none() {
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
    });
}
