use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::platform::PlatformOs;

/// Installer packages accepted as Play Store distribution.
const VALID_INSTALLERS: &[&str] = &["com.android.vending", "com.google.android.feedback"];

/// Host-platform capability for reading the installer package name. May be
/// absent on some devices; absence is treated as a failed check.
#[async_trait]
pub trait InstallerLookup: Send + Sync {
    async fn installer_package(&self) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerCheck {
    pub ok: bool,
    pub installer: Option<String>,
}

/// Reports whether the running install came from the sanctioned store.
/// Advisory signal only; whether a negative result blocks purchases is the
/// caller's decision (strict installer switch, off by default).
pub struct InstallerVerifier {
    os: PlatformOs,
    lookup: Arc<dyn InstallerLookup>,
}

impl InstallerVerifier {
    pub fn new(os: PlatformOs, lookup: Arc<dyn InstallerLookup>) -> Self {
        Self { os, lookup }
    }

    /// Never fails: any lookup error degrades to `ok=false, installer=None`.
    pub async fn check(&self) -> InstallerCheck {
        if self.os != PlatformOs::Android {
            // No store concept to verify against
            return InstallerCheck {
                ok: true,
                installer: None,
            };
        }

        match self.lookup.installer_package().await {
            Ok(installer) => {
                let ok = installer
                    .as_deref()
                    .is_some_and(|pkg| VALID_INSTALLERS.contains(&pkg));
                InstallerCheck { ok, installer }
            }
            Err(error) => {
                warn!(%error, "Failed to read installer package");
                InstallerCheck {
                    ok: false,
                    installer: None,
                }
            }
        }
    }
}
