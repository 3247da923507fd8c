use crate::resource_id::NamespacedName;
use anyhow::Result;

/// Makes TLS Secrets available to the data plane as files on disk.
///
/// Implementations must be idempotent per Secret: repeated requests for the
/// same Secret return the same path, and the file at that path is stable until
/// the next processing cycle.
pub trait SecretMaterializer: Send + Sync {
    /// Requests that the named Secret be written to disk, returning the path
    /// of the certificate file.
    fn request(&self, name: &NamespacedName) -> Result<String>;
}
