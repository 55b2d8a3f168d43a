use crate::config::SiteConfig;
use crate::identifier::DocumentCode;
use parking_lot::RwLock;
use tracing::info;

/// Supplies the deployment's externally reachable origin.
///
/// Read once per operation; the value may change while the process runs.
pub trait BaseAddressProvider: Send + Sync {
    fn current_base_address(&self) -> String;
}

/// Fixed base address, mostly for tools and tests
#[derive(Debug, Clone)]
pub struct StaticBaseAddress(String);

impl StaticBaseAddress {
    pub fn new(base_address: impl Into<String>) -> Self {
        Self(base_address.into())
    }
}

impl BaseAddressProvider for StaticBaseAddress {
    fn current_base_address(&self) -> String {
        self.0.clone()
    }
}

/// Base address that can be swapped at runtime (e.g. on SIGHUP)
#[derive(Debug)]
pub struct ReloadableBaseAddress {
    current: RwLock<String>,
}

impl ReloadableBaseAddress {
    pub fn new(base_address: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(base_address.into()),
        }
    }

    pub fn from_config(config: &SiteConfig) -> Self {
        Self::new(config.base_address.clone())
    }

    /// Replace the base address. Existing QR images are not touched.
    pub fn set(&self, base_address: impl Into<String>) {
        let base_address = base_address.into();
        let mut current = self.current.write();
        if *current != base_address {
            info!(
                previous = %*current,
                current = %base_address,
                "Base address changed; existing QR codes need regeneration"
            );
            *current = base_address;
        }
    }
}

impl BaseAddressProvider for ReloadableBaseAddress {
    fn current_base_address(&self) -> String {
        self.current.read().clone()
    }
}

/// Builds public viewing URLs: `{base address}{public path}{code}`
#[derive(Debug, Clone)]
pub struct PublicUrls {
    public_path: String,
}

impl PublicUrls {
    pub fn new(public_path: &str) -> Self {
        let mut path = String::with_capacity(public_path.len() + 2);
        if !public_path.starts_with('/') {
            path.push('/');
        }
        path.push_str(public_path);
        if !path.ends_with('/') {
            path.push('/');
        }
        Self { public_path: path }
    }

    pub fn from_config(config: &SiteConfig) -> Self {
        Self::new(&config.public_path)
    }

    /// Route prefix, always with leading and trailing slash
    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    pub fn public_url(&self, base_address: &str, code: &DocumentCode) -> String {
        format!(
            "{}{}{}",
            base_address.trim_end_matches('/'),
            self.public_path,
            code
        )
    }
}

impl Default for PublicUrls {
    fn default() -> Self {
        Self::new("/view/")
    }
}
