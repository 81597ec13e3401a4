use std::borrow::Cow;
use std::sync::{Arc, OnceLock, RwLock};

use prometheus_client::registry::Registry;

#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Registry>>,
    moniker: Option<String>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
            moniker: None,
        }
    }

    pub fn global() -> &'static Self {
        global_registry()
    }

    /// Label every metric registered through this handle with `moniker`,
    /// so that several learners can share one registry.
    pub fn with_moniker(&self, moniker: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            moniker: Some(moniker.into()),
        }
    }

    pub fn read<A>(&self, f: impl FnOnce(&Registry) -> A) -> A {
        f(&self.inner.read().expect("poisoned lock"))
    }

    pub fn write<A>(&self, f: impl FnOnce(&mut Registry) -> A) -> A {
        f(&mut self.inner.write().expect("poisoned lock"))
    }

    pub fn with_prefix<A>(&self, prefix: impl AsRef<str>, f: impl FnOnce(&mut Registry) -> A) -> A {
        self.write(|reg| {
            let reg = reg.sub_registry_with_prefix(prefix);

            match &self.moniker {
                Some(moniker) => f(reg.sub_registry_with_label((
                    Cow::Borrowed("moniker"),
                    Cow::Owned(moniker.clone()),
                ))),
                None => f(reg),
            }
        })
    }
}

fn global_registry() -> &'static SharedRegistry {
    static REGISTRY: OnceLock<SharedRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| SharedRegistry::new(Registry::default()))
}

pub fn export<W: core::fmt::Write>(writer: &mut W) -> core::fmt::Result {
    use prometheus_client::encoding::text::encode;

    SharedRegistry::global().read(|registry| encode(writer, registry))
}
