use crate::error::ConfigError;
use anyhow::{bail, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

static SELECTED: OnceCell<Device> = OnceCell::new();

/// A device.
///
/// Only the host is compiled in. Tensors live in host memory and the heavy kernels
/// (matrix products, convolution, pooling) run on the rayon thread pool.
///
/// # Selection
/// A program selects its device once, before building layers, with
/// [`.select()`](Device::select). Layers default to [`Device::selected()`].
///
/// With a single variant the reselection and mixed device checks can not fail, they are kept
/// for additional backends.
#[derive(Default, Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// The host (cpu).
    #[default]
    Host,
}

impl Device {
    /// The host device.
    pub fn host() -> Self {
        Self::Host
    }
    /// A gpu with `index`.
    ///
    /// **Errors**
    ///
    /// No gpu backend is available, this always fails.
    pub fn gpu(index: usize) -> Result<Self> {
        bail!("Device unavailable: gpu {index} requested but only the host is supported!")
    }
    /// Whether the device is the host.
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }
    /// Selects the device for the program.
    ///
    /// Selecting the same device again is a no-op.
    ///
    /// **Errors**
    ///
    /// [`ConfigError::DeviceReselected`] if a different device was already selected.
    pub fn select(self) -> Result<()> {
        let selected = *SELECTED.get_or_init(|| self);
        if selected != self {
            return Err(ConfigError::DeviceReselected {
                selected,
                requested: self,
            }
            .into());
        }
        tracing::debug!("selected device {self:?}");
        Ok(())
    }
    /// The selected device.
    ///
    /// Selects the host if nothing was selected yet.
    pub fn selected() -> Self {
        *SELECTED.get_or_init(Self::host)
    }
}
