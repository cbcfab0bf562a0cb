use super::Rs485;
use anyhow::{anyhow, Result};

#[cfg(unix)]
pub use serialport::TTYPort as NativePort;
#[cfg(windows)]
pub use serialport::COMPort as NativePort;

// TODO: scan open handles on macOS (lsof) and Windows (CreateFile sharing violation)
pub fn is_port_open(_port_name: &str) -> bool {
    false
}

impl Rs485 for NativePort {
    fn rs485_is_enabled(&self) -> Result<bool> {
        Err(anyhow!("kernel rs485 mode not supported on this platform"))
    }

    fn rs485_enable(&self, _enable: bool) -> Result<()> {
        Err(anyhow!("kernel rs485 mode not supported on this platform"))
    }
}
