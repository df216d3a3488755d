//! BlueZ 扫描器
//!
//! 使用 bluer (BlueZ D-Bus) 进行一次有时限的发现。
//!
//! 结果顺序：先是扫描期间新出现的设备（按事件顺序），
//! 再是扫描开始前已存在于适配器缓存中的设备。
//! 不设置传输过滤，经典蓝牙（RFCOMM 电台）和 BLE 设备都会出现。

use async_trait::async_trait;
use bluer::AdapterEvent;
use futures_util::StreamExt;
use log::{debug, info};
use std::collections::HashSet;
use std::time::Duration;

use super::{DeviceScanner, ScanError, ScannedDevice};

pub struct BluezScanner {
    session: bluer::Session,
}

impl BluezScanner {
    pub async fn new() -> Result<Self, ScanError> {
        let session = bluer::Session::new().await?;
        Ok(Self { session })
    }

    async fn describe(
        adapter: &bluer::Adapter,
        addr: bluer::Address,
    ) -> Result<ScannedDevice, ScanError> {
        let device = adapter.device(addr)?;
        let name = device.name().await?;
        Ok(ScannedDevice {
            address: addr.to_string(),
            name,
        })
    }
}

#[async_trait]
impl DeviceScanner for BluezScanner {
    async fn scan(&self, timeout: Duration) -> Result<Vec<ScannedDevice>, ScanError> {
        debug!("Getting default adapter for scan");
        let adapter = self
            .session
            .default_adapter()
            .await
            .map_err(|_| ScanError::NoAdapter)?;

        debug!("Powering on adapter '{}' for scan", adapter.name());
        adapter.set_powered(true).await?;
        adapter
            .set_discovery_filter(bluer::DiscoveryFilter::default())
            .await?;

        let discoverer = adapter.discover_devices().await?;
        tokio::pin!(discoverer);

        let mut seen = HashSet::new();
        let mut devices = Vec::new();

        info!("Starting Bluetooth scan for {} seconds", timeout.as_secs());

        let timeout_fut = tokio::time::sleep(timeout);
        tokio::pin!(timeout_fut);

        loop {
            tokio::select! {
                () = &mut timeout_fut => break,
                event = discoverer.next() => match event {
                    Some(AdapterEvent::DeviceAdded(addr)) => {
                        if seen.insert(addr) {
                            match Self::describe(&adapter, addr).await {
                                Ok(device) => devices.push(device),
                                Err(e) => debug!("Skipping {addr}: {e}"),
                            }
                        }
                    }
                    None => break,
                    _ => {}
                },
            }
        }

        // 也检查扫描开始前就已知的设备
        let cached = adapter.device_addresses().await?;
        debug!("Checking {} cached devices", cached.len());
        for addr in cached {
            if seen.insert(addr) {
                match Self::describe(&adapter, addr).await {
                    Ok(device) => devices.push(device),
                    Err(e) => debug!("Skipping cached {addr}: {e}"),
                }
            }
        }

        info!("Scan complete: {} device(s) visible", devices.len());
        Ok(devices)
    }
}
