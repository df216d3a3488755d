//! 蓝牙 RFCOMM 端点

use bluer::rfcomm::{SocketAddr, Stream};
use log::info;
use std::io;

use crate::endpoint::{Endpoint, EndpointKind};

/// 连接到 `address` 的 RFCOMM `channel`
pub async fn connect(address: &str, channel: u8) -> io::Result<Endpoint> {
    let addr: bluer::Address = address.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid Bluetooth address '{address}'"),
        )
    })?;

    let stream = Stream::connect(SocketAddr::new(addr, channel)).await?;
    info!("Connected to {address} on channel {channel}");

    Ok(Endpoint::from_stream(
        format!("bluetooth {address}"),
        EndpointKind::Bluetooth,
        stream,
    ))
}
