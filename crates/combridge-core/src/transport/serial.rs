//! 串口端点
//!
//! 8N1，无流控。必须在 tokio 运行时内调用（需要注册到 reactor）。

use log::info;
use std::io;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

use crate::endpoint::{Endpoint, EndpointKind};

pub fn open(port: &str, baud_rate: u32) -> io::Result<Endpoint> {
    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(io::Error::from)?;

    info!("Opened serial port {port} at baud rate {baud_rate}");
    Ok(Endpoint::from_stream(
        format!("serial {port}"),
        EndpointKind::Serial,
        stream,
    ))
}
