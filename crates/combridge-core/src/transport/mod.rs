//! 具体传输
//!
//! 每种传输只负责打开连接并包装成 [`Endpoint`](crate::endpoint::Endpoint)。

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod serial;
pub mod tcp;
