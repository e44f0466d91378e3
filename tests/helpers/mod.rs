#![allow(dead_code)]

pub mod h2_server;
pub mod h3_server;
pub mod mock_server;
pub mod tls;
