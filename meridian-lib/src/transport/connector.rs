// SPDX-FileCopyrightText: © 2025 Huawei Cloud Computing Technologies Co., Ltd
// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Huawei Cloud Computing Technologies Co., Ltd
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

use futures::{future::BoxFuture, FutureExt};
use std::{net::SocketAddr, time::Duration};
use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection to {0} timed out")]
    Timeout(SocketAddr),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Dials one upstream address with the cluster's connect timeout. The
/// per-connection buffer limit rides along on every connection handed out so
/// the consumer can bound its buffering.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: SocketAddr,
    connect_timeout: Duration,
    buffer_limit: Option<usize>,
}

impl TcpConnector {
    pub fn new(address: SocketAddr, connect_timeout: Duration, buffer_limit: Option<usize>) -> Self {
        Self { address, connect_timeout, buffer_limit }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn buffer_limit(&self) -> Option<usize> {
        self.buffer_limit
    }

    pub fn connect(&self) -> BoxFuture<'static, Result<UpstreamConnection, ConnectError>> {
        let address = self.address;
        let timeout = self.connect_timeout;
        let buffer_limit = self.buffer_limit;
        async move {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
                .await
                .map_err(|_| ConnectError::Timeout(address))??;
            stream.set_nodelay(true)?;
            Ok(UpstreamConnection { stream, peer: address, buffer_limit })
        }
        .boxed()
    }
}

/// An established upstream connection plus the buffering bound the owning
/// cluster configured for it.
#[derive(Debug)]
pub struct UpstreamConnection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub buffer_limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn buffer_limit_rides_on_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = TcpConnector::new(addr, Duration::from_secs(1), Some(8192));

        let conn = connector.connect().await.unwrap();
        assert_eq!(conn.buffer_limit, Some(8192));
        assert_eq!(conn.peer, addr);
    }

    #[tokio::test]
    async fn connect_times_out() {
        // RFC 5737 TEST-NET-1, nothing routes there.
        let addr: SocketAddr = "192.0.2.1:81".parse().unwrap();
        let connector = TcpConnector::new(addr, Duration::from_millis(50), None);
        match connector.connect().await {
            Err(ConnectError::Timeout(peer)) => assert_eq!(peer, addr),
            Err(ConnectError::Io(_)) => {}, // some environments refuse instead
            Ok(_) => panic!("unroutable address should not connect"),
        }
    }
}
