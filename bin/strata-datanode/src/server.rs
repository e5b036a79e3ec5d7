//! Packet server: one task per connection, requests handled in order

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use strata_common::{Error, Result};
use strata_proto::Opcode;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::conn::{FramedConn, PacketConn};
use crate::node::DataNode;

/// Accept connections until `shutdown` resolves
pub async fn serve(node: Arc<DataNode>, listener: TcpListener, shutdown: impl Future<Output = ()>) {
    if let Ok(addr) = listener.local_addr() {
        info!("data node listening on {addr}");
    }
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("data node listener stopped");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(node, stream, peer).await {
                            warn!("connection {peer} error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("accept error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

async fn handle_connection(node: Arc<DataNode>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    stream
        .set_nodelay(true)
        .map_err(|e| Error::Transport(e.to_string()))?;
    debug!("connection {peer} opened");
    let mut conn = FramedConn::new(stream, peer.to_string());

    while let Some(mut pkt) = conn.recv(node.pool()).await? {
        node.handle_packet(&mut pkt, &mut conn).await;
        if conn.is_closed() {
            break;
        }
        let streamed = pkt.opcode().is_ok_and(Opcode::streams_reply);
        if !streamed {
            conn.send(&pkt).await?;
        }
    }

    conn.close().await;
    debug!("connection {peer} closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_client::HttpMasterClient;
    use strata_common::config::DiskConfig;
    use strata_common::{BufferPool, DataNodeConfig, StoreMode};
    use strata_proto::{Packet, ResultCode};
    use strata_storage::PartitionSpace;
    use tokio::sync::oneshot;

    const BLOCK: usize = 4096;

    async fn start() -> (SocketAddr, Arc<DataNode>, oneshot::Sender<()>) {
        let mut config = DataNodeConfig::default();
        config.storage.block_size = BLOCK;
        config.storage.disks = vec![DiskConfig {
            path: "/d1".into(),
            capacity: 1 << 30,
            max_compact_tasks: 4,
        }];
        let space = Arc::new(PartitionSpace::from_config(&config.storage));
        let master = Arc::new(HttpMasterClient::new(Vec::new(), Duration::from_secs(1)).unwrap());
        let node = Arc::new(DataNode::new(&config, space, master));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(serve(Arc::clone(&node), listener, async {
            let _ = rx.await;
        }));
        (addr, node, tx)
    }

    async fn connect(addr: SocketAddr) -> FramedConn<TcpStream> {
        let stream = TcpStream::connect(addr).await.unwrap();
        FramedConn::new(stream, addr.to_string())
    }

    #[tokio::test]
    async fn test_write_read_and_stream_over_tcp() {
        let (addr, node, _stop) = start().await;
        node.space().create_partition("vol", 1, 1 << 20, "extent").unwrap();
        let pool = BufferPool::new(BLOCK, 4);
        let mut client = connect(addr).await;

        let payload: Vec<u8> = (0..BLOCK).map(|i| (i % 251) as u8).collect();
        let write = Packet::new_request(Opcode::Write, StoreMode::Extent, 1, 7)
            .with_crc(0xABCD)
            .with_payload(payload.clone());
        client.send(&write).await.unwrap();
        let reply = client.recv(&pool).await.unwrap().unwrap();
        assert_eq!(reply.result(), ResultCode::Ok);
        assert_eq!(reply.size, 0);

        let read = Packet::new_request(Opcode::Read, StoreMode::Extent, 1, 7).with_size(BLOCK as u32);
        client.send(&read).await.unwrap();
        let reply = client.recv(&pool).await.unwrap().unwrap();
        assert_eq!(reply.result(), ResultCode::Ok);
        assert_eq!(reply.crc, 0xABCD);
        assert_eq!(reply.data, payload);

        let stream = Packet::new_request(Opcode::StreamRead, StoreMode::Extent, 1, 7)
            .with_size(BLOCK as u32 - 96);
        client.send(&stream).await.unwrap();
        let frame = client.recv(&pool).await.unwrap().unwrap();
        assert_eq!(frame.size as usize, BLOCK - 96);
        assert_eq!(frame.payload(), &payload[..BLOCK - 96]);

        // the connection is still usable after a stream
        let missing = Packet::new_request(Opcode::Read, StoreMode::Extent, 9, 7).with_size(4);
        client.send(&missing).await.unwrap();
        let reply = client.recv(&pool).await.unwrap().unwrap();
        assert_eq!(reply.result(), ResultCode::NotExist);

        assert_eq!(node.pool().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_bad_magic_closes_connection() {
        let (addr, _node, _stop) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, &[0u8; strata_proto::HEADER_SIZE])
            .await
            .unwrap();

        let mut client = FramedConn::new(stream, "server");
        let pool = BufferPool::new(BLOCK, 1);
        assert!(client.recv(&pool).await.unwrap().is_none());
    }
}
