//! Best-effort datagram send. Failures are logged and swallowed; callers
//! learn about delivery only through ACKs.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use grrrr_core::wire::Packet;

/// Encode `packet` and send it to `peer`. Returns `true` if the datagram
/// was handed to the socket.
pub async fn send_packet(socket: &UdpSocket, peer: SocketAddr, packet: &Packet) -> bool {
    let frame = match packet.encode() {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(peer = %peer, kind = %packet.kind, error = %e, "failed to encode packet");
            return false;
        }
    };

    match socket.send_to(&frame, peer).await {
        Ok(_) => {
            tracing::trace!(peer = %peer, kind = %packet.kind, seq_no = packet.seq_no, "packet sent");
            true
        }
        Err(e) => {
            tracing::debug!(peer = %peer, kind = %packet.kind, error = %e, "send_to failed");
            false
        }
    }
}
