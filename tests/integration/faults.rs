use crate::*;

use grrrr_core::wire::PacketKind;
use grrrr_services::{RandomLoss, RequestOutcome};

fn lossy_config() -> TransferConfig {
    TransferConfig {
        max_send_failures: 10,
        request_timeout_ms: 3000,
        ..fast_config()
    }
}

fn drop_kind(kind: PacketKind, probability: f64) -> Option<Arc<dyn LossPredicate>> {
    Some(Arc::new(RandomLoss::new(Some(kind), probability)))
}

#[tokio::test]
async fn test_transfer_survives_data_loss() -> Result<()> {
    let a = spawn_node_with(lossy_config(), drop_kind(PacketKind::Data, 0.25)).await?;
    let b = spawn_node(lossy_config()).await?;
    seed_history(&b.node, "bob", 5);

    assert_eq!(a.node.request_history(b.addr()).await, RequestOutcome::Installed(5));
    assert_eq!(a.node.current_history(), b.node.current_history());
    Ok(())
}

#[tokio::test]
async fn test_transfer_survives_ack_loss() -> Result<()> {
    let a = spawn_node(lossy_config()).await?;
    let b = spawn_node_with(lossy_config(), drop_kind(PacketKind::Ack, 0.25)).await?;
    seed_history(&b.node, "bob", 5);

    assert_eq!(a.node.request_history(b.addr()).await, RequestOutcome::Installed(5));
    assert_eq!(a.node.current_history(), b.node.current_history());

    // the sender may or may not have seen the final ACK, but it always
    // finishes and clears its session
    wait_until(Duration::from_secs(3), || b.node.outbound_sessions().is_empty()).await?;
    Ok(())
}

#[tokio::test]
async fn test_lost_requests_time_out() -> Result<()> {
    let config = TransferConfig {
        request_timeout_ms: 100,
        ..fast_config()
    };
    let a = spawn_node(config.clone()).await?;
    let b = spawn_node_with(config, drop_kind(PacketKind::Request, 1.0)).await?;
    seed_history(&b.node, "bob", 5);
    let before = a.node.current_history();

    assert_eq!(a.node.request_history(b.addr()).await, RequestOutcome::TimedOut);
    assert!(a.node.inbound_buffers().is_empty());
    assert!(b.node.outbound_sessions().is_empty());
    assert_eq!(a.node.current_history(), before);
    Ok(())
}

#[tokio::test]
async fn test_silent_peer_times_out() -> Result<()> {
    let config = TransferConfig {
        request_timeout_ms: 100,
        ..fast_config()
    };
    let a = spawn_node(config).await?;
    let silent = UdpSocket::bind("127.0.0.1:0").await?;

    let started = tokio::time::Instant::now();
    let outcome = a.node.request_history(silent.local_addr()?).await;
    assert_eq!(outcome, RequestOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(a.node.inbound_buffers().is_empty());

    // and the buffer slot is free for a fresh attempt
    let again = a.node.request_history(silent.local_addr()?).await;
    assert_eq!(again, RequestOutcome::TimedOut);
    Ok(())
}

#[tokio::test]
async fn test_garbage_datagrams_are_ignored() -> Result<()> {
    let a = spawn_node(fast_config()).await?;
    let b = spawn_node(fast_config()).await?;
    seed_history(&b.node, "bob", 3);

    let noise = UdpSocket::bind("127.0.0.1:0").await?;
    for junk in [&b"\x00"[..], b"hello world", &[0xff; 40]] {
        noise.send_to(junk, b.addr()).await?;
        noise.send_to(junk, a.addr()).await?;
    }

    assert_eq!(a.node.request_history(b.addr()).await, RequestOutcome::Installed(3));
    Ok(())
}
