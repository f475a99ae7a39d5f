use crate::*;

use grrrr_services::RequestOutcome;

#[tokio::test]
async fn test_full_history_transfer() -> Result<()> {
    let a = spawn_node(fast_config()).await?;
    let b = spawn_node(fast_config()).await?;
    seed_history(&b.node, "bob", 25);
    seed_history(&a.node, "alice", 2);

    let outcome = a.node.request_history(b.addr()).await;
    assert_eq!(outcome, RequestOutcome::Installed(25));
    assert_eq!(a.node.current_history(), b.node.current_history());
    assert!(a.node.inbound_buffers().is_empty());

    // the sender sees the last ACK and tears its session down
    wait_until(Duration::from_secs(2), || b.node.outbound_sessions().is_empty()).await?;
    Ok(())
}

#[tokio::test]
async fn test_empty_history_transfer() -> Result<()> {
    let a = spawn_node(fast_config()).await?;
    let b = spawn_node(fast_config()).await?;
    seed_history(&a.node, "alice", 3);

    let outcome = a.node.request_history(b.addr()).await;
    assert_eq!(outcome, RequestOutcome::Installed(0));
    assert!(a.node.current_history().messages.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_short_history_fits_one_chunk() -> Result<()> {
    let config = TransferConfig {
        chunk_size: 4096,
        ..fast_config()
    };
    let a = spawn_node(config.clone()).await?;
    let b = spawn_node(config).await?;
    seed_history(&b.node, "bob", 1);

    assert_eq!(a.node.request_history(b.addr()).await, RequestOutcome::Installed(1));
    assert_eq!(a.node.current_history(), b.node.current_history());
    Ok(())
}

#[tokio::test]
async fn test_both_directions_at_once() -> Result<()> {
    let a = spawn_node(fast_config()).await?;
    let b = spawn_node(fast_config()).await?;
    seed_history(&a.node, "alice", 10);
    seed_history(&b.node, "bob", 12);
    let a_before = a.node.current_history();
    let b_before = b.node.current_history();

    let (from_b, from_a) = tokio::join!(
        a.node.request_history(b.addr()),
        b.node.request_history(a.addr()),
    );
    assert!(matches!(from_b, RequestOutcome::Installed(_)));
    assert!(matches!(from_a, RequestOutcome::Installed(_)));

    // each side streams the snapshot it held when the REQUEST arrived
    let a_after = a.node.current_history();
    let b_after = b.node.current_history();
    assert!(a_after == b_before || a_after == a_before);
    assert!(b_after == a_before || b_after == b_before);
    Ok(())
}

#[tokio::test]
async fn test_chain_of_downloads() -> Result<()> {
    let a = spawn_node(fast_config()).await?;
    let b = spawn_node(fast_config()).await?;
    let c = spawn_node(fast_config()).await?;
    seed_history(&c.node, "carol", 8);

    assert_eq!(b.node.request_history(c.addr()).await, RequestOutcome::Installed(8));
    assert_eq!(a.node.request_history(b.addr()).await, RequestOutcome::Installed(8));
    assert_eq!(a.node.current_history(), c.node.current_history());
    Ok(())
}
