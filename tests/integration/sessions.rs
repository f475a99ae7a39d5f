use crate::*;

use grrrr_core::wire::Packet;
use grrrr_services::RequestOutcome;

#[tokio::test]
async fn test_duplicate_requests_share_one_transfer() -> Result<()> {
    let b = spawn_node(fast_config()).await?;
    seed_history(&b.node, "bob", 10);

    // a raw socket plays the requester so we can flood REQUESTs
    let requester = UdpSocket::bind("127.0.0.1:0").await?;
    let frame = Packet::request().encode()?;
    for _ in 0..20 {
        requester.send_to(&frame, b.addr()).await?;
    }

    wait_until(Duration::from_secs(1), || b.node.outbound_sessions().len() == 1).await?;

    // nobody ACKs: every DATA packet seen is within the first window
    let window = fast_config().window_size;
    let mut buf = [0u8; 256];
    let mut seen = 0;
    while let Ok(Ok((n, _))) =
        tokio::time::timeout(Duration::from_millis(200), requester.recv_from(&mut buf)).await
    {
        let p = Packet::decode(&buf[..n])?;
        assert!(p.seq_no >= 1 && p.seq_no <= window);
        seen += 1;
    }
    assert_eq!(seen, (window * fast_config().max_send_failures) as usize);
    assert!(b.node.outbound_sessions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_downloads_from_one_peer() -> Result<()> {
    let a = spawn_node(fast_config()).await?;
    let b = spawn_node(fast_config()).await?;
    seed_history(&b.node, "bob", 10);

    let (first, second) = tokio::join!(
        a.node.request_history(b.addr()),
        a.node.request_history(b.addr()),
    );
    let outcomes = [first, second];
    assert!(outcomes.contains(&RequestOutcome::Installed(10)));
    assert!(outcomes.contains(&RequestOutcome::AlreadyInProgress));
    Ok(())
}

#[tokio::test]
async fn test_one_sender_serves_many_peers() -> Result<()> {
    let b = spawn_node(fast_config()).await?;
    seed_history(&b.node, "bob", 6);

    let mut requesters = Vec::new();
    for _ in 0..4 {
        requesters.push(spawn_node(fast_config()).await?);
    }

    let mut tasks = Vec::new();
    for r in &requesters {
        let node = r.node.clone();
        let target = b.addr();
        tasks.push(tokio::spawn(async move { node.request_history(target).await }));
    }
    for t in tasks {
        assert_eq!(t.await?, RequestOutcome::Installed(6));
    }
    for r in &requesters {
        assert_eq!(r.node.current_history(), b.node.current_history());
    }
    Ok(())
}
