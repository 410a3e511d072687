//! End-to-end scenarios over in-process clusters on loopback ports.

use std::net::SocketAddr;

use crate::client::{GenericEndpoint, ReadOutcome, WriteOutcome};
use crate::protocols::RegProtocol;
use crate::server::GenericReplica;
use crate::utils::{ClusterConfig, ReplikvError, ServerInfo, Timestamp};

use tokio::sync::watch;
use tokio::time::{self, Duration};

/// Spawns an in-process cluster of three replicas of the given protocol.
/// Returns the matching cluster config and the replicas' termination
/// senders (indexed by replica ID).
async fn spawn_cluster(
    port_base: u16,
    protocol: RegProtocol,
) -> Result<(ClusterConfig, Vec<watch::Sender<bool>>), ReplikvError> {
    let mut servers = vec![];
    let mut terms = vec![];
    for id in 0..3u8 {
        let port = port_base + id as u16;
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse()?;
        let mut replica = protocol.new_server_replica(id, addr, None).await?;
        let (tx_term, rx_term) = watch::channel(false);
        tokio::spawn(async move { replica.run(rx_term).await });
        terms.push(tx_term);
        servers.push(ServerInfo {
            id,
            host: "127.0.0.1".into(),
            port,
        });
    }
    let cluster = ClusterConfig {
        servers,
        protocol,
        read_quorum: 2,
        write_quorum: 2,
        num_replicas: 3,
    };
    cluster.validate()?;
    Ok((cluster, terms))
}

/// Convenience wrapper asserting a committed write.
async fn must_write(
    endpoint: &mut Box<dyn GenericEndpoint + Send>,
    key: &str,
    value: &[u8],
) -> Result<Timestamp, ReplikvError> {
    match endpoint.write(key, value.to_vec()).await? {
        WriteOutcome::Committed { ts } => Ok(ts),
        WriteOutcome::QuorumFailed => {
            panic!("write of '{}' failed its quorum", key)
        }
    }
}

/// Convenience wrapper asserting a successful read.
async fn must_read(
    endpoint: &mut Box<dyn GenericEndpoint + Send>,
    key: &str,
) -> Result<(Vec<u8>, Timestamp), ReplikvError> {
    match endpoint.read(key).await? {
        ReadOutcome::Value { value, ts } => Ok((value, ts)),
        ReadOutcome::QuorumFailed => {
            panic!("read of '{}' failed its quorum", key)
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abd_write_then_read() -> Result<(), ReplikvError> {
    let (cluster, terms) = spawn_cluster(54800, RegProtocol::Abd).await?;

    let mut endpoint = RegProtocol::Abd
        .new_client_endpoint(1, cluster, None)
        .await?;
    endpoint.connect().await?;

    let write_ts = must_write(&mut endpoint, "a", b"1").await?;
    let (value, read_ts) = must_read(&mut endpoint, "a").await?;
    assert_eq!(value, b"1".to_vec());
    assert!(read_ts >= write_ts);

    endpoint.leave().await?;
    for term in terms {
        term.send(true).map_err(ReplikvError::msg)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abd_overwrite() -> Result<(), ReplikvError> {
    let (cluster, terms) = spawn_cluster(54810, RegProtocol::Abd).await?;

    let mut endpoint = RegProtocol::Abd
        .new_client_endpoint(1, cluster, None)
        .await?;
    endpoint.connect().await?;

    let ts1 = must_write(&mut endpoint, "k", b"v1").await?;
    let ts2 = must_write(&mut endpoint, "k", b"v2").await?;
    assert!(ts2 > ts1);
    let (value, _) = must_read(&mut endpoint, "k").await?;
    assert_eq!(value, b"v2".to_vec());

    endpoint.leave().await?;
    for term in terms {
        term.send(true).map_err(ReplikvError::msg)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abd_read_of_absent_key() -> Result<(), ReplikvError> {
    let (cluster, terms) = spawn_cluster(54820, RegProtocol::Abd).await?;

    let mut endpoint = RegProtocol::Abd
        .new_client_endpoint(1, cluster, None)
        .await?;
    endpoint.connect().await?;

    // a never-written key reads successfully as the empty value
    let (value, ts) = must_read(&mut endpoint, "nonexist!").await?;
    assert!(value.is_empty());
    assert_eq!(ts, 0);

    endpoint.leave().await?;
    for term in terms {
        term.send(true).map_err(ReplikvError::msg)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 6)]
async fn abd_concurrent_writers_agree() -> Result<(), ReplikvError> {
    let (cluster, terms) = spawn_cluster(54830, RegProtocol::Abd).await?;

    // three clients write "k" concurrently
    let mut handles = vec![];
    for (id, value) in [(1u64, b"A"), (2, b"B"), (3, b"C")] {
        let cluster = cluster.clone();
        handles.push(tokio::spawn(async move {
            let mut endpoint = RegProtocol::Abd
                .new_client_endpoint(id, cluster, None)
                .await?;
            endpoint.connect().await?;
            let outcome = endpoint.write("k", value.to_vec()).await?;
            endpoint.leave().await?;
            Ok::<WriteOutcome, ReplikvError>(outcome)
        }));
    }
    for handle in handles {
        let outcome = handle.await.map_err(ReplikvError::msg)??;
        assert!(matches!(outcome, WriteOutcome::Committed { .. }));
    }

    // step past the writers' millisecond before reading
    time::sleep(Duration::from_millis(10)).await;

    // sequential reads all agree on one of the written values
    let mut reader = RegProtocol::Abd
        .new_client_endpoint(9, cluster, None)
        .await?;
    reader.connect().await?;
    let (first, _) = must_read(&mut reader, "k").await?;
    assert!([b"A".to_vec(), b"B".to_vec(), b"C".to_vec()].contains(&first));
    for _ in 0..2 {
        let (again, _) = must_read(&mut reader, "k").await?;
        assert_eq!(again, first);
    }

    reader.leave().await?;
    for term in terms {
        term.send(true).map_err(ReplikvError::msg)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abd_survives_replica_crash() -> Result<(), ReplikvError> {
    let (cluster, terms) = spawn_cluster(54840, RegProtocol::Abd).await?;

    let mut endpoint = RegProtocol::Abd
        .new_client_endpoint(1, cluster.clone(), None)
        .await?;
    endpoint.connect().await?;
    must_write(&mut endpoint, "k", b"before").await?;

    // take replica 2 down; R = W = 2 of 3 still intersect
    terms[2].send(true).map_err(ReplikvError::msg)?;
    time::sleep(Duration::from_millis(50)).await;

    must_write(&mut endpoint, "k", b"after").await?;
    let (value, _) = must_read(&mut endpoint, "k").await?;
    assert_eq!(value, b"after".to_vec());

    // a client arriving after the crash also operates fine
    let mut late = RegProtocol::Abd
        .new_client_endpoint(2, cluster.clone(), None)
        .await?;
    late.connect().await?;
    let (value, _) = must_read(&mut late, "k").await?;
    assert_eq!(value, b"after".to_vec());

    endpoint.leave().await?;
    late.leave().await?;
    for term in terms {
        let _ = term.send(true);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocking_write_then_read() -> Result<(), ReplikvError> {
    let (cluster, terms) = spawn_cluster(54850, RegProtocol::Blocking).await?;

    let mut endpoint = RegProtocol::Blocking
        .new_client_endpoint(1, cluster, None)
        .await?;
    endpoint.connect().await?;

    must_write(&mut endpoint, "k", b"v").await?;
    let (value, ts) = must_read(&mut endpoint, "k").await?;
    assert_eq!(value, b"v".to_vec());
    assert!(ts > 0);

    // absent keys read as empty under locks too
    let (value, ts) = must_read(&mut endpoint, "other").await?;
    assert!(value.is_empty());
    assert_eq!(ts, 0);

    endpoint.leave().await?;
    for term in terms {
        term.send(true).map_err(ReplikvError::msg)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn client_timestamps_strictly_increase() -> Result<(), ReplikvError> {
    let (cluster, terms) = spawn_cluster(54860, RegProtocol::Abd).await?;

    let mut endpoint = RegProtocol::Abd
        .new_client_endpoint(1, cluster, None)
        .await?;
    endpoint.connect().await?;

    let mut last_write_ts = 0;
    let mut last_clock = endpoint.current_ts();
    for round in 0..5 {
        let key = format!("k{}", round);
        let ts = must_write(&mut endpoint, &key, b"v").await?;
        assert!(ts > last_write_ts);
        last_write_ts = ts;

        let clock = endpoint.current_ts();
        assert!(clock > last_clock);
        last_clock = clock;
    }

    endpoint.leave().await?;
    for term in terms {
        term.send(true).map_err(ReplikvError::msg)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wrong_protocol_client_fails_fast() -> Result<(), ReplikvError> {
    // an ABD client pointed at a blocking cluster is rejected by every
    // replica and reports quorum failure instead of hanging
    let (mut cluster, terms) =
        spawn_cluster(54870, RegProtocol::Blocking).await?;
    cluster.protocol = RegProtocol::Abd;

    let config_str = "rpc_timeout_ms = 1000";
    let mut endpoint = RegProtocol::Abd
        .new_client_endpoint(1, cluster, Some(config_str))
        .await?;
    endpoint.connect().await?;

    assert_eq!(
        endpoint.write("k", b"v".to_vec()).await?,
        WriteOutcome::QuorumFailed
    );
    assert_eq!(endpoint.read("k").await?, ReadOutcome::QuorumFailed);

    endpoint.leave().await?;
    for term in terms {
        term.send(true).map_err(ReplikvError::msg)?;
    }
    Ok(())
}
