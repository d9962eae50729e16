mod common;

use std::time::Duration;

use furnace_acq::{AcqError, ConnectionGuard, FieldEndpoint};

use common::start_mock;

fn guard_for(port: u16) -> ConnectionGuard {
    ConnectionGuard::new(
        FieldEndpoint::direct("127.0.0.1", port)
            .with_connect_timeout(Duration::from_millis(500))
            .with_io_timeout(Duration::from_millis(150)),
    )
}

#[tokio::test]
async fn lease_reads_consecutive_registers() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    mock.set_words(1000, &[0x4640, 0xE400, 7]);
    let guard = guard_for(port);
    assert_eq!(guard.connect_count(), 0);

    let mut lease = guard.acquire().await;
    assert_eq!(lease.read_registers(1000, 3).await?, vec![0x4640, 0xE400, 7]);
    lease.write_register(1002, 9).await?;
    drop(lease);

    assert_eq!(mock.word(1002), Some(9));
    assert_eq!(guard.connect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn timeout_reconnects_once_then_fails() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    mock.set_word(1004, 1);
    mock.set_delay(1004, Duration::from_millis(600));
    let guard = guard_for(port);

    let err = guard
        .acquire()
        .await
        .read_registers(1004, 1)
        .await
        .expect_err("both attempts time out");
    assert!(matches!(err, AcqError::Timeout(_)), "unexpected error: {err}");
    assert!(err.is_transport());
    // first connect plus exactly one reconnect
    assert_eq!(guard.connect_count(), 2);

    mock.clear_delay(1004);
    assert_eq!(guard.acquire().await.read_registers(1004, 1).await?, vec![1]);
    assert_eq!(guard.connect_count(), 3);
    Ok(())
}

#[tokio::test]
async fn ensure_connected_opens_eagerly() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    let guard = guard_for(port);
    guard.ensure_connected().await?;
    guard.ensure_connected().await?;
    assert_eq!(guard.connect_count(), 1);
    assert!(common::wait_until(Duration::from_secs(2), || mock.connection_count() == 1).await);
    Ok(())
}

#[tokio::test]
async fn lease_is_released_on_drop() -> Result<(), Box<dyn std::error::Error>> {
    let (_mock, port) = start_mock().await;
    let guard = guard_for(port);
    let lease = guard.acquire().await;
    drop(lease);
    let _again = tokio::time::timeout(Duration::from_millis(200), guard.acquire()).await?;
    Ok(())
}

#[tokio::test]
async fn with_connection_runs_body_under_one_lease() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    mock.set_float(1007, 750.0);
    let guard = guard_for(port);

    let words = guard
        .with_connection(|lease| {
            Box::pin(async move {
                lease.write_register(1007, 0x4454).await?;
                lease.write_register(1008, 0xA000).await?;
                lease.read_registers(1007, 2).await
            })
        })
        .await?;
    assert_eq!(words, vec![0x4454, 0xA000]);
    assert_eq!(furnace_acq::decode::decode_float32(words[0], words[1]), 850.5);
    Ok(())
}
