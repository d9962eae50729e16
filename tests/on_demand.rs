mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use furnace_acq::{AcqError, AcquisitionService, Persisted, PointValue};

use common::{config_for, furnace_schema, seed_furnace, start_mock, wait_until};

#[tokio::test]
async fn read_once_returns_stored_record_id() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    seed_furnace(&mock, 850.5, 2);
    let dir = tempfile::tempdir()?;
    let service = AcquisitionService::new(&config_for(port, &dir, &furnace_schema()))?;
    service.store().create_table().await?;

    let fresh = service.trigger_read_and_persist().await?;
    assert_eq!(fresh.reading.get("f1_temp_zone1"), Some(PointValue::Float(850.5)));
    assert_eq!(fresh.reading.get("f1_fuel_state"), Some(PointValue::UInt(2)));
    let id = fresh.persisted.record_id().expect("stored");
    assert_eq!(service.store().count().await?, 1);
    assert_eq!(id.0, 1);
    assert_eq!(service.get_latest().await?, Some(fresh.reading));
    Ok(())
}

#[tokio::test]
async fn storage_outage_still_returns_fresh_values() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    seed_furnace(&mock, 812.0, 1);
    let dir = tempfile::tempdir()?;
    let config = config_for(port, &dir, &furnace_schema())
        .with_db_path(dir.path().join("gone").join("furnaces.db"));
    let service = AcquisitionService::new(&config)?;

    let fresh = service.trigger_read_and_persist().await?;
    assert!(!fresh.is_persisted());
    assert!(matches!(fresh.persisted, Persisted::Unpersisted { .. }));
    assert_eq!(fresh.reading.get("f1_temp_zone1"), Some(PointValue::Float(812.0)));
    Ok(())
}

#[tokio::test]
async fn missing_register_fails_whole_reading() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    // 1004 never seeded: the bank answers with an exception
    mock.set_float(1000, 900.0);
    let dir = tempfile::tempdir()?;
    let service = AcquisitionService::new(&config_for(port, &dir, &furnace_schema()))?;
    service.store().create_table().await?;

    let err = service.trigger_read_and_persist().await.expect_err("no partial reading");
    assert!(matches!(err, AcqError::Transport(_)), "unexpected error: {err}");
    assert_eq!(service.store().count().await?, 0);
    // an exception answer is not a reason to reconnect
    assert_eq!(service.guard().connect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn uninitialised_float_is_a_decode_error() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    mock.set_words(1000, &[0xFFFF, 0xFFFF]);
    mock.set_word(1004, 1);
    let dir = tempfile::tempdir()?;
    let service = AcquisitionService::new(&config_for(port, &dir, &furnace_schema()))?;
    service.store().create_table().await?;

    let err = service.trigger_read_and_persist().await.expect_err("NaN is not a reading");
    assert!(matches!(err, AcqError::Decode(_)), "unexpected error: {err}");
    assert_eq!(service.get_latest().await?, None);

    seed_furnace(&mock, 812.0, 1);
    assert!(service.trigger_read_and_persist().await?.is_persisted());
    Ok(())
}

#[tokio::test]
async fn loop_and_concurrent_reads_share_one_connection() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    seed_furnace(&mock, 850.5, 1);
    let dir = tempfile::tempdir()?;
    let mut config = config_for(port, &dir, &furnace_schema());
    config.storage.timeout_ms = 10_000;
    let service = Arc::new(AcquisitionService::new(&config)?);
    service.store().create_table().await?;

    // flip the float between two values; both words change in one step
    let flipper = {
        let mock = mock.clone();
        tokio::spawn(async move {
            for i in 0u32.. {
                mock.set_float(1000, if i % 2 == 0 { -1.25 } else { 850.5 });
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let handle = service.acquisition_loop(Duration::from_millis(5)).spawn();
    let mut readers = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        readers.push(tokio::spawn(async move {
            let mut temps = Vec::new();
            for _ in 0..10 {
                let fresh = service.trigger_read_and_persist().await?;
                assert!(fresh.is_persisted());
                temps.extend(fresh.reading.get("f1_temp_zone1"));
            }
            Ok::<_, AcqError>(temps)
        }));
    }

    let allowed: HashSet<u32> = [-1.25f32, 850.5].iter().map(|v| v.to_bits()).collect();
    for reader in readers {
        for temp in reader.await?? {
            let PointValue::Float(v) = temp else { panic!("not a float: {temp:?}") };
            assert!(allowed.contains(&v.to_bits()), "torn value {v}");
        }
    }

    let stats = handle.stats();
    assert!(wait_until(Duration::from_secs(5), || stats.completed() >= 1).await);
    handle.shutdown();
    handle.join().await?;
    flipper.abort();

    for reading in service.get_history(Duration::from_secs(3600)).await? {
        let Some(PointValue::Float(v)) = reading.get("f1_temp_zone1") else {
            panic!("missing temperature in {reading:?}");
        };
        assert!(allowed.contains(&v.to_bits()), "torn value {v}");
    }

    assert_eq!(service.guard().connect_count(), 1);
    assert_eq!(mock.connection_count(), 1);
    assert_eq!(mock.max_in_flight(), 1);
    assert!(service.store().count().await? >= 81);
    Ok(())
}
