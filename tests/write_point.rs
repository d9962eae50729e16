mod common;

use furnace_acq::decode::encode_float32;
use furnace_acq::{AcqError, AcquisitionService, DecodeType, Point, PointSchema, PointValue};

use common::{config_for, start_mock};

fn control_schema() -> PointSchema {
    PointSchema::new(
        3,
        vec![
            Point::new("f1_temp_zone1", 1000, DecodeType::Float32BE),
            Point::new("f1_setpoint", 1007, DecodeType::Float32BE).writable(),
            Point::new("f1_mode", 1009, DecodeType::UInt16).writable(),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn writes_reach_the_register_bank() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    mock.set_float(1000, 780.0);
    mock.set_float(1007, 750.0);
    mock.set_word(1009, 1);

    let dir = tempfile::tempdir()?;
    let service = AcquisitionService::new(&config_for(port, &dir, &control_schema()))?;
    service.store().create_table().await?;

    service.write_point("f1_setpoint", PointValue::Float(812.5)).await?;
    let [hi, lo] = encode_float32(812.5);
    assert_eq!(mock.word(1007), Some(hi));
    assert_eq!(mock.word(1008), Some(lo));

    service.write_point("f1_mode", PointValue::UInt(2)).await?;
    assert_eq!(mock.word(1009), Some(2));

    // whole numbers are accepted for float points
    service.write_point("f1_setpoint", PointValue::UInt(800)).await?;

    let fresh = service.trigger_read_and_persist().await?;
    assert_eq!(fresh.reading.get("f1_setpoint"), Some(PointValue::Float(800.0)));
    assert_eq!(fresh.reading.get("f1_mode"), Some(PointValue::UInt(2)));
    assert_eq!(service.guard().connect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_writes_leave_the_bank_alone() -> Result<(), Box<dyn std::error::Error>> {
    let (mock, port) = start_mock().await;
    mock.set_float(1000, 780.0);
    mock.set_word(1009, 1);

    let dir = tempfile::tempdir()?;
    let service = AcquisitionService::new(&config_for(port, &dir, &control_schema()))?;

    let err = service
        .write_point("f1_temp_zone1", PointValue::Float(1.0))
        .await
        .expect_err("sensor is read-only");
    assert!(matches!(err, AcqError::NotWritable(_)));

    let err = service
        .write_point("f3_setpoint", PointValue::Float(1.0))
        .await
        .expect_err("no such point");
    assert!(matches!(err, AcqError::UnknownPoint(_)));

    let err = service
        .write_point("f1_mode", PointValue::Float(1.5))
        .await
        .expect_err("mode is a word");
    assert!(matches!(err, AcqError::Decode(_)));

    assert_eq!(mock.word(1009), Some(1));
    assert_eq!(mock.request_count(), 0);
    Ok(())
}
