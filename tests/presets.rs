use std::path::Path;

use furnace_acq::{Config, DecodeType, PointSchema};

fn repo_path(rel: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(rel)
}

#[test]
fn shipped_schemas_load() {
    let cases = [
        ("schemas/single_furnace_motor.toml", 1, 5),
        ("schemas/dual_furnace_motor.toml", 2, 10),
        ("schemas/single_furnace_zones.toml", 3, 6),
        ("schemas/dual_furnace_zones.toml", 4, 12),
    ];
    for (file, version, len) in cases {
        let schema = PointSchema::from_path(&repo_path(file)).unwrap();
        assert_eq!(schema.version(), version, "{file}");
        assert_eq!(schema.len(), len, "{file}");
        assert!(schema.all().iter().any(|p| p.writable), "{file}");
    }
}

#[test]
fn motor_layout_addresses() {
    let schema = PointSchema::from_path(&repo_path("schemas/dual_furnace_motor.toml")).unwrap();
    let vel = schema.resolve("f2_vel_motor").unwrap();
    assert_eq!(vel.address, 1014);
    assert_eq!(vel.decode, DecodeType::Float32BE);
    assert!(!vel.writable);
    assert_eq!(schema.resolve("f2_setpoint").unwrap().address, 1016);
}

#[test]
fn example_config_points_at_a_preset() {
    let cfg = Config::from_path(&repo_path("furnace_acq.example.toml")).unwrap();
    cfg.validate().unwrap();
    let schema = cfg.point_schema().unwrap();
    assert_eq!(schema.version(), 4);
    assert_eq!(cfg.table_name(&schema), "furnace_data_v4");
    assert_eq!(schema.resolve("f2_mode").unwrap().address, 1109);
}
