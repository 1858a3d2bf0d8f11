use std::sync::Mutex;

use tempfile::NamedTempFile;

use trailwatch::TrailwatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRAILWATCH_CONFIG",
        "TRAILWATCH_SOURCE",
        "TRAILWATCH_DB_PATH",
        "TRAILWATCH_MOTION_THRESHOLD",
        "TRAILWATCH_SCORER_URL",
        "TRAILWATCH_WEATHER_API_KEY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        db_path = "trail_prod.db"

        [source]
        url = "http://camera-1:81/stream"
        target_fps = 8

        [motion]
        threshold = 3500
        roi_top = 0.2
        roi_bottom = 0.9
        pre_roll_seconds = 2.0

        [classifier]
        scorer_url = "http://127.0.0.1:8000/score"
        detection_threshold = 0.5
        moving_labels = ["deer", "fox"]

        [weather]
        city = "Boulder"

        [output]
        image_dir = "/var/lib/trailwatch/pics"
        record_video = true
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("TRAILWATCH_CONFIG", file.path());
    std::env::set_var("TRAILWATCH_MOTION_THRESHOLD", "4000");
    std::env::set_var("TRAILWATCH_WEATHER_API_KEY", "k-123");

    let cfg = TrailwatchConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "trail_prod.db");
    assert_eq!(cfg.source.url, "http://camera-1:81/stream");
    assert_eq!(cfg.source.target_fps, 8);
    // Environment wins over the file.
    assert_eq!(cfg.motion.threshold, 4000);
    assert_eq!(cfg.motion.pixel_threshold, 75);
    assert_eq!(cfg.motion.dilate_iterations, 3);
    assert_eq!(cfg.motion.roi_top, 0.2);
    assert_eq!(cfg.motion.roi_bottom, 0.9);
    assert_eq!(cfg.motion.pre_roll_seconds, 2.0);
    // Unset fields keep their defaults.
    assert_eq!(cfg.motion.roi_left, 0.3);
    assert_eq!(cfg.motion.post_roll_seconds, 1.5);
    assert_eq!(
        cfg.classifier.scorer_url.as_deref(),
        Some("http://127.0.0.1:8000/score")
    );
    assert_eq!(cfg.classifier.detection_threshold, 0.5);
    assert_eq!(cfg.classifier.moving_labels, vec!["deer", "fox"]);
    assert_eq!(cfg.classifier.fixed_labels, vec!["railway track", "tree"]);
    assert_eq!(cfg.weather.city, "Boulder");
    assert_eq!(cfg.weather.api_key.as_deref(), Some("k-123"));
    assert_eq!(cfg.output.image_dir, "/var/lib/trailwatch/pics");
    assert!(cfg.output.record_video);

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrailwatchConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "trailwatch.db");
    assert_eq!(cfg.source.url, "stub://trail");
    assert_eq!(cfg.source.target_fps, 5);
    assert_eq!(cfg.motion.threshold, 2000);
    assert_eq!(cfg.classifier.detection_threshold, 0.4);
    assert!(cfg.classifier.scorer_url.is_none());
    assert!(cfg.weather.api_key.is_none());
    assert!(!cfg.output.record_video);

    clear_env();
}

#[test]
fn rejects_inverted_roi() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [motion]
        roi_top = 0.8
        roi_bottom = 0.4
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("TRAILWATCH_CONFIG", file.path());

    assert!(TrailwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_malformed_motion_threshold_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRAILWATCH_MOTION_THRESHOLD", "lots");
    assert!(TrailwatchConfig::load().is_err());

    clear_env();
}
