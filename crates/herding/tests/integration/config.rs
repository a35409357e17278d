use std::io::Write;
use std::time::Duration;

use herding::{Herd, HerdConfig, Work};

use crate::{Invocations, TestHerd, setup_herd};

#[tokio::test]
async fn test_herd_from_config_file() {
    herding_test::setup();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "name: from-file").unwrap();
    writeln!(file, "max_age: 1ms").unwrap();
    writeln!(file, "stale: true").unwrap();

    let config = HerdConfig::get(Some(file.path())).unwrap();
    let herd: TestHerd = Herd::new(config);
    let invocations = Invocations::new();

    assert_eq!(herd.obtain("key".into(), || Work::ready(1)).await, Ok(1));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let producer = {
        let invocations = invocations.clone();
        move || {
            invocations.record();
            Work::ready(2)
        }
    };
    assert_eq!(herd.obtain("key".into(), producer).await, Ok(1));
    assert_eq!(invocations.count(), 0);
}

#[test]
fn test_missing_config_file() {
    let err = HerdConfig::get(Some("/this/does/not/exist.yml".as_ref())).unwrap_err();
    assert_eq!(err.to_string(), "failed to open configuration file");
}

#[tokio::test]
async fn test_zero_capacity_is_unbounded() {
    let herd = setup_herd(|config| config.max_entries = Some(0));

    for i in 0..10u64 {
        herd.obtain(format!("key-{i}"), move || Work::ready(i))
            .await
            .unwrap();
    }

    assert_eq!(herd.count(), 10);
}
