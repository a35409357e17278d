use herding::{Herd, HerdConfig};
use herding_test as test;

pub use test::{Invocations, ProducerError};

/// The herd used throughout the integration tests.
pub type TestHerd = Herd<String, u64, ProducerError>;

/// Setup tests and create a herd to test.
///
/// The `update_config` closure can modify any default configuration if needed before the herd
/// is created.
pub fn setup_herd(update_config: impl FnOnce(&mut HerdConfig)) -> TestHerd {
    test::setup();

    let mut config = HerdConfig {
        name: "integration".into(),
        ..Default::default()
    };
    update_config(&mut config);

    Herd::new(config)
}
