pub mod service;

use crate::resources::ResourceVector;
use crate::{CategorySpec, PartialResources};

#[allow(unused)]
pub fn enable_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn expect_error_message<T: std::fmt::Debug>(result: crate::Result<T>, msg: &str) {
    match result {
        Ok(value) => panic!("Expected error, got Ok({value:?})"),
        Err(error) => {
            let formatted = format!("{error}");
            if !formatted.contains(msg) {
                panic!("Did not find `{msg}` in `{formatted}`");
            }
        }
    }
}

/// Capacity of the worker used by the allocation scenarios.
pub fn test_worker() -> ResourceVector {
    ResourceVector::new(4, 8000, 16000, 2)
}

pub fn fixed(name: &str, max: PartialResources, min: PartialResources) -> CategorySpec {
    CategorySpec::default_for(name).with_max(max).with_min(min)
}
