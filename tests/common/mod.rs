#![allow(dead_code)]

pub mod synthetic_tracks;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
