//! JSON configuration of alignment runs.

pub mod run;

pub use run::{
    load_config, AlignConfig, OutputConfig, PlaneConfig, RunConfig, SearchConfig, SearchKind,
};
