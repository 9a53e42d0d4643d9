pub mod config;
pub mod data;
pub mod pretty_print;
pub mod prim_config;
pub mod progress_ui;
pub mod report_error;
pub mod util;
