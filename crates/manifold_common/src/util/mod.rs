pub mod name_gen;
pub mod progress_logger;
