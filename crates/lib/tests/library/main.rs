mod common;
mod pipeline_tests;
mod resolve_tests;
