mod access_tests;
mod build_tests;
mod common;
mod graph_props;
mod import_tests;
mod storage_tests;
