//! Integration tests for the controller
//!
//! `lifecycle_tests` drive the controller with a scripted runtime and a
//! manual clock; `http_crawl_tests` use wiremock to run the HTTP runtime
//! against mock sites.

mod http_crawl_tests;
mod lifecycle_tests;
