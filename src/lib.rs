pub mod batch;
pub mod config;
pub mod estimator;
pub mod event;
pub mod locator;
pub mod parser;
pub mod pricing;
pub mod reconcile;
pub mod record;
pub mod report;
pub mod storage;
