pub mod actor;
pub mod config;
pub mod db;
pub mod error_convert;
pub mod health;
pub mod memory;
pub mod openapi;
pub mod rest;
pub mod telemetry;

// Workflow domain
pub mod repo;
pub mod workflow;
