//! Usage Service - credit metering and billing-cycle quota resets.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
