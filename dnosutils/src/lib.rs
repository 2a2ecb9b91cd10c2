pub mod capture;
pub mod commands;
pub mod flat_config;
pub mod show_bridge_domain;
pub mod show_interfaces;
pub mod ssh;
