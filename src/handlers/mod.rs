mod health;
pub mod plants;

pub use health::{health_check, readiness_check};
pub use plants::{add_log_entry, add_plant, delete_plant, get_statistics, set_config, set_key_secret};
