pub mod change_event;
pub mod composite;
pub mod fingerprint;
pub mod identifier;
pub mod resource;
pub mod scoring;
pub mod sql_text;
pub mod trigger_sql;
