pub mod api;
pub mod config;
pub mod editor;
pub mod lua_table;
pub mod messages;
pub mod reconcile;
pub mod record;
pub mod render;
pub mod runtime;
pub mod schema;
