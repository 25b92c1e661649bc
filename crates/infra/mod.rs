pub mod db;
pub mod events;
