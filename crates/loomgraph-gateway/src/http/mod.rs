pub mod chat;
pub mod graph;
pub mod health;
pub mod knowledge;
pub mod processor;
