pub mod branch;
pub mod context;
pub mod diff;
pub mod patch;
pub mod repository;
pub mod run;
pub mod ticket;
